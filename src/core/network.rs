use async_trait::async_trait;
use tokio::sync::watch;
use super::traits::NetworkMonitor;

/// 当前使用的网络类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransport {
    Wifi,
    Cellular,
    Ethernet,
    /// VPN、蓝牙等，不视为可用
    Other,
}

impl NetworkTransport {
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Wifi | Self::Cellular | Self::Ethernet)
    }
}

/// 总是在线
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

#[async_trait]
impl NetworkMonitor for AlwaysOnline {
    async fn is_usable(&self) -> bool {
        true
    }
}

/// 由宿主写入当前网络状态，None 表示没有网络
pub struct SwitchableNetwork {
    current: watch::Sender<Option<NetworkTransport>>,
}

impl SwitchableNetwork {
    pub fn new(initial: Option<NetworkTransport>) -> Self {
        let (current, _) = watch::channel(initial);
        Self { current }
    }

    pub fn set(&self, transport: Option<NetworkTransport>) {
        self.current.send_replace(transport);
    }

    pub fn current(&self) -> Option<NetworkTransport> {
        *self.current.borrow()
    }

    /// 订阅网络变化
    pub fn subscribe(&self) -> watch::Receiver<Option<NetworkTransport>> {
        self.current.subscribe()
    }
}

#[async_trait]
impl NetworkMonitor for SwitchableNetwork {
    async fn is_usable(&self) -> bool {
        self.current().is_some_and(NetworkTransport::is_usable)
    }
}
