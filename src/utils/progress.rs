use std::time::Duration;
use tokio::time::Instant;

/// 少于这个时长不计算速度，避免开始阶段的数值剧烈波动
pub const ESTIMATE_FLOOR: Duration = Duration::from_secs(1);

/// 速度与剩余时间
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Throughput {
    /// 字节/秒
    pub speed: f64,
    /// 剩余秒数
    pub eta: Option<u64>,
}

/// 根据已用时间和已传输字节估算平均速度与 ETA
pub fn estimate(bytes_moved: u64, total_bytes: u64, elapsed: Duration) -> Throughput {
    if elapsed <= ESTIMATE_FLOOR {
        return Throughput::default();
    }

    let speed = bytes_moved as f64 / elapsed.as_secs_f64();
    let eta = if speed > 0.0 {
        let remaining = total_bytes.saturating_sub(bytes_moved);
        Some((remaining as f64 / speed) as u64)
    } else {
        None
    };

    Throughput { speed, eta }
}

/// round(100 * done / total)，total 为 0 视为已完成
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }

    let value = (done as f64 * 100.0 / total as f64).round();
    value.clamp(0.0, 100.0) as u8
}

/// 进度写入节流，终态不经过这里
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// 距离上一次写入超过间隔时返回 true 并记录本次
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化速度
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second as u64))
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
