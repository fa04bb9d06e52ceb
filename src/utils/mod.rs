pub mod progress;
pub mod retry;

pub use progress::{
    estimate,
    percent,
    format_bytes,
    format_duration,
    format_speed,
    ProgressThrottle,
    Throughput,
};
pub use retry::{RetryDecision, RetryPolicy, RetryStrategy};
