use std::time::Duration;

/// Largest batch a stream may write in one call (the usual `IOV_MAX`).
pub const MAX_BATCH_SIZE: usize = 1024;

/// How often a failed stream may try to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay between every attempt.
    Fixed(Duration),
    /// Delay doubles after each failed attempt, from `initial` up to `max`.
    /// A successful reconnect resets it.
    Exponential { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// Delay required before the next attempt, given how many attempts in
    /// a row have already failed.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(failed_attempts.min(31)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_millis(5000))
    }
}

/// Settings for a [`MultiStreamLogger`](crate::MultiStreamLogger).
///
/// # Examples
///
/// ```
/// # use multi_stream_logger::{LoggerConfig, ReconnectPolicy};
/// # use std::time::Duration;
/// let config = LoggerConfig::default()
///     .with_max_streams(64)
///     .with_commit_timeout(Duration::from_millis(1))
///     .with_reconnect(ReconnectPolicy::Exponential {
///         initial: Duration::from_millis(100),
///         max: Duration::from_secs(10),
///     });
/// assert_eq!(config.max_streams, 64);
/// ```
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Capacity of the stream table.
    pub max_streams: usize,
    /// Longest the writer thread sleeps before checking for work again,
    /// even without a wake-up signal.
    pub commit_timeout: Duration,
    /// Batch size given to newly opened streams.
    pub default_batch_size: usize,
    /// Backoff between reconnect attempts of a failed stream.
    pub reconnect: ReconnectPolicy,
    /// Name of the writer thread.
    pub thread_name: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            max_streams: 1024,
            commit_timeout: Duration::from_micros(2000),
            default_batch_size: MAX_BATCH_SIZE,
            reconnect: ReconnectPolicy::default(),
            thread_name: "stream-logger".to_string(),
        }
    }
}

impl LoggerConfig {
    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Clamped to `1..=MAX_BATCH_SIZE`.
    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = clamp_batch_size(size);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

pub(crate) fn clamp_batch_size(size: usize) -> usize {
    size.clamp(1, MAX_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_ignores_attempts() {
        let policy = ReconnectPolicy::Fixed(Duration::from_secs(2));
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(10), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = ReconnectPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_batch_size_clamping() {
        assert_eq!(LoggerConfig::default().with_default_batch_size(0).default_batch_size, 1);
        assert_eq!(
            LoggerConfig::default().with_default_batch_size(1 << 20).default_batch_size,
            MAX_BATCH_SIZE
        );
        assert_eq!(LoggerConfig::default().with_default_batch_size(16).default_batch_size, 16);
    }
}
