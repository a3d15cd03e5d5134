//! Engine configuration
//!
//! Defaults for the worker pool and for the option values new sockets start
//! with. Sockets can override every per-socket value through options.

use std::time::Duration;

/// Upper bound on completion worker threads.
pub const MAX_WORKER_THREADS: usize = 16;

/// Lower bound on completion worker threads.
pub const MIN_WORKER_THREADS: usize = 2;

/// Initial reconnect interval (100ms)
pub const DEFAULT_RECONNECT_MIN: Duration = Duration::from_millis(100);

/// Reconnect interval cap. Zero keeps the interval fixed at the minimum.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::ZERO;

/// Largest message a socket accepts from a peer (1 MiB). Zero is unlimited.
pub const DEFAULT_RECV_SIZE_MAX: usize = 1024 * 1024;

/// Default `ttl-max` hop limit.
pub const DEFAULT_TTL_MAX: i32 = 8;

/// Default receive queue depth, in messages.
pub const DEFAULT_RECV_BUFFER: i32 = 8;

/// Default send queue depth, in messages.
pub const DEFAULT_SEND_BUFFER: i32 = 8;

/// Largest accepted `recv-buffer` / `send-buffer` value.
pub const MAX_BUFFER_DEPTH: i32 = 8192;

/// Largest accepted `ttl-max` value.
pub const MAX_TTL: i32 = 15;

/// Initial `req:resend-time` (1 minute)
pub const DEFAULT_REQ_RESEND_TIME: Duration = Duration::from_secs(60);

/// Initial `surveyor:survey-time` (1 second)
pub const DEFAULT_SURVEY_TIME: Duration = Duration::from_secs(1);

/// Loopback engine configuration.
///
/// # Examples
///
/// ```
/// use carapace_loopback::config::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_worker_threads(4)
///     .with_reconnect(Duration::from_millis(10), Duration::from_millis(200));
/// assert_eq!(config.worker_threads, 4);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Threads running AIO completion callbacks.
    pub worker_threads: usize,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub recv_size_max: usize,
    pub ttl_max: i32,
    pub recv_buffer: i32,
    pub send_buffer: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().clamp(MIN_WORKER_THREADS, MAX_WORKER_THREADS),
            reconnect_min: DEFAULT_RECONNECT_MIN,
            reconnect_max: DEFAULT_RECONNECT_MAX,
            recv_size_max: DEFAULT_RECV_SIZE_MAX,
            ttl_max: DEFAULT_TTL_MAX,
            recv_buffer: DEFAULT_RECV_BUFFER,
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Set the completion worker count, clamped to the supported range.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.clamp(MIN_WORKER_THREADS, MAX_WORKER_THREADS);
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_min = min;
        self.reconnect_max = max;
        self
    }

    #[must_use]
    pub fn with_recv_size_max(mut self, size: usize) -> Self {
        self.recv_size_max = size;
        self
    }

    #[must_use]
    pub fn with_ttl_max(mut self, ttl: i32) -> Self {
        self.ttl_max = ttl.clamp(1, MAX_TTL);
        self
    }

    /// Default receive and send queue depths.
    #[must_use]
    pub fn with_buffers(mut self, recv: i32, send: i32) -> Self {
        self.recv_buffer = recv.clamp(0, MAX_BUFFER_DEPTH);
        self.send_buffer = send.clamp(0, MAX_BUFFER_DEPTH);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_in_range() {
        let config = EngineConfig::default();
        assert!(config.worker_threads >= MIN_WORKER_THREADS);
        assert!(config.worker_threads <= MAX_WORKER_THREADS);
        assert_eq!(config.reconnect_min, DEFAULT_RECONNECT_MIN);
    }

    #[test]
    fn test_builders_clamp() {
        let config = EngineConfig::default()
            .with_worker_threads(1000)
            .with_ttl_max(99)
            .with_buffers(-4, 100_000);
        assert_eq!(config.worker_threads, MAX_WORKER_THREADS);
        assert_eq!(config.ttl_max, MAX_TTL);
        assert_eq!(config.recv_buffer, 0);
        assert_eq!(config.send_buffer, MAX_BUFFER_DEPTH);
    }
}
