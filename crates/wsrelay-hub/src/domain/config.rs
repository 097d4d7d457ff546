//! Hub configuration types.
//!
//! [`HubConfig`] is the single source of truth for all runtime settings.  It
//! is built once at startup (defaults, then the optional TOML file, then CLI
//! flags) and shared by the registry with every connection it creates.

use std::net::SocketAddr;
use std::time::Duration;

/// All runtime configuration for the hub.
///
/// # Example
///
/// ```rust
/// use wsrelay_hub::domain::HubConfig;
///
/// let cfg = HubConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert!(cfg.ping_period() < cfg.pong_wait);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Time allowed for one write (data frame, ping or close) to complete.
    pub write_wait: Duration,

    /// Read deadline.  Refreshed only when a pong arrives, so a peer that
    /// stops answering pings for this long is disconnected.
    pub pong_wait: Duration,

    /// Largest inbound message accepted from a peer, in bytes.
    pub max_message_size: usize,

    /// Capacity of each connection's outbound queue.  Enqueueing onto a full
    /// queue waits, which throttles the sender.
    pub outbound_capacity: usize,

    /// Capacity of the registry's broadcast intake channel.
    pub intake_capacity: usize,

    /// Socket read buffer size handed to the WebSocket layer, in bytes.
    pub read_buffer_size: usize,

    /// Write buffer size; outgoing frames are flushed once it fills.
    pub write_buffer_size: usize,
}

impl HubConfig {
    /// Interval between keepalive pings: 9/10 of [`pong_wait`](Self::pong_wait),
    /// so a ping always lands before the peer's read deadline.
    pub fn ping_period(&self) -> Duration {
        // tokio intervals panic on a zero period.
        (self.pong_wait * 9 / 10).max(Duration::from_millis(1))
    }
}

impl Default for HubConfig {
    /// | Field             | Default          |
    /// |-------------------|------------------|
    /// | bind_addr         | `0.0.0.0:8080`   |
    /// | write_wait        | 10 seconds       |
    /// | pong_wait         | 60 seconds       |
    /// | max_message_size  | 1024 bytes       |
    /// | outbound_capacity | 256 payloads     |
    /// | intake_capacity   | 64 payloads      |
    /// | read_buffer_size  | 1024 bytes       |
    /// | write_buffer_size | 1024 bytes       |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            max_message_size: 1024,
            outbound_capacity: 256,
            intake_capacity: 64,
            read_buffer_size: 1024,
            write_buffer_size: 1024,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
    }

    #[test]
    fn test_ping_period_is_nine_tenths_of_pong_wait() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn test_ping_period_never_zero() {
        let cfg = HubConfig {
            pong_wait: Duration::ZERO,
            ..HubConfig::default()
        };
        assert_eq!(cfg.ping_period(), Duration::from_millis(1));
    }

    #[test]
    fn test_default_queue_capacity_is_256() {
        assert_eq!(HubConfig::default().outbound_capacity, 256);
    }
}
