//! C10 — Configuration: the tunables scattered through spec.md §5/§4.6/§4.7
//! aggregated into one struct, following the `HttpListenProperties` /
//! `HttpConnectionProperties` aggregation pattern from the teacher's
//! `ext/http/http_next.rs` (SPEC_FULL.md §1).

use std::time::Duration;

/// Server-wide and per-connection tunables. `Default` matches the values
/// spec.md states explicitly (idle timeout ≈10s, WebSocket frame timeout
/// 5s, max frame size 1 MiB, 64 KiB buffers).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Closes an idle keep-alive connection with `408` after this long
    /// without a new request, and also bounds how long a single socket
    /// read may take while a message is in flight (spec.md §5; see
    /// SPEC_FULL.md §5 for why this one timeout replaces a separate sweep
    /// registry).
    pub idle_timeout: Duration,
    /// Upper bound on the request-line + headers block (spec.md §4.6
    /// supplement); exceeding it yields `400 Bad Request`.
    pub max_header_bytes: usize,
    /// WebSocket per-frame idle timeout (spec.md §4.7).
    pub websocket_idle_timeout: Duration,
    /// WebSocket maximum reassembled-message payload size, enforced via
    /// `fastwebsockets::WebSocket::set_max_message_size` (spec.md §4.7).
    pub websocket_max_frame_size: usize,
    /// Read buffer size for the HTTP socket-read loop, also used to size
    /// each request's `ByteStreamQueue` backpressure high-water mark
    /// (spec.md §4.7/§1).
    pub io_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10),
            max_header_bytes: 64 * 1024,
            websocket_idle_timeout: Duration::from_secs(5),
            websocket_max_frame_size: 1024 * 1024,
            io_buffer_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder-style configuration, per SPEC_FULL.md §6's "`ServerConfig`
/// (builder-style, `Default`)".
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    inner: OptionalConfig,
}

#[derive(Debug, Clone, Default)]
struct OptionalConfig {
    idle_timeout: Option<Duration>,
    max_header_bytes: Option<usize>,
    websocket_idle_timeout: Option<Duration>,
    websocket_max_frame_size: Option<usize>,
    io_buffer_size: Option<usize>,
}

impl ServerConfigBuilder {
    pub fn idle_timeout(mut self, d: Duration) -> Self {
        self.inner.idle_timeout = Some(d);
        self
    }

    pub fn max_header_bytes(mut self, n: usize) -> Self {
        self.inner.max_header_bytes = Some(n);
        self
    }

    pub fn websocket_idle_timeout(mut self, d: Duration) -> Self {
        self.inner.websocket_idle_timeout = Some(d);
        self
    }

    pub fn websocket_max_frame_size(mut self, n: usize) -> Self {
        self.inner.websocket_max_frame_size = Some(n);
        self
    }

    pub fn io_buffer_size(mut self, n: usize) -> Self {
        self.inner.io_buffer_size = Some(n);
        self
    }

    pub fn build(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            idle_timeout: self.inner.idle_timeout.unwrap_or(defaults.idle_timeout),
            max_header_bytes: self.inner.max_header_bytes.unwrap_or(defaults.max_header_bytes),
            websocket_idle_timeout: self.inner.websocket_idle_timeout.unwrap_or(defaults.websocket_idle_timeout),
            websocket_max_frame_size: self.inner.websocket_max_frame_size.unwrap_or(defaults.websocket_max_frame_size),
            io_buffer_size: self.inner.io_buffer_size.unwrap_or(defaults.io_buffer_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(10));
        assert_eq!(cfg.websocket_idle_timeout, Duration::from_secs(5));
        assert_eq!(cfg.websocket_max_frame_size, 1024 * 1024);
        assert_eq!(cfg.io_buffer_size, 64 * 1024);
    }

    #[test]
    fn builder_overrides_only_specified_fields() {
        let cfg = ServerConfig::builder().idle_timeout(Duration::from_secs(30)).build();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_header_bytes, ServerConfig::default().max_header_bytes);
    }
}
