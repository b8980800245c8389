//! Tunables for a [`Connection`](super::Connection).

use crate::netlink::recv_buffer_size;

/// Default capacity of the decoded-rule channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Connection settings.
///
/// ```ignore
/// let config = Config::new().channel_capacity(16);
/// let conn = Connection::with_config(config)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "output", serde(default))]
pub struct Config {
    channel_capacity: usize,
    recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            recv_buffer_size: recv_buffer_size(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules buffered between the receive loop and the consumer (at least 1).
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }

    /// Size of the per-operation receive buffer.
    pub fn recv_buffer_size(&self) -> usize {
        self.recv_buffer_size
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Override the receive buffer size. It must hold the largest reply
    /// datagram the kernel will send.
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.channel_capacity(), DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.recv_buffer_size(), recv_buffer_size());
    }

    #[test]
    fn capacity_floor() {
        assert_eq!(Config::new().with_channel_capacity(0).channel_capacity(), 1);
    }

    #[cfg(feature = "output")]
    #[test]
    fn partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"channel_capacity": 8}"#).unwrap();
        assert_eq!(config.channel_capacity(), 8);
        assert_eq!(config.recv_buffer_size(), recv_buffer_size());
    }
}
