use std::time::Duration;

use proto::DEFAULT_MAX_FRAME_SIZE;

/// Parameters governing a single channel
///
/// Defaults suit interactive remote-access traffic: frames large enough for
/// encoded desktop regions, with a keepalive to hold NAT bindings open
/// across idle viewing.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub(crate) max_frame_size: usize,
    pub(crate) keepalive_interval: Option<Duration>,
}

impl ChannelConfig {
    /// Largest frame payload accepted from the peer, in bytes
    ///
    /// Bounds receive-buffer memory against a hostile peer; a frame header
    /// declaring more than this closes the connection.
    pub fn max_frame_size(&mut self, value: usize) -> &mut Self {
        self.max_frame_size = value;
        self
    }

    /// Interval between keepalive pings on an established channel
    ///
    /// `None` disables keepalives entirely.
    pub fn keepalive_interval(&mut self, value: Option<Duration>) -> &mut Self {
        self.keepalive_interval = value;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}
