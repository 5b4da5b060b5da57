/// Tuning knobs for a connection.
///
/// The wire format's frame length is an attacker-controlled 32-bit value;
/// `max_frame_len` is a guard against committing to an unbounded
/// allocation for a single payload, checked before any buffer growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Initial capacity reserved for the framer's read buffer.
    pub initial_buffer_capacity: usize,
    /// Largest payload (header excluded) the framer will accept.
    pub max_frame_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            initial_buffer_capacity: 4096,
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}
