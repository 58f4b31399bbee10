//! Client configuration

/// Tunables for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the backend event channel feeding the driver task.
    pub event_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 64,
        }
    }
}

impl ClientConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_buffer_size == 0 {
            return Err("event_buffer_size must be greater than zero".to_string());
        }
        Ok(())
    }
}
