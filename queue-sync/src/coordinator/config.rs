use std::time::Duration;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a client waits after losing the host before giving up
    pub grace_period: Duration,
    /// Limit for registration plus opening the host channel
    pub connect_timeout: Duration,
    /// Interval between PINGs on open channels
    pub keepalive_interval: Duration,
    /// Silence after which a channel is treated as dead (None = never)
    pub idle_timeout: Option<Duration>,
    /// Actions a joining client may queue before its host channel opens
    pub offline_queue_capacity: usize,
    /// Make one reconnect attempt to the host inside the grace window
    pub reconnect_during_grace: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(5),
            idle_timeout: None,
            offline_queue_capacity: 256,
            reconnect_during_grace: true,
        }
    }
}

impl CoordinatorConfig {
    /// Short timers for tests.
    pub fn for_testing() -> Self {
        Self {
            grace_period: Duration::from_millis(300),
            connect_timeout: Duration::from_millis(500),
            keepalive_interval: Duration::from_millis(100),
            idle_timeout: None,
            offline_queue_capacity: 16,
            reconnect_during_grace: true,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn without_grace_reconnect(mut self) -> Self {
        self.reconnect_during_grace = false;
        self
    }
}
