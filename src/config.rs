use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the bridge daemon.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the judge-facing listener binds to.
    pub judge_addr: SocketAddr,
    /// Address the frontend-facing control listener binds to.
    pub control_addr: SocketAddr,
    /// Interval between ping packets sent to each connected judge.
    pub ping_interval: Duration,
    /// Number of priority tiers. Valid priorities are `[0, tiers)`,
    /// tier 0 being the lowest.
    pub tiers: u8,
    /// Submissions at or above this tier may consume the last idle judge;
    /// lower tiers leave it reserved while other capable judges exist.
    pub reserve_threshold: u8,
    /// How long to wait for connection tasks to drain on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            // SAFETY: hardcoded valid addresses that will always parse
            judge_addr: "127.0.0.1:9999"
                .parse()
                .expect("default judge address is valid"),
            control_addr: "127.0.0.1:9998"
                .parse()
                .expect("default control address is valid"),
            ping_interval: Duration::from_secs(10),
            tiers: 4,
            reserve_threshold: 2,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl BridgeConfig {
    pub fn new(judge_addr: SocketAddr, control_addr: SocketAddr) -> Self {
        Self {
            judge_addr,
            control_addr,
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Validate a priority tier received from the frontend.
    pub fn check_priority(&self, priority: u8) -> bool {
        priority < self.tiers
    }
}
