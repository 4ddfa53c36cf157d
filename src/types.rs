use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Caller-facing configuration for one driver instance.
///
/// `timeout_ms` bounds every suspension point: engine launch, each task
/// step, and graceful shutdown. Wait-style steps may carry their own
/// tighter bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub headless: bool,
    pub timeout_ms: u64,
    pub user_agent: Option<String>,
    pub viewport: Viewport,
    pub disable_images: bool,
    pub extra_args: Vec<String>,
    /// Interval between liveness/readiness probes inside wait steps.
    pub poll_interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_ms: 30000,
            user_agent: None,
            viewport: Viewport::default(),
            disable_images: false,
            extra_args: vec![],
            poll_interval_ms: 100,
        }
    }
}
