use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What to pull out of the first element matching an `Extract` step's
/// selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractTarget {
    Text,
    Html,
    Attribute(String),
}

/// A single atomic automation action within a task.
///
/// Steps execute strictly in order; each one sees the page state left by
/// the previous one. The browser offers no rollback, so side effects of
/// completed steps persist even when a later step fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    Navigate {
        url: String,
    },
    WaitForLoad {
        timeout_ms: Option<u64>,
    },
    WaitForElement {
        selector: String,
        timeout_ms: Option<u64>,
    },
    /// Poll the page's visible text until it matches a regex.
    WaitForText {
        pattern: String,
        timeout_ms: Option<u64>,
    },
    Click {
        selector: String,
    },
    Fill {
        selector: String,
        text: String,
    },
    Extract {
        selector: String,
        target: ExtractTarget,
        store_as: String,
    },
    ExtractTitle {
        store_as: String,
    },
    ExtractUrl {
        store_as: String,
    },
    Evaluate {
        script: String,
        store_as: Option<String>,
    },
    /// Full-page PNG, stored base64-encoded in the payload.
    Screenshot {
        store_as: String,
    },
    Sleep {
        duration_ms: u64,
    },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Navigate { .. } => "navigate",
            Step::WaitForLoad { .. } => "wait_for_load",
            Step::WaitForElement { .. } => "wait_for_element",
            Step::WaitForText { .. } => "wait_for_text",
            Step::Click { .. } => "click",
            Step::Fill { .. } => "fill",
            Step::Extract { .. } => "extract",
            Step::ExtractTitle { .. } => "extract_title",
            Step::ExtractUrl { .. } => "extract_url",
            Step::Evaluate { .. } => "evaluate",
            Step::Screenshot { .. } => "screenshot",
            Step::Sleep { .. } => "sleep",
        }
    }

    /// Per-step bound replacing the config-wide timeout, where one exists.
    /// A sleep is bounded by its own duration so long settles cannot
    /// spuriously time out.
    pub fn timeout_override(&self) -> Option<u64> {
        match self {
            Step::WaitForLoad { timeout_ms }
            | Step::WaitForElement { timeout_ms, .. }
            | Step::WaitForText { timeout_ms, .. } => *timeout_ms,
            Step::Sleep { duration_ms } => Some(duration_ms.saturating_add(100)),
            _ => None,
        }
    }
}

/// An ordered sequence of steps submitted for execution against a live
/// session. Immutable once handed to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub steps: Vec<Step>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn navigate(self, url: impl Into<String>) -> Self {
        self.step(Step::Navigate { url: url.into() })
    }

    pub fn wait_for_load(self) -> Self {
        self.step(Step::WaitForLoad { timeout_ms: None })
    }

    pub fn wait_for_element(self, selector: impl Into<String>) -> Self {
        self.step(Step::WaitForElement {
            selector: selector.into(),
            timeout_ms: None,
        })
    }

    pub fn wait_for_text(self, pattern: impl Into<String>) -> Self {
        self.step(Step::WaitForText {
            pattern: pattern.into(),
            timeout_ms: None,
        })
    }

    pub fn click(self, selector: impl Into<String>) -> Self {
        self.step(Step::Click {
            selector: selector.into(),
        })
    }

    pub fn fill(self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.step(Step::Fill {
            selector: selector.into(),
            text: text.into(),
        })
    }

    pub fn extract(
        self,
        selector: impl Into<String>,
        target: ExtractTarget,
        store_as: impl Into<String>,
    ) -> Self {
        self.step(Step::Extract {
            selector: selector.into(),
            target,
            store_as: store_as.into(),
        })
    }

    pub fn extract_title(self, store_as: impl Into<String>) -> Self {
        self.step(Step::ExtractTitle {
            store_as: store_as.into(),
        })
    }

    pub fn extract_url(self, store_as: impl Into<String>) -> Self {
        self.step(Step::ExtractUrl {
            store_as: store_as.into(),
        })
    }

    pub fn evaluate(self, script: impl Into<String>, store_as: Option<String>) -> Self {
        self.step(Step::Evaluate {
            script: script.into(),
            store_as,
        })
    }

    pub fn screenshot(self, store_as: impl Into<String>) -> Self {
        self.step(Step::Screenshot {
            store_as: store_as.into(),
        })
    }

    pub fn sleep_ms(self, duration_ms: u64) -> Self {
        self.step(Step::Sleep { duration_ms })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Successful outcome of a task run. The payload is a JSON object keyed
/// by each extracting step's `store_as` name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_id: String,
    pub session_id: String,
    pub payload: Value,
    pub steps_completed: usize,
    pub duration_ms: u64,
}
