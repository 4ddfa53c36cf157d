use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::dom;
use crate::engine::Engine;
use crate::errors::{DriverError, Result};
use crate::task::ExtractTarget;

/// Fixture document served by a default [`MockEngine`].
pub const EXAMPLE_PAGE: &str = r#"<html>
    <head><title>Example Domain</title></head>
    <body>
        <h1>Example Domain</h1>
        <p>This domain is for use in illustrative examples in documents.</p>
        <a href="https://www.iana.org/domains/example">More information...</a>
    </body>
</html>"#;

// Smallest payload that still looks like a PNG to consumers.
const PNG_STUB: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// In-memory engine for exercising driver semantics without a browser
/// binary.
///
/// The page is a static HTML fixture interrogated with the same `dom`
/// helpers the driver uses. Launch delay, launch failure, and
/// death-after-N-operations are scriptable so state-machine and crash
/// paths can be driven deterministically.
pub struct MockEngine {
    html: Arc<Mutex<String>>,
    current_url: Arc<Mutex<String>>,
    eval_result: Arc<Mutex<Value>>,
    alive: Arc<AtomicBool>,
    launch_delay: Option<Duration>,
    fail_launch: bool,
    ops_before_death: Arc<Mutex<Option<usize>>>,
    navigations: Arc<Mutex<Vec<String>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_page(EXAMPLE_PAGE)
    }

    pub fn with_page(html: &str) -> Self {
        Self {
            html: Arc::new(Mutex::new(html.to_string())),
            current_url: Arc::new(Mutex::new(String::new())),
            eval_result: Arc::new(Mutex::new(Value::Null)),
            alive: Arc::new(AtomicBool::new(false)),
            launch_delay: None,
            fail_launch: false,
            ops_before_death: Arc::new(Mutex::new(None)),
            navigations: Arc::new(Mutex::new(Vec::new())),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Let `ops` page operations succeed, then have the engine process
    /// "die": subsequent operations error and `is_alive()` turns false.
    pub fn dying_after_ops(self, ops: usize) -> Self {
        *self.ops_before_death.lock().unwrap() = Some(ops);
        self
    }

    pub fn with_eval_result(self, value: Value) -> Self {
        *self.eval_result.lock().unwrap() = value;
        self
    }

    pub fn set_page(&self, html: &str) {
        *self.html.lock().unwrap() = html.to_string();
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn page_html(&self) -> String {
        self.html.lock().unwrap().clone()
    }

    fn tick(&self) -> Result<()> {
        let mut remaining = self.ops_before_death.lock().unwrap();
        match remaining.as_mut() {
            Some(0) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(DriverError::Engine("engine process exited".to_string()))
            }
            Some(count) => {
                *count -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MockEngine {
    type Page = ();

    async fn launch(&mut self, _config: &crate::types::DriverConfig) -> Result<()> {
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_launch {
            return Err(DriverError::Launch("mock launch failure".to_string()));
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn open_page(&self) -> Result<Self::Page> {
        Ok(())
    }

    async fn navigate(&self, _page: &Self::Page, url: &str) -> Result<()> {
        self.tick()?;
        self.navigations.lock().unwrap().push(url.to_string());
        *self.current_url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn page_source(&self, _page: &Self::Page) -> Result<String> {
        self.tick()?;
        Ok(self.page_html())
    }

    async fn title(&self, _page: &Self::Page) -> Result<String> {
        self.tick()?;
        Ok(
            dom::extract(&self.page_html(), "title", &ExtractTarget::Text)?
                .unwrap_or_default(),
        )
    }

    async fn current_url(&self, _page: &Self::Page) -> Result<String> {
        self.tick()?;
        Ok(self.current_url.lock().unwrap().clone())
    }

    async fn element_exists(&self, _page: &Self::Page, selector: &str) -> Result<bool> {
        self.tick()?;
        dom::element_exists(&self.page_html(), selector)
    }

    async fn click(&self, _page: &Self::Page, selector: &str) -> Result<()> {
        self.tick()?;
        if dom::element_exists(&self.page_html(), selector)? {
            Ok(())
        } else {
            Err(DriverError::Engine(format!(
                "no element matched '{}'",
                selector
            )))
        }
    }

    async fn fill(&self, _page: &Self::Page, selector: &str, _text: &str) -> Result<()> {
        self.tick()?;
        if dom::element_exists(&self.page_html(), selector)? {
            Ok(())
        } else {
            Err(DriverError::Engine(format!(
                "no element matched '{}'",
                selector
            )))
        }
    }

    async fn evaluate(&self, _page: &Self::Page, _script: &str) -> Result<Value> {
        self.tick()?;
        Ok(self.eval_result.lock().unwrap().clone())
    }

    async fn screenshot(&self, _page: &Self::Page) -> Result<Vec<u8>> {
        self.tick()?;
        Ok(PNG_STUB.to_vec())
    }

    async fn ready(&self, _page: &Self::Page) -> Result<bool> {
        self.tick()?;
        Ok(true)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Install a subscriber printing driver traces during tests and demos.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
