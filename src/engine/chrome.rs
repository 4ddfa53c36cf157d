use std::ffi::OsStr;
use std::sync::Arc;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::debug;

use crate::engine::Engine;
use crate::errors::{DriverError, Result};
use crate::types::DriverConfig;

/// Engine backed by a locally spawned Chrome/Chromium process, driven
/// over the DevTools protocol. Dropping the handle kills the child
/// process, so the engine cannot outlive its owner.
pub struct ChromeEngine {
    browser: Option<Browser>,
}

impl ChromeEngine {
    pub fn new() -> Self {
        Self { browser: None }
    }

    fn browser(&self) -> Result<&Browser> {
        self.browser
            .as_ref()
            .ok_or_else(|| DriverError::Engine("engine not launched".to_string()))
    }
}

impl Default for ChromeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for ChromeEngine {
    type Page = Arc<Tab>;

    async fn launch(&mut self, config: &DriverConfig) -> Result<()> {
        // Create strings first to ensure they live long enough
        let window_size_arg = format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        );
        let user_agent_arg = config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];

        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }

        if config.disable_images {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
        }

        for arg in &config.extra_args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .build()
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| DriverError::Launch(e.to_string()))?;

        debug!(headless = config.headless, "chrome engine launched");
        self.browser = Some(browser);
        Ok(())
    }

    async fn open_page(&self) -> Result<Self::Page> {
        let tab = self
            .browser()?
            .new_tab()
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        Ok(tab)
    }

    async fn navigate(&self, page: &Self::Page, url: &str) -> Result<()> {
        page.navigate_to(url)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        page.wait_until_navigated()
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(())
    }

    async fn page_source(&self, page: &Self::Page) -> Result<String> {
        let result = page
            .evaluate("document.documentElement.outerHTML", false)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| DriverError::Engine("page source unavailable".to_string()))
    }

    async fn title(&self, page: &Self::Page) -> Result<String> {
        let result = page
            .evaluate("document.title", false)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default())
    }

    async fn current_url(&self, page: &Self::Page) -> Result<String> {
        Ok(page.get_url())
    }

    async fn element_exists(&self, page: &Self::Page, selector: &str) -> Result<bool> {
        let js_code = format!(
            "!!document.querySelector('{}')",
            selector.replace('\\', "\\\\").replace('\'', "\\'")
        );

        let result = page
            .evaluate(&js_code, false)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn click(&self, page: &Self::Page, selector: &str) -> Result<()> {
        page.find_element(selector)
            .map_err(|e| DriverError::Engine(e.to_string()))?
            .click()
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(())
    }

    async fn fill(&self, page: &Self::Page, selector: &str, text: &str) -> Result<()> {
        let element = page
            .find_element(selector)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        element
            .click()
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        element
            .type_into(text)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(())
    }

    async fn evaluate(&self, page: &Self::Page, script: &str) -> Result<Value> {
        let result = page
            .evaluate(script, false)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(result.value.unwrap_or(Value::Null))
    }

    async fn screenshot(&self, page: &Self::Page) -> Result<Vec<u8>> {
        let screenshot = page
            .capture_screenshot(
                headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
                None,
                None,
                true,
            )
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(screenshot)
    }

    async fn ready(&self, page: &Self::Page) -> Result<bool> {
        let result = page
            .evaluate("document.readyState === 'complete'", false)
            .map_err(|e| DriverError::Engine(e.to_string()))?;

        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn is_alive(&self) -> bool {
        self.browser
            .as_ref()
            .map(|browser| browser.get_version().is_ok())
            .unwrap_or(false)
    }

    async fn shutdown(&mut self) -> Result<()> {
        // Dropping the handle terminates the child process.
        self.browser = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::task::{ExtractTarget, Task};

    // Requires a local Chrome/Chromium binary; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn navigates_and_extracts_against_real_chrome() {
        let mut driver = Driver::new(ChromeEngine::new(), DriverConfig::default());
        driver.start().await.unwrap();

        let task = Task::new("smoke")
            .navigate("https://example.com/")
            .wait_for_load()
            .extract("h1", ExtractTarget::Text, "heading")
            .extract_title("title");

        let output = driver.run(&task).await.unwrap();
        assert_eq!(output.payload["title"], "Example Domain");

        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_safe_without_launch() {
        let mut engine = ChromeEngine::new();
        assert!(!engine.is_alive());
        engine.shutdown().await.unwrap();
    }
}
