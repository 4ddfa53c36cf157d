#[cfg(feature = "chrome")]
pub mod chrome;

#[cfg(feature = "chrome")]
pub use chrome::ChromeEngine;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::types::DriverConfig;

/// Control channel to one external headless-browser process.
///
/// The wire format behind these operations belongs to the engine; the
/// driver treats them as opaque capabilities. An engine owns its process
/// exclusively and must terminate it on `shutdown()` and on drop.
#[async_trait]
pub trait Engine: Send + Sync {
    type Page: Send + Sync;

    /// Spawn the engine process.
    async fn launch(&mut self, config: &DriverConfig) -> Result<()>;

    /// Open the page all subsequent operations run against.
    async fn open_page(&self) -> Result<Self::Page>;

    /// Navigate and wait for the navigation to commit.
    async fn navigate(&self, page: &Self::Page, url: &str) -> Result<()>;

    /// Serialized HTML of the current document.
    async fn page_source(&self, page: &Self::Page) -> Result<String>;

    async fn title(&self, page: &Self::Page) -> Result<String>;

    async fn current_url(&self, page: &Self::Page) -> Result<String>;

    async fn element_exists(&self, page: &Self::Page, selector: &str) -> Result<bool>;

    async fn click(&self, page: &Self::Page, selector: &str) -> Result<()>;

    async fn fill(&self, page: &Self::Page, selector: &str, text: &str) -> Result<()>;

    /// Execute JavaScript in the page and return its JSON value.
    async fn evaluate(&self, page: &Self::Page, script: &str) -> Result<Value>;

    /// Full-page PNG capture.
    async fn screenshot(&self, page: &Self::Page) -> Result<Vec<u8>>;

    /// Whether the document has finished loading.
    async fn ready(&self, page: &Self::Page) -> Result<bool>;

    /// Whether the engine process is still responding.
    fn is_alive(&self) -> bool;

    /// Terminate the engine process. Must be safe to call repeatedly and
    /// on a never-launched engine.
    async fn shutdown(&mut self) -> Result<()>;
}
