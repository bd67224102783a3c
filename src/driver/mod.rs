//! Browser driver capability.
//!
//! The monitor and the recharge flow drive the browser through the narrow
//! contracts below instead of owning any DOM automation themselves.
//! `webdriver` implements them against a chromedriver-style endpoint;
//! `scripted` replays a fixed timeline for tests.

pub mod scripted;
pub mod webdriver;

use async_trait::async_trait;
use thiserror::Error;

/// Driver failure taxonomy. During monitoring only `Navigation` (initial
/// load) and `SessionLost` abort the run; `Sample` failures are logged and
/// polling continues.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("sample read failed: {0}")]
    Sample(String),
    #[error("browser session lost: {0}")]
    SessionLost(String),
    #[error("session setup failed: {0}")]
    Session(String),
}

/// Location/content sampling contract the monitor polls.
///
/// `iframe_locations` must drop cross-origin frames silently rather than
/// erroring; a frame the driver cannot read simply does not appear.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;
    async fn current_location(&mut self) -> Result<String, DriverError>;
    async fn page_text(&mut self) -> Result<String, DriverError>;
    async fn iframe_locations(&mut self) -> Result<Vec<String>, DriverError>;
    async fn release_session(&mut self) -> Result<(), DriverError>;
}

/// Form automation on top of sampling; what the recharge flow needs.
#[async_trait]
pub trait FormDriver: BrowserDriver {
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;
    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;
    async fn element_screenshot(&mut self, selector: &str) -> Result<Vec<u8>, DriverError>;
}

/// Creates fresh, exclusively-owned driver sessions. One session never
/// serves two runs.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Sampling-only session for a monitoring run.
    async fn sampling(&self) -> Result<Box<dyn BrowserDriver>, DriverError>;
    /// Full-automation session for a recharge flow.
    async fn automation(&self) -> Result<Box<dyn FormDriver>, DriverError>;
}
