//! Deterministic scripted driver.
//!
//! Replays a fixed timeline of samples so the monitor and flow can be
//! exercised without a browser. Each `current_location` call consumes one
//! tick (the last tick repeats); `page_text` and `iframe_locations` read
//! the most recently consumed tick. Form interactions are recorded, not
//! executed.

use async_trait::async_trait;

use super::{BrowserDriver, DriverError, DriverFactory, FormDriver};

/// One scripted observation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTick {
    pub url: String,
    pub page_text: Option<String>,
    pub iframes: Vec<String>,
}

impl ScriptedTick {
    pub fn at(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.page_text = Some(text.to_string());
        self
    }

    pub fn with_iframes(mut self, frames: &[&str]) -> Self {
        self.iframes = frames.iter().map(|f| f.to_string()).collect();
        self
    }
}

#[derive(Debug, Default)]
pub struct ScriptedDriver {
    ticks: Vec<ScriptedTick>,
    served: usize,
    pub released: bool,
    /// When set, `navigate` fails with this message.
    pub fail_navigation: Option<String>,
    /// `current_location` reports the session gone from this call on.
    pub lose_session_at: Option<usize>,
    /// `current_location` calls (0-based) that fail with a sample error.
    pub sample_errors_at: Vec<usize>,
    /// Recorded navigate/fill/click interactions.
    pub actions: Vec<String>,
    /// Bytes returned by `element_screenshot`.
    pub screenshot: Vec<u8>,
}

impl ScriptedDriver {
    pub fn new(mut ticks: Vec<ScriptedTick>) -> Self {
        if ticks.is_empty() {
            ticks.push(ScriptedTick::at("about:blank"));
        }
        Self {
            ticks,
            ..Self::default()
        }
    }

    pub fn with_screenshot(mut self, bytes: Vec<u8>) -> Self {
        self.screenshot = bytes;
        self
    }

    /// The tick most recently served by `current_location`.
    fn current(&self) -> &ScriptedTick {
        let index = self.served.saturating_sub(1).min(self.ticks.len() - 1);
        &self.ticks[index]
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        if let Some(message) = &self.fail_navigation {
            return Err(DriverError::Navigation(message.clone()));
        }
        self.actions.push(format!("navigate {}", url));
        Ok(())
    }

    async fn current_location(&mut self) -> Result<String, DriverError> {
        let call = self.served;
        self.served += 1;
        if let Some(at) = self.lose_session_at {
            if call >= at {
                return Err(DriverError::SessionLost("browser terminated".to_string()));
            }
        }
        if self.sample_errors_at.contains(&call) {
            return Err(DriverError::Sample("location read failed".to_string()));
        }
        let index = call.min(self.ticks.len() - 1);
        Ok(self.ticks[index].url.clone())
    }

    async fn page_text(&mut self) -> Result<String, DriverError> {
        Ok(self.current().page_text.clone().unwrap_or_default())
    }

    async fn iframe_locations(&mut self) -> Result<Vec<String>, DriverError> {
        Ok(self.current().iframes.clone())
    }

    async fn release_session(&mut self) -> Result<(), DriverError> {
        self.released = true;
        Ok(())
    }
}

#[async_trait]
impl FormDriver for ScriptedDriver {
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.actions.push(format!("fill {}={}", selector, value));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        self.actions.push(format!("click {}", selector));
        Ok(())
    }

    async fn element_screenshot(&mut self, _selector: &str) -> Result<Vec<u8>, DriverError> {
        Ok(self.screenshot.clone())
    }
}

/// Hands out scripted sessions; the automation and sampling timelines are
/// configured separately because a flow run and its follow-up monitoring
/// run see different pages.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    pub automation_ticks: Vec<ScriptedTick>,
    pub sampling_ticks: Vec<ScriptedTick>,
    pub screenshot: Vec<u8>,
}

#[async_trait]
impl DriverFactory for ScriptedFactory {
    async fn sampling(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        Ok(Box::new(ScriptedDriver::new(self.sampling_ticks.clone())))
    }

    async fn automation(&self) -> Result<Box<dyn FormDriver>, DriverError> {
        Ok(Box::new(
            ScriptedDriver::new(self.automation_ticks.clone())
                .with_screenshot(self.screenshot.clone()),
        ))
    }
}
