//! W3C WebDriver client.
//!
//! Thin REST client for a chromedriver/geckodriver-style endpoint, covering
//! only the commands the monitor and flow need. Element interaction uses
//! CSS selectors throughout.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{BrowserDriver, DriverError, DriverFactory, FormDriver};

/// Collects embedded-frame locations; frames the page cannot read
/// (cross-origin) are skipped, never surfaced as errors.
const IFRAME_SCRIPT: &str = r#"
var urls = [];
var iframes = document.getElementsByTagName('iframe');
for (var i = 0; i < iframes.length; i++) {
    try {
        if (iframes[i].contentWindow && iframes[i].contentWindow.location) {
            urls.push(iframes[i].contentWindow.location.href);
        }
    } catch (e) {
        // cross-origin frame, skip
    }
}
return urls;
"#;

/// WebDriver endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebDriverSettings {
    /// Base URL of the WebDriver endpoint.
    pub endpoint: String,
    /// Browser name requested in capabilities.
    pub browser: String,
    pub headless: bool,
    /// Extra browser arguments.
    pub args: Vec<String>,
}

impl Default for WebDriverSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9515".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
        }
    }
}

/// Capability payload for a new session.
fn capabilities(settings: &WebDriverSettings) -> Value {
    let mut args = settings.args.clone();
    if settings.headless {
        args.push("--headless=new".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": settings.browser,
                "goog:chromeOptions": { "args": args },
            }
        }
    })
}

/// One live browser session on a WebDriver endpoint.
pub struct WebDriverSession {
    http: reqwest::Client,
    endpoint: String,
    session_id: String,
}

impl WebDriverSession {
    /// Open a new session against the configured endpoint.
    pub async fn connect(settings: &WebDriverSettings) -> Result<Self, DriverError> {
        let http = reqwest::Client::new();
        let endpoint = settings.endpoint.trim_end_matches('/').to_string();
        let response = http
            .post(format!("{}/session", endpoint))
            .json(&capabilities(settings))
            .send()
            .await
            .map_err(|e| DriverError::Session(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| DriverError::Session(e.to_string()))?;
        let session_id = body
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Session(format!("no session id in response: {}", body)))?
            .to_string();
        tracing::debug!(session_id = %session_id, "webdriver session created");
        Ok(Self {
            http,
            endpoint,
            session_id,
        })
    }

    /// Issue one WebDriver command against this session. Endpoint-level
    /// errors that mean the session is gone map to `SessionLost`; anything
    /// else is a `Sample` failure the caller can downgrade.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        let mut request = self.http.request(method, url.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                DriverError::SessionLost(e.to_string())
            } else {
                DriverError::Sample(e.to_string())
            }
        })?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| DriverError::Sample(e.to_string()))?;
        if let Some(kind) = value.pointer("/value/error").and_then(Value::as_str) {
            let message = value
                .pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or(kind)
                .to_string();
            if kind == "invalid session id" || kind == "no such window" {
                return Err(DriverError::SessionLost(message));
            }
            return Err(DriverError::Sample(format!("{}: {}", kind, message)));
        }
        Ok(value.get("value").cloned().unwrap_or(Value::Null))
    }

    /// Locate an element by CSS selector, returning its element id.
    async fn find_element(&self, selector: &str) -> Result<String, DriverError> {
        let body = json!({ "using": "css selector", "value": selector });
        let value = self.command(Method::POST, "/element", Some(&body)).await?;
        value
            .as_object()
            .and_then(|o| o.values().next())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DriverError::Sample(format!("element not found: {}", selector)))
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/url", Some(&json!({ "url": url })))
            .await
            .map_err(|e| match e {
                DriverError::Sample(msg) => DriverError::Navigation(msg),
                other => other,
            })?;
        Ok(())
    }

    async fn current_location(&mut self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Sample("non-string location".to_string()))
    }

    async fn page_text(&mut self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Sample("non-string page source".to_string()))
    }

    async fn iframe_locations(&mut self) -> Result<Vec<String>, DriverError> {
        let body = json!({ "script": IFRAME_SCRIPT, "args": [] });
        let value = self.command(Method::POST, "/execute/sync", Some(&body)).await?;
        let urls = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(urls)
    }

    async fn release_session(&mut self) -> Result<(), DriverError> {
        self.command(Method::DELETE, "", None).await.map_err(|e| match e {
            DriverError::Sample(msg) => DriverError::Session(msg),
            other => other,
        })?;
        tracing::debug!(session_id = %self.session_id, "webdriver session released");
        Ok(())
    }
}

#[async_trait]
impl FormDriver for WebDriverSession {
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self.find_element(selector).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/clear", element),
            Some(&json!({})),
        )
        .await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", element),
            Some(&json!({ "text": value })),
        )
        .await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self.find_element(selector).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/click", element),
            Some(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn element_screenshot(&mut self, selector: &str) -> Result<Vec<u8>, DriverError> {
        let element = self.find_element(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/screenshot", element), None)
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| DriverError::Sample("non-string screenshot".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::Sample(format!("bad screenshot encoding: {}", e)))
    }
}

/// Opens a fresh [`WebDriverSession`] per run.
pub struct WebDriverFactory {
    settings: WebDriverSettings,
}

impl WebDriverFactory {
    pub fn new(settings: WebDriverSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn sampling(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        Ok(Box::new(WebDriverSession::connect(&self.settings).await?))
    }

    async fn automation(&self) -> Result<Box<dyn FormDriver>, DriverError> {
        Ok(Box::new(WebDriverSession::connect(&self.settings).await?))
    }
}
