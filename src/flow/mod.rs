//! Portal recharge flow.
//!
//! One parameterized automation of the portal's recharge funnel. The
//! credit-card and voucher funnels are configuration variants of the same
//! step sequence — login, open the recharge page, optionally solve a
//! CAPTCHA, fill the variant's fields, confirm, then capture the gateway
//! payment URL. Capture is pull-based: the flow polls the location and
//! page source for a gateway URL pattern instead of planting interceptor
//! state in the page.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::captcha::{CaptchaError, CaptchaOracle};
use crate::config::{Config, EventsConfig};
use crate::driver::{DriverError, DriverFactory, FormDriver};
use crate::events::{Event, EventKind, EventLog};
use crate::monitor::{Outcome, PaymentMonitor};

/// Flow failure taxonomy.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("login failed: {0}")]
    Login(String),
    #[error("payment URL not found within {0}s")]
    PaymentUrlNotFound(u64),
    #[error("invalid payment URL pattern: {0}")]
    Pattern(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Captcha(#[from] CaptchaError),
}

/// Login page selectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginSelectors {
    pub username: String,
    pub password: String,
    pub submit: String,
    /// Substring of the location that, when still present after submit,
    /// means the login did not go through.
    pub login_marker: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            username: "input[type=\"text\"]".to_string(),
            password: "input[type=\"password\"]".to_string(),
            submit: "button[type=\"submit\"]".to_string(),
            login_marker: "login".to_string(),
        }
    }
}

/// CAPTCHA step selectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaSelectors {
    /// Image element to screenshot for the oracle.
    pub image: String,
    /// Input the answer goes into.
    pub input: String,
}

/// One field to fill. Selector and value may reference request fields as
/// `{{username}}`, `{{beneficiary}}`, `{{amount}}`, `{{voucherCode}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFill {
    pub selector: String,
    pub value: String,
}

/// Flow variant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowConfig {
    /// Login page URL; the flow starts here.
    pub base_url: String,
    /// Path of this variant's recharge page.
    pub recharge_path: String,
    pub login: LoginSelectors,
    /// Element to click before filling (e.g. the beneficiary chooser);
    /// templated like field selectors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_beneficiary: Option<String>,
    /// Fields to fill, in order.
    pub fields: Vec<FieldFill>,
    /// Confirm buttons, clicked in order with a settle delay in between.
    pub confirm_selectors: Vec<String>,
    /// CAPTCHA step, for variants that have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captcha: Option<CaptchaSelectors>,
    /// Regex locating the gateway payment URL in the location or page
    /// source after the final confirm.
    pub payment_url_pattern: String,
    /// Seconds to wait for the payment URL.
    pub payment_url_wait_seconds: u64,
    /// Settle delay between steps, in milliseconds.
    pub step_delay_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::credit_card()
    }
}

impl FlowConfig {
    /// Card-payment variant: amount-based recharge paid at the gateway.
    /// No CAPTCHA, two-step confirmation.
    pub fn credit_card() -> Self {
        Self {
            base_url: "https://selfcare.example.com/".to_string(),
            recharge_path: "/recharge-online".to_string(),
            login: LoginSelectors::default(),
            select_beneficiary: Some("[data-msisdn=\"{{beneficiary}}\"]".to_string()),
            fields: vec![FieldFill {
                selector: "input[name=\"amount\"]".to_string(),
                value: "{{amount}}".to_string(),
            }],
            confirm_selectors: vec![
                "button[name=\"validate\"]".to_string(),
                "button[name=\"confirm\"]".to_string(),
            ],
            captcha: None,
            payment_url_pattern: r#"https?://[^\s"'<>]*ipay[^\s"'<>]*"#.to_string(),
            payment_url_wait_seconds: 10,
            step_delay_ms: 1500,
        }
    }

    /// Voucher variant: a scratch-card code entered behind a CAPTCHA, no
    /// gateway round-trip confirmation page.
    pub fn voucher() -> Self {
        Self {
            recharge_path: "/recharge-card".to_string(),
            select_beneficiary: Some("[data-msisdn=\"{{beneficiary}}\"]".to_string()),
            fields: vec![FieldFill {
                selector: "input[name=\"voucher\"]".to_string(),
                value: "{{voucherCode}}".to_string(),
            }],
            confirm_selectors: vec!["button[name=\"validate\"]".to_string()],
            captcha: Some(CaptchaSelectors {
                image: "img[alt=\"captcha\"]".to_string(),
                input: "input[name=\"captcha\"]".to_string(),
            }),
            ..Self::credit_card()
        }
    }
}

/// Inputs for one recharge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeRequest {
    pub username: String,
    pub password: String,
    pub beneficiary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voucher_code: Option<String>,
}

impl RechargeRequest {
    fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("username", self.username.clone()),
            ("beneficiary", self.beneficiary.clone()),
            (
                "amount",
                self.amount.map(|a| a.to_string()).unwrap_or_default(),
            ),
            ("voucherCode", self.voucher_code.clone().unwrap_or_default()),
        ]
    }
}

/// Render `{{field}}` placeholders from the request.
fn render(template: &str, vars: &[(&str, String)]) -> String {
    let re = Regex::new(r"\{\{(\w+)\}\}").unwrap();
    re.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// One recharge flow run over one exclusively-borrowed driver session.
pub struct RechargeFlow {
    config: FlowConfig,
    log: EventLog,
}

impl RechargeFlow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            log: EventLog::new(),
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Drive the funnel to the point where the gateway payment URL is
    /// known, and return it. The caller owns session release.
    pub async fn execute<D>(
        &mut self,
        driver: &mut D,
        oracle: Option<&dyn CaptchaOracle>,
        request: &RechargeRequest,
    ) -> Result<String, FlowError>
    where
        D: FormDriver + ?Sized,
    {
        let vars = request.vars();
        let delay = Duration::from_millis(self.config.step_delay_ms);

        self.step("login", &self.config.base_url.clone());
        driver.navigate(&self.config.base_url).await.map_err(|e| match e {
            DriverError::Navigation(msg) => FlowError::Login(msg),
            other => FlowError::Driver(other),
        })?;
        tokio::time::sleep(delay).await;
        driver.fill(&self.config.login.username, &request.username).await?;
        driver.fill(&self.config.login.password, &request.password).await?;
        driver.click(&self.config.login.submit).await?;
        tokio::time::sleep(delay).await;
        self.verify_login(driver).await?;

        let recharge_url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.recharge_path
        );
        self.step("recharge_page", &recharge_url);
        driver.navigate(&recharge_url).await?;
        tokio::time::sleep(delay).await;

        if let Some(captcha) = self.config.captcha.clone() {
            self.step("captcha", &captcha.image);
            let oracle = oracle.ok_or_else(|| {
                FlowError::Captcha(CaptchaError::Provider(
                    "variant requires a captcha oracle but none is configured".to_string(),
                ))
            })?;
            let image = driver.element_screenshot(&captcha.image).await?;
            let answer = oracle.solve(&image).await?;
            self.log
                .append(EventKind::CaptchaSolved, json!({ "length": answer.len() }));
            driver.fill(&render(&captcha.input, &vars), &answer).await?;
        }

        self.step("fill", &self.config.recharge_path.clone());
        if let Some(selector) = self.config.select_beneficiary.clone() {
            driver.click(&render(&selector, &vars)).await?;
        }
        for field in self.config.fields.clone() {
            driver
                .fill(&render(&field.selector, &vars), &render(&field.value, &vars))
                .await?;
        }

        for selector in self.config.confirm_selectors.clone() {
            self.step("confirm", &selector);
            driver.click(&render(&selector, &vars)).await?;
            tokio::time::sleep(delay).await;
        }

        self.capture_payment_url(driver).await
    }

    /// The log the flow wrote during `execute`.
    pub fn into_events(self) -> Vec<Event> {
        self.log.into_events()
    }

    fn step(&mut self, name: &str, detail: &str) {
        self.log.append(
            EventKind::FlowStepStarted,
            json!({ "step": name, "detail": detail }),
        );
    }

    /// Post-login check: still carrying the login marker, or off the
    /// portal entirely, means the credentials did not take.
    async fn verify_login<D>(&mut self, driver: &mut D) -> Result<(), FlowError>
    where
        D: FormDriver + ?Sized,
    {
        let location = driver.current_location().await?;
        let portal_host = Url::parse(&self.config.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let lower = location.to_lowercase();
        if !portal_host.is_empty() && !lower.contains(&portal_host.to_lowercase()) {
            return Err(FlowError::Login(format!("left the portal: {}", location)));
        }
        if lower.contains(&self.config.login.login_marker.to_lowercase()) {
            return Err(FlowError::Login(format!("still on login page: {}", location)));
        }
        Ok(())
    }

    /// Poll the location and page source until the gateway URL pattern
    /// matches. HTML-entity ampersands are decoded in source matches.
    async fn capture_payment_url<D>(&mut self, driver: &mut D) -> Result<String, FlowError>
    where
        D: FormDriver + ?Sized,
    {
        let pattern = Regex::new(&self.config.payment_url_pattern)
            .map_err(|e| FlowError::Pattern(e.to_string()))?;
        let wait = self.config.payment_url_wait_seconds;
        let deadline = Instant::now() + Duration::from_secs(wait);

        loop {
            let location = driver.current_location().await?;
            if let Some(found) = pattern.find(&location) {
                let url = found.as_str().to_string();
                self.log.append(
                    EventKind::PaymentUrlCaptured,
                    json!({ "via": "location", "url": url.as_str() }),
                );
                return Ok(url);
            }
            match driver.page_text().await {
                Ok(source) => {
                    if let Some(found) = pattern.find(&source) {
                        let url = found.as_str().replace("&amp;", "&");
                        self.log.append(
                            EventKind::PaymentUrlCaptured,
                            json!({ "via": "page_source", "url": url.as_str() }),
                        );
                        return Ok(url);
                    }
                }
                Err(DriverError::SessionLost(message)) => {
                    return Err(FlowError::Driver(DriverError::SessionLost(message)));
                }
                Err(_) => {} // transient read failure, retry
            }
            if Instant::now() >= deadline {
                return Err(FlowError::PaymentUrlNotFound(wait));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// Full recharge report: the flow stage plus the payment monitoring stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeReport {
    pub success: bool,
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

impl RechargeReport {
    fn failed(stage: &str, message: String, events: Vec<Event>) -> Self {
        Self {
            success: false,
            stage: stage.to_string(),
            message,
            payment_url: None,
            outcome: None,
            completed_at: Utc::now(),
            events,
        }
    }
}

/// Event log for one run stage, backed by a JSONL file when a log
/// directory is configured.
fn run_log(events: &EventsConfig, run_id: &uuid::Uuid, stage: &str) -> EventLog {
    let Some(dir) = &events.log_dir else {
        return EventLog::new();
    };
    let path = dir.join(format!("{}-{}.jsonl", run_id, stage));
    match EventLog::with_sink(&path) {
        Ok(log) => log,
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "falling back to in-memory event log");
            EventLog::new()
        }
    }
}

/// Run the full funnel: drive the recharge flow on one session, then
/// monitor the captured payment URL on a fresh session. One driver
/// instance is exclusively owned by one stage for its duration.
pub async fn recharge_and_monitor(
    factory: &dyn DriverFactory,
    oracle: Option<&dyn CaptchaOracle>,
    request: &RechargeRequest,
    config: &Config,
) -> RechargeReport {
    let run_id = uuid::Uuid::new_v4();

    // Stage 1: create the recharge and capture the payment URL.
    let mut driver = match factory.automation().await {
        Ok(driver) => driver,
        Err(err) => return RechargeReport::failed("driver", err.to_string(), Vec::new()),
    };
    let mut flow = RechargeFlow::new(config.flow.clone())
        .with_event_log(run_log(&config.events, &run_id, "recharge"));
    let result = flow.execute(driver.as_mut(), oracle, request).await;
    if let Err(err) = driver.release_session().await {
        tracing::warn!(error = %err, "failed to release flow session");
    }
    let mut events = flow.into_events();
    let payment_url = match result {
        Ok(url) => url,
        Err(err) => return RechargeReport::failed("recharge", err.to_string(), events),
    };

    // Stage 2: monitor the payment on its own session.
    let mut sampler = match factory.sampling().await {
        Ok(driver) => driver,
        Err(err) => {
            return RechargeReport::failed("payment_monitoring", err.to_string(), events)
        }
    };
    let monitor = PaymentMonitor::new(config.monitor.clone(), config.classifier.clone())
        .with_event_log(run_log(&config.events, &run_id, "payment"));
    let report = monitor.run(sampler.as_mut(), &payment_url).await;
    events.extend(report.events);

    let (success, stage, message) = match report.outcome.state {
        crate::classifier::PaymentState::Success => {
            (true, "completed", "recharge completed successfully".to_string())
        }
        crate::classifier::PaymentState::Failed => {
            (false, "payment_failed", "payment failed".to_string())
        }
        crate::classifier::PaymentState::Timeout => (
            false,
            "payment_timeout",
            "payment monitoring timed out".to_string(),
        ),
        state => (
            false,
            "payment_unknown",
            format!("unexpected payment state: {:?}", state),
        ),
    };

    RechargeReport {
        success,
        stage: stage.to_string(),
        message,
        payment_url: Some(payment_url),
        outcome: Some(report.outcome),
        completed_at: Utc::now(),
        events,
    }
}
