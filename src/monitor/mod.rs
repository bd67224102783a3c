//! Payment-completion monitoring.
//!
//! Drives a time-bounded polling loop over one browser session: sample the
//! current location every tick (and, less often, the page text and iframe
//! locations), feed candidates to the classifier, and return a terminal
//! [`Outcome`] on the first definitive verdict or at the timeout. Per-tick
//! failures are logged and survived; only a failed initial navigation or a
//! lost session aborts the run. The session is released on every exit
//! path.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::classifier::{self, ClassifierConfig, DetectionMethod, PaymentState, Verdict};
use crate::driver::{BrowserDriver, DriverError};
use crate::events::{Event, EventKind, EventLog};

/// Terminal result of one monitoring session. Constructed once, never
/// mutated, and serializable to a flat JSON record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub state: PaymentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_method: Option<DetectionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    pub source_url: String,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    fn from_verdict(verdict: Verdict, elapsed_seconds: f64) -> Self {
        Self {
            state: verdict.state,
            detection_method: verdict.method,
            order_id: verdict.order_id,
            transaction_id: verdict.transaction_id,
            amount: verdict.amount,
            source_url: verdict.source,
            elapsed_seconds,
            message: verdict.message,
        }
    }

    fn error(source_url: &str, elapsed_seconds: f64, message: String) -> Self {
        Self {
            state: PaymentState::Error,
            detection_method: None,
            order_id: None,
            transaction_id: None,
            amount: None,
            source_url: source_url.to_string(),
            elapsed_seconds,
            message: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == PaymentState::Success
    }
}

/// One polling observation. Consumed by the classifier, then discarded;
/// only the derived event-log entries persist.
#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub page_text: Option<String>,
    pub iframe_urls: Option<Vec<String>>,
}

/// Monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    /// Max wall-clock seconds to wait for a definitive outcome.
    pub timeout_seconds: u64,
    /// Polling cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Page text and iframe locations are read every this-many ticks; full
    /// content reads are expensive compared to a location read.
    pub content_sample_every: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            poll_interval_ms: 1000,
            content_sample_every: 10,
        }
    }
}

/// Outcome plus the full event log for diagnosis.
#[derive(Debug)]
pub struct MonitorReport {
    pub outcome: Outcome,
    pub events: Vec<Event>,
}

/// One monitoring session over one exclusively-borrowed driver.
pub struct PaymentMonitor {
    settings: MonitorSettings,
    classifier: ClassifierConfig,
    log: EventLog,
    cancel: CancellationToken,
}

impl PaymentMonitor {
    pub fn new(settings: MonitorSettings, classifier: ClassifierConfig) -> Self {
        Self {
            settings,
            classifier,
            log: EventLog::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Record events into `log` (e.g. one backed by a JSONL sink) instead
    /// of a fresh in-memory log.
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Cooperative cancellation: the loop stops at the next tick boundary
    /// when `token` fires, still releasing the session.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one monitoring session against `start_url`.
    ///
    /// Always returns a well-formed outcome — timeout and ambiguity are
    /// states, not errors — and always releases the driver session,
    /// whatever path the loop exits on.
    pub async fn run<D>(mut self, driver: &mut D, start_url: &str) -> MonitorReport
    where
        D: BrowserDriver + ?Sized,
    {
        let started = Instant::now();
        let outcome = self.drive(driver, start_url, started).await;
        match driver.release_session().await {
            Ok(()) => self.log.append(EventKind::SessionReleased, json!({})),
            Err(err) => self
                .log
                .append(EventKind::SessionReleased, json!({ "error": err.to_string() })),
        }
        tracing::info!(
            state = ?outcome.state,
            elapsed_seconds = outcome.elapsed_seconds,
            "monitoring finished"
        );
        MonitorReport {
            outcome,
            events: self.log.into_events(),
        }
    }

    async fn drive<D>(&mut self, driver: &mut D, start_url: &str, started: Instant) -> Outcome
    where
        D: BrowserDriver + ?Sized,
    {
        let timeout = Duration::from_secs(self.settings.timeout_seconds);
        let interval = Duration::from_millis(self.settings.poll_interval_ms);

        self.log.append(
            EventKind::MonitorStarted,
            json!({
                "startUrl": start_url,
                "timeoutSeconds": self.settings.timeout_seconds,
            }),
        );

        // Starting -> Polling requires the initial load to succeed.
        if let Err(err) = driver.navigate(start_url).await {
            self.log
                .append(EventKind::NavigationFailed, json!({ "error": err.to_string() }));
            return Outcome::error(start_url, started.elapsed().as_secs_f64(), err.to_string());
        }
        self.log.append(EventKind::PageLoaded, json!({ "url": start_url }));

        let mut seen: HashSet<String> = HashSet::from([start_url.to_string()]);
        let mut last_url = start_url.to_string();
        let mut tick: u64 = 0;
        let cancel = self.cancel.clone();

        loop {
            if started.elapsed() >= timeout {
                return self.timed_out(driver, &last_url, started).await;
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    let elapsed = started.elapsed().as_secs_f64();
                    self.log
                        .append(EventKind::Cancelled, json!({ "elapsedSeconds": elapsed }));
                    return Outcome::error(&last_url, elapsed, "monitoring cancelled".to_string());
                }
                () = tokio::time::sleep(interval) => {}
            }
            tick += 1;

            let url = match driver.current_location().await {
                Ok(url) => url,
                Err(DriverError::SessionLost(message)) => {
                    self.log
                        .append(EventKind::SessionLost, json!({ "error": message.as_str() }));
                    return Outcome::error(
                        &last_url,
                        started.elapsed().as_secs_f64(),
                        format!("browser session lost: {}", message),
                    );
                }
                Err(err) => {
                    self.log.append(
                        EventKind::SampleError,
                        json!({ "error": err.to_string(), "tick": tick }),
                    );
                    continue;
                }
            };

            // Full content reads are sampled less often than the location.
            let read_content = self.settings.content_sample_every > 0
                && tick % u64::from(self.settings.content_sample_every) == 0;
            let (page_text, iframe_urls) = if read_content {
                let text = match driver.page_text().await {
                    Ok(text) => Some(text),
                    Err(err) => {
                        self.log.append(
                            EventKind::SampleError,
                            json!({ "error": err.to_string(), "tick": tick }),
                        );
                        None
                    }
                };
                let frames = match driver.iframe_locations().await {
                    Ok(frames) => Some(frames),
                    Err(err) => {
                        self.log.append(
                            EventKind::SampleError,
                            json!({ "error": err.to_string(), "tick": tick }),
                        );
                        None
                    }
                };
                (text, frames)
            } else {
                (None, None)
            };

            let sample = Sample {
                timestamp: Utc::now(),
                url,
                page_text,
                iframe_urls,
            };

            if tick % 10 == 0 {
                self.log.append(
                    EventKind::PollTick,
                    json!({
                        "tick": tick,
                        "observedAt": sample.timestamp,
                        "elapsedSeconds": started.elapsed().as_secs_f64(),
                        "url": sample.url.as_str(),
                        "seenUrls": seen.len(),
                    }),
                );
            }

            if let Some(verdict) = self.evaluate(&sample, &mut seen, &mut last_url) {
                let elapsed = started.elapsed().as_secs_f64();
                self.log.append(
                    EventKind::Classified,
                    json!({
                        "state": verdict.state,
                        "method": verdict.method,
                        "sourceUrl": verdict.source.as_str(),
                        "elapsedSeconds": elapsed,
                    }),
                );
                return Outcome::from_verdict(verdict, elapsed);
            }
        }
    }

    /// Feed one sample through the classifier: portal iframes first (3-D
    /// Secure flows often redirect only an embedded frame), then a changed
    /// top-level location, then the page phrase check.
    fn evaluate(
        &mut self,
        sample: &Sample,
        seen: &mut HashSet<String>,
        last_url: &mut String,
    ) -> Option<Verdict> {
        if let Some(frames) = &sample.iframe_urls {
            let verdict = classifier::classify_iframes(frames, seen, &self.classifier);
            for frame in frames {
                if classifier::is_portal_url(frame, &self.classifier) {
                    seen.insert(frame.clone());
                }
            }
            if let Some(verdict) = verdict {
                self.log.append(
                    EventKind::IframeRedirectDetected,
                    json!({ "iframeUrl": verdict.source.as_str() }),
                );
                return Some(verdict);
            }
        }

        if sample.url != *last_url && !seen.contains(&sample.url) {
            self.log.append(
                EventKind::RedirectDetected,
                json!({ "from": last_url.as_str(), "to": sample.url.as_str() }),
            );
            seen.insert(sample.url.clone());
            let verdict = classifier::classify_url(&sample.url, &self.classifier);
            *last_url = sample.url.clone();
            if verdict.is_definitive() {
                return Some(verdict);
            }
        }

        // Completion pages that never change the top-level URL.
        if let Some(text) = &sample.page_text {
            if let Some(verdict) = classifier::classify_page_text(text, &sample.url) {
                self.log.append(
                    EventKind::ContentMatchDetected,
                    json!({ "url": sample.url.as_str(), "message": verdict.message.as_deref() }),
                );
                return Some(verdict);
            }
        }

        None
    }

    /// One last classification of wherever the session ended up; gateways
    /// sometimes land on a recognizable terminal page right at the
    /// boundary.
    async fn timed_out<D>(&mut self, driver: &mut D, last_url: &str, started: Instant) -> Outcome
    where
        D: BrowserDriver + ?Sized,
    {
        let elapsed = started.elapsed().as_secs_f64();
        if let Ok(url) = driver.current_location().await {
            let verdict = classifier::classify_url(&url, &self.classifier);
            if verdict.is_definitive() {
                self.log
                    .append(EventKind::LateClassification, json!({ "url": url }));
                return Outcome::from_verdict(verdict, elapsed);
            }
        }
        self.log.append(
            EventKind::TimedOut,
            json!({
                "timeoutSeconds": self.settings.timeout_seconds,
                "lastUrl": last_url,
            }),
        );
        Outcome {
            state: PaymentState::Timeout,
            detection_method: Some(DetectionMethod::Timeout),
            order_id: None,
            transaction_id: None,
            amount: None,
            source_url: last_url.to_string(),
            elapsed_seconds: elapsed,
            message: Some(format!(
                "no payment completion detected within {}s",
                self.settings.timeout_seconds
            )),
        }
    }
}

/// Monitor `start_url` with default settings; see [`PaymentMonitor`] for
/// the configurable version.
pub async fn monitor<D>(driver: &mut D, start_url: &str, timeout_seconds: u64) -> Outcome
where
    D: BrowserDriver + ?Sized,
{
    let settings = MonitorSettings {
        timeout_seconds,
        ..MonitorSettings::default()
    };
    PaymentMonitor::new(settings, ClassifierConfig::default())
        .run(driver, start_url)
        .await
        .outcome
}
