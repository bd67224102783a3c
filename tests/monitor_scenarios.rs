//! End-to-end monitoring scenarios over the public API.
//!
//! Exercises the classifier and the polling monitor together through the
//! scripted driver: redirect-parameter outcomes, the portal path
//! heuristic, page-content detection, iframe redirects, and the timeout
//! path with its bound.

use std::time::{Duration, Instant};

use paywatch::classifier::{self, ClassifierConfig, DetectionMethod, PaymentState};
use paywatch::driver::scripted::{ScriptedDriver, ScriptedFactory, ScriptedTick};
use paywatch::flow::{recharge_and_monitor, RechargeRequest};
use paywatch::monitor::{MonitorSettings, PaymentMonitor};

const GATEWAY: &str = "https://gw.ipay.example/pay/form";

fn portal_config() -> ClassifierConfig {
    ClassifierConfig {
        portal_domains: vec!["portal.example".to_string()],
        assume_success_on_portal_params: true,
    }
}

fn fast_settings(timeout_seconds: u64) -> MonitorSettings {
    MonitorSettings {
        timeout_seconds,
        poll_interval_ms: 20,
        content_sample_every: 1,
    }
}

#[test]
fn classify_success_redirect_with_details() {
    let verdict = classifier::classify_url(
        "https://pay.example/return?status=success&orderId=123&transactionId=456",
        &portal_config(),
    );
    assert_eq!(verdict.state, PaymentState::Success);
    assert_eq!(verdict.order_id.as_deref(), Some("123"));
    assert_eq!(verdict.transaction_id.as_deref(), Some("456"));
}

#[test]
fn classify_declined_redirect() {
    let verdict =
        classifier::classify_url("https://pay.example/return?status=declined", &portal_config());
    assert_eq!(verdict.state, PaymentState::Failed);
}

#[test]
fn classify_portal_fail_path() {
    let verdict = classifier::classify_url("https://portal.example/payment-fail", &portal_config());
    assert_eq!(verdict.state, PaymentState::Failed);
    assert_eq!(verdict.method, Some(DetectionMethod::PathHeuristic));
}

#[test]
fn classify_french_success_phrase() {
    let verdict = classifier::classify(
        "https://gw.ipay.example/waiting",
        Some("Paiement réussi"),
        &portal_config(),
    );
    assert_eq!(verdict.state, PaymentState::Success);
    assert_eq!(verdict.method, Some(DetectionMethod::PageContent));
}

#[tokio::test]
async fn monitor_times_out_within_one_interval() {
    let started = Instant::now();
    let mut driver = ScriptedDriver::new(vec![ScriptedTick::at(GATEWAY)]);
    let report = PaymentMonitor::new(fast_settings(1), portal_config())
        .run(&mut driver, GATEWAY)
        .await;

    assert_eq!(report.outcome.state, PaymentState::Timeout);
    assert!(report.outcome.elapsed_seconds >= 1.0);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(driver.released);
}

#[tokio::test]
async fn monitor_detects_iframe_only_redirect() {
    // The top-level URL never changes; only an embedded frame lands on the
    // portal with a success parameter.
    let mut driver = ScriptedDriver::new(vec![
        ScriptedTick::at(GATEWAY),
        ScriptedTick::at(GATEWAY)
            .with_iframes(&["https://portal.example/3ds/return?status=success&transId=88"]),
    ]);
    let report = PaymentMonitor::new(fast_settings(10), portal_config())
        .run(&mut driver, GATEWAY)
        .await;

    assert_eq!(report.outcome.state, PaymentState::Success);
    assert_eq!(
        report.outcome.detection_method,
        Some(DetectionMethod::IframeRedirect)
    );
    assert_eq!(report.outcome.transaction_id.as_deref(), Some("88"));
}

#[tokio::test]
async fn full_funnel_reaches_completed() {
    let factory = ScriptedFactory {
        automation_ticks: vec![
            ScriptedTick::at("https://portal.example/dashboard"),
            ScriptedTick::at("https://portal.example/recharge-online")
                .with_text(r#"<iframe src="https://gw.ipay.example/pay?orderId=31"></iframe>"#),
        ],
        sampling_ticks: vec![
            ScriptedTick::at("https://gw.ipay.example/pay?orderId=31"),
            ScriptedTick::at("https://portal.example/payment-success?orderId=31&status=paid"),
        ],
        screenshot: Vec::new(),
    };

    let events_dir = tempfile::tempdir().unwrap();
    let mut config = paywatch::config::Config::default();
    config.classifier = portal_config();
    config.monitor = fast_settings(5);
    config.flow.base_url = "https://portal.example/".to_string();
    config.flow.step_delay_ms = 0;
    config.flow.payment_url_wait_seconds = 2;
    config.events.log_dir = Some(events_dir.path().to_path_buf());

    let request = RechargeRequest {
        username: "27000000".to_string(),
        password: "secret".to_string(),
        beneficiary: "27000000".to_string(),
        amount: Some(20),
        voucher_code: None,
    };

    let report = recharge_and_monitor(&factory, None, &request, &config).await;
    assert!(report.success, "report: {:?}", report.message);
    assert_eq!(report.stage, "completed");
    assert_eq!(
        report.payment_url.as_deref(),
        Some("https://gw.ipay.example/pay?orderId=31")
    );
    let outcome = report.outcome.expect("monitoring outcome");
    assert_eq!(outcome.state, PaymentState::Success);
    assert_eq!(outcome.order_id.as_deref(), Some("31"));
    assert!(!report.events.is_empty());

    // One JSONL event log per stage landed in the configured directory.
    let logs: Vec<_> = std::fs::read_dir(events_dir.path()).unwrap().collect();
    assert_eq!(logs.len(), 2);
}

#[tokio::test]
async fn full_funnel_surfaces_flow_failure() {
    // Login never leaves the login page.
    let factory = ScriptedFactory {
        automation_ticks: vec![ScriptedTick::at("https://portal.example/login")],
        sampling_ticks: Vec::new(),
        screenshot: Vec::new(),
    };

    let mut config = paywatch::config::Config::default();
    config.classifier = portal_config();
    config.flow.base_url = "https://portal.example/".to_string();
    config.flow.step_delay_ms = 0;

    let request = RechargeRequest {
        username: "27000000".to_string(),
        password: "wrong".to_string(),
        beneficiary: "27000000".to_string(),
        amount: Some(20),
        voucher_code: None,
    };

    let report = recharge_and_monitor(&factory, None, &request, &config).await;
    assert!(!report.success);
    assert_eq!(report.stage, "recharge");
    assert!(report.outcome.is_none());
}
