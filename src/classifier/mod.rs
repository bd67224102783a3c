//! Redirect classification.
//!
//! Pure functions mapping a redirect URL (and optionally a page-text
//! snapshot) to a payment verdict. No I/O and no hidden state: the same
//! input always produces the same verdict, and malformed input classifies
//! as `Unknown` instead of erroring.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

/// Payment states. `Unknown` means "no signal yet, keep polling".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Success,
    Failed,
    Pending,
    Timeout,
    Error,
    Unknown,
}

/// Which signal produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    RedirectParam,
    PathHeuristic,
    PageContent,
    IframeRedirect,
    Timeout,
}

/// Status-bearing query parameters, scanned in priority order. The first
/// one present decides; later ones are ignored.
const STATUS_PARAMS: &[&str] = &["status", "paymentStatus", "result", "state", "responseCode"];

const SUCCESS_VALUES: &[&str] = &["success", "approved", "completed", "paid", "ok", "00", "0"];
const FAILURE_VALUES: &[&str] = &["failed", "declined", "rejected", "error", "cancelled"];
const PENDING_VALUES: &[&str] = &["pending", "processing"];

/// Completion phrases shown by the gateway and the portal, French and
/// English. Matched case-insensitively against the page text.
const SUCCESS_PHRASES: &[&str] = &[
    "payment successful",
    "paiement réussi",
    "opération effectuée",
    "transaction approuvée",
    "transaction approved",
];
const FAILURE_PHRASES: &[&str] = &[
    "payment failed",
    "paiement échoué",
    "transaction refusée",
    "transaction declined",
    "échec",
];

/// Classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierConfig {
    /// Portal host fragments, matched case-insensitively as substrings of
    /// the URL host (e.g. `["selfcare.example"]`). Path heuristics only
    /// apply to hosts matching one of these.
    pub portal_domains: Vec<String>,
    /// Low-confidence rule: a portal-domain redirect that carries query
    /// parameters but no recognizable status or path signal classifies as
    /// Success. This is a best-effort guess, not verified gateway
    /// behavior; disable it for gateways that round-trip parameters on
    /// failure pages too.
    pub assume_success_on_portal_params: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            portal_domains: vec!["selfcare.example".to_string()],
            assume_success_on_portal_params: true,
        }
    }
}

/// Result of classifying one URL or page snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: PaymentState,
    pub method: Option<DetectionMethod>,
    pub order_id: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Option<String>,
    /// URL or snapshot that produced this verdict.
    pub source: String,
    pub message: Option<String>,
}

impl Verdict {
    fn unknown(source: &str) -> Self {
        Self {
            state: PaymentState::Unknown,
            method: None,
            order_id: None,
            transaction_id: None,
            amount: None,
            source: source.to_string(),
            message: None,
        }
    }

    /// Anything other than `Unknown` ends the polling loop.
    pub fn is_definitive(&self) -> bool {
        self.state != PaymentState::Unknown
    }
}

/// True when the URL parses and its host matches one of the configured
/// portal domains.
pub fn is_portal_url(raw: &str, config: &ClassifierConfig) -> bool {
    Url::parse(raw).is_ok_and(|url| host_matches_portal(&url, config))
}

fn host_matches_portal(url: &Url, config: &ClassifierConfig) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    config
        .portal_domains
        .iter()
        .any(|domain| host.contains(&domain.to_lowercase()))
}

fn find_param(params: &[(String, String)], key: &str) -> Option<String> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

/// Classify a redirect URL.
///
/// Rule order: status-bearing query parameters first, then the portal path
/// heuristics, with transaction details (`orderId`, `transactionId`,
/// `amount`) extracted regardless of what decided the state.
pub fn classify_url(raw: &str, config: &ClassifierConfig) -> Verdict {
    let Ok(parsed) = Url::parse(raw) else {
        return Verdict::unknown(raw);
    };
    let params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut verdict = Verdict::unknown(raw);

    for key in STATUS_PARAMS {
        if let Some(value) = find_param(&params, key) {
            let value = value.to_lowercase();
            if SUCCESS_VALUES.contains(&value.as_str()) {
                verdict.state = PaymentState::Success;
                verdict.method = Some(DetectionMethod::RedirectParam);
                verdict.message = Some("payment completed successfully".to_string());
            } else if FAILURE_VALUES.contains(&value.as_str()) {
                verdict.state = PaymentState::Failed;
                verdict.method = Some(DetectionMethod::RedirectParam);
                verdict.message = Some(format!("payment failed: {}", value));
            } else if PENDING_VALUES.contains(&value.as_str()) {
                verdict.state = PaymentState::Pending;
                verdict.method = Some(DetectionMethod::RedirectParam);
                verdict.message = Some("payment is being processed".to_string());
            }
            // An unrecognized value stays Unknown; do not guess.
            break;
        }
    }

    if verdict.state == PaymentState::Unknown && host_matches_portal(&parsed, config) {
        let path = parsed.path().to_lowercase();
        if path.contains("success") {
            verdict.state = PaymentState::Success;
            verdict.method = Some(DetectionMethod::PathHeuristic);
            verdict.message = Some("redirected to portal success page".to_string());
        } else if path.contains("fail") || path.contains("error") {
            verdict.state = PaymentState::Failed;
            verdict.method = Some(DetectionMethod::PathHeuristic);
            verdict.message = Some("redirected to portal failure page".to_string());
        } else if !params.is_empty() && config.assume_success_on_portal_params {
            verdict.state = PaymentState::Success;
            verdict.method = Some(DetectionMethod::PathHeuristic);
            verdict.message =
                Some("portal redirect carrying parameters (low-confidence heuristic)".to_string());
        }
    }

    verdict.order_id = find_param(&params, "orderId");
    verdict.transaction_id =
        find_param(&params, "transactionId").or_else(|| find_param(&params, "transId"));
    verdict.amount = find_param(&params, "amount");

    verdict
}

/// Scan a page-text snapshot for the fixed completion phrases.
///
/// `current_url` is recorded as the verdict source; the cited phrase goes
/// into the message.
pub fn classify_page_text(text: &str, current_url: &str) -> Option<Verdict> {
    let lower = text.to_lowercase();
    for phrase in SUCCESS_PHRASES {
        if lower.contains(phrase) {
            return Some(Verdict {
                state: PaymentState::Success,
                method: Some(DetectionMethod::PageContent),
                message: Some(format!("success phrase in page content: \"{}\"", phrase)),
                ..Verdict::unknown(current_url)
            });
        }
    }
    for phrase in FAILURE_PHRASES {
        if lower.contains(phrase) {
            return Some(Verdict {
                state: PaymentState::Failed,
                method: Some(DetectionMethod::PageContent),
                message: Some(format!("failure phrase in page content: \"{}\"", phrase)),
                ..Verdict::unknown(current_url)
            });
        }
    }
    None
}

/// Classify a URL with an optional page-text snapshot: URL signals first,
/// page phrases only when the URL was not definitive. Transaction details
/// extracted from the URL are kept either way.
pub fn classify(raw: &str, page_text: Option<&str>, config: &ClassifierConfig) -> Verdict {
    let verdict = classify_url(raw, config);
    if verdict.is_definitive() {
        return verdict;
    }
    if let Some(text) = page_text {
        if let Some(mut content) = classify_page_text(text, raw) {
            content.order_id = verdict.order_id;
            content.transaction_id = verdict.transaction_id;
            content.amount = verdict.amount;
            return content;
        }
    }
    verdict
}

/// Classify embedded-frame locations ahead of the top-level URL.
///
/// Only same-portal frames are considered (cross-origin entries were
/// already dropped by the driver, anything else is skipped here), and only
/// ones not in `seen`. A definitive verdict is reported as an iframe
/// redirect.
pub fn classify_iframes(
    frames: &[String],
    seen: &HashSet<String>,
    config: &ClassifierConfig,
) -> Option<Verdict> {
    for frame_url in frames {
        if seen.contains(frame_url) || !is_portal_url(frame_url, config) {
            continue;
        }
        let mut verdict = classify_url(frame_url, config);
        if verdict.is_definitive() {
            verdict.method = Some(DetectionMethod::IframeRedirect);
            return Some(verdict);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal_config() -> ClassifierConfig {
        ClassifierConfig {
            portal_domains: vec!["portal.example".to_string()],
            assume_success_on_portal_params: true,
        }
    }

    #[test]
    fn test_success_param_with_transaction_details() {
        let verdict = classify_url(
            "https://pay.example/return?status=success&orderId=123&transactionId=456",
            &portal_config(),
        );
        assert_eq!(verdict.state, PaymentState::Success);
        assert_eq!(verdict.method, Some(DetectionMethod::RedirectParam));
        assert_eq!(verdict.order_id.as_deref(), Some("123"));
        assert_eq!(verdict.transaction_id.as_deref(), Some("456"));
    }

    #[test]
    fn test_declined_param_is_failed() {
        let verdict = classify_url("https://pay.example/return?status=declined", &portal_config());
        assert_eq!(verdict.state, PaymentState::Failed);
        assert_eq!(verdict.method, Some(DetectionMethod::RedirectParam));
    }

    #[test]
    fn test_success_vocabulary_applies_on_any_host() {
        for value in ["success", "approved", "completed", "paid", "ok", "00", "0"] {
            for host in ["gateway.test", "portal.example", "unrelated.example"] {
                let url = format!("https://{}/cb?status={}", host, value);
                let verdict = classify_url(&url, &portal_config());
                assert_eq!(verdict.state, PaymentState::Success, "value {} host {}", value, host);
            }
        }
    }

    #[test]
    fn test_failure_vocabulary() {
        for value in ["failed", "declined", "rejected", "error", "cancelled"] {
            let url = format!("https://pay.example/cb?result={}", value);
            let verdict = classify_url(&url, &portal_config());
            assert_eq!(verdict.state, PaymentState::Failed, "value {}", value);
        }
    }

    #[test]
    fn test_pending_vocabulary() {
        for value in ["pending", "processing"] {
            let url = format!("https://pay.example/cb?paymentStatus={}", value);
            let verdict = classify_url(&url, &portal_config());
            assert_eq!(verdict.state, PaymentState::Pending, "value {}", value);
        }
    }

    #[test]
    fn test_status_value_is_case_insensitive() {
        let verdict = classify_url("https://pay.example/cb?status=SUCCESS", &portal_config());
        assert_eq!(verdict.state, PaymentState::Success);
    }

    #[test]
    fn test_unrecognized_status_value_stays_unknown() {
        let verdict = classify_url("https://pay.example/cb?status=banana", &portal_config());
        assert_eq!(verdict.state, PaymentState::Unknown);
        assert!(!verdict.is_definitive());
    }

    #[test]
    fn test_first_status_param_wins() {
        // `status` outranks `result` even when `result` carries a failure.
        let verdict = classify_url(
            "https://pay.example/cb?result=failed&status=success",
            &portal_config(),
        );
        assert_eq!(verdict.state, PaymentState::Success);
    }

    #[test]
    fn test_portal_fail_path_heuristic() {
        let verdict = classify_url("https://portal.example/payment-fail", &portal_config());
        assert_eq!(verdict.state, PaymentState::Failed);
        assert_eq!(verdict.method, Some(DetectionMethod::PathHeuristic));
    }

    #[test]
    fn test_portal_success_path_heuristic() {
        let verdict = classify_url("https://portal.example/recharge-success", &portal_config());
        assert_eq!(verdict.state, PaymentState::Success);
        assert_eq!(verdict.method, Some(DetectionMethod::PathHeuristic));
    }

    #[test]
    fn test_path_heuristic_only_on_portal_domain() {
        let verdict = classify_url("https://elsewhere.example/payment-fail", &portal_config());
        assert_eq!(verdict.state, PaymentState::Unknown);
    }

    #[test]
    fn test_portal_params_heuristic_configurable() {
        let url = "https://portal.example/landing?ref=abc&orderId=99";

        let verdict = classify_url(url, &portal_config());
        assert_eq!(verdict.state, PaymentState::Success);
        assert_eq!(verdict.order_id.as_deref(), Some("99"));

        let strict = ClassifierConfig {
            assume_success_on_portal_params: false,
            ..portal_config()
        };
        let verdict = classify_url(url, &strict);
        assert_eq!(verdict.state, PaymentState::Unknown);
        // Details are still extracted even without a state decision.
        assert_eq!(verdict.order_id.as_deref(), Some("99"));
    }

    #[test]
    fn test_trans_id_alias() {
        let verdict = classify_url(
            "https://pay.example/cb?status=success&transId=777",
            &portal_config(),
        );
        assert_eq!(verdict.transaction_id.as_deref(), Some("777"));
    }

    #[test]
    fn test_malformed_urls_never_panic() {
        for raw in [
            "",
            "not a url",
            "portal.example/payment-fail",
            "http://",
            "https://pay.example/cb?%ff%fe=%00",
            "☃",
        ] {
            let verdict = classify_url(raw, &portal_config());
            assert_eq!(verdict.state, PaymentState::Unknown, "input {:?}", raw);
        }
    }

    #[test]
    fn test_classify_is_idempotent() {
        let url = "https://portal.example/cb?status=success&orderId=5";
        let first = classify(url, Some("Paiement réussi"), &portal_config());
        let second = classify(url, Some("Paiement réussi"), &portal_config());
        assert_eq!(first, second);
    }

    #[test]
    fn test_page_text_success_phrase() {
        let verdict = classify(
            "https://pay.example/form",
            Some("... Paiement réussi ..."),
            &portal_config(),
        );
        assert_eq!(verdict.state, PaymentState::Success);
        assert_eq!(verdict.method, Some(DetectionMethod::PageContent));
    }

    #[test]
    fn test_page_text_failure_phrase_case_insensitive() {
        let verdict = classify_page_text("TRANSACTION DECLINED", "https://pay.example/form");
        let verdict = verdict.unwrap();
        assert_eq!(verdict.state, PaymentState::Failed);
    }

    #[test]
    fn test_url_signal_outranks_page_text() {
        let verdict = classify(
            "https://pay.example/cb?status=declined",
            Some("payment successful"),
            &portal_config(),
        );
        assert_eq!(verdict.state, PaymentState::Failed);
    }

    #[test]
    fn test_iframe_classification() {
        let frames = vec![
            "https://acs.bank.example/3ds".to_string(),
            "https://portal.example/cb?status=success&orderId=42".to_string(),
        ];
        let seen = HashSet::new();
        let verdict = classify_iframes(&frames, &seen, &portal_config()).unwrap();
        assert_eq!(verdict.state, PaymentState::Success);
        assert_eq!(verdict.method, Some(DetectionMethod::IframeRedirect));
        assert_eq!(verdict.order_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_iframe_skips_seen_and_foreign_frames() {
        let frames = vec![
            "https://portal.example/cb?status=success".to_string(),
            "https://gateway.test/cb?status=success".to_string(),
        ];
        let seen: HashSet<String> = [frames[0].clone()].into();
        assert!(classify_iframes(&frames, &seen, &portal_config()).is_none());
    }
}
