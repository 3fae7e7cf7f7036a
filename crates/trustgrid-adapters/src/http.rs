//! HTTP advisory client.
//!
//! The remote service answers with a `{"decision", "reason"}` object, either as
//! the response body itself or as model text wrapped in a ```` ```json ````
//! fence. Any decision other than the affirmative one is read as the
//! conservative answer.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use trustgrid_core::{
    AdvisoryError, AdvisoryService, IdentityClaim, IdentityDecision, IdentityVerdict,
    PolicyDecision, PolicyQuery, PolicyVerdict,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAdvisoryConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpAdvisoryConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

/// Decision and reason as the remote service spelled them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawVerdict {
    pub decision: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone)]
pub struct HttpAdvisoryClient {
    config: HttpAdvisoryConfig,
    client: reqwest::Client,
}

impl HttpAdvisoryClient {
    pub fn new(config: HttpAdvisoryConfig) -> Result<Self, AdvisoryError> {
        if config.base_url.trim().is_empty() {
            return Err(AdvisoryError::Unavailable(
                "advisory base_url is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdvisoryError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn join(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn post_verdict<B>(
        &self,
        op: &'static str,
        body: &B,
    ) -> Result<RawVerdict, AdvisoryError>
    where
        B: serde::Serialize + ?Sized,
    {
        let url = self.join(op);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        if status != StatusCode::OK {
            return Err(AdvisoryError::Transport(format!(
                "{op} returned HTTP {status}: {}",
                truncate(&text, 200)
            )));
        }

        debug!(op, bytes = text.len(), "Advisory response received");
        parse_verdict_payload(&text)
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> AdvisoryError {
        if err.is_timeout() {
            AdvisoryError::Timeout(self.config.timeout)
        } else {
            AdvisoryError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl AdvisoryService for HttpAdvisoryClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn verify_identity(
        &self,
        claim: &IdentityClaim,
    ) -> Result<IdentityVerdict, AdvisoryError> {
        let raw = self.post_verdict("verify-identity", claim).await?;
        Ok(IdentityVerdict {
            decision: IdentityDecision::parse_lenient(&raw.decision),
            reason: raw.reason,
        })
    }

    async fn check_policy(&self, query: &PolicyQuery) -> Result<PolicyVerdict, AdvisoryError> {
        let raw = self.post_verdict("check-policy", query).await?;
        Ok(PolicyVerdict {
            decision: PolicyDecision::parse_lenient(&raw.decision),
            reason: raw.reason,
        })
    }
}

/// Extract a verdict from a response body.
///
/// Accepts a bare object, a fenced block, or an envelope whose `text` /
/// `content` string holds either of those.
pub fn parse_verdict_payload(body: &str) -> Result<RawVerdict, AdvisoryError> {
    let value: Value = serde_json::from_str(strip_fences(body))
        .map_err(|e| AdvisoryError::Malformed(format!("not json: {e}")))?;

    let value = match value {
        Value::String(inner) => serde_json::from_str(strip_fences(&inner))
            .map_err(|e| AdvisoryError::Malformed(format!("embedded text is not json: {e}")))?,
        Value::Object(ref map) if !map.contains_key("decision") => {
            let inner = ["text", "content"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .ok_or_else(|| AdvisoryError::Malformed("missing decision".to_string()))?;
            serde_json::from_str(strip_fences(inner))
                .map_err(|e| AdvisoryError::Malformed(format!("embedded text is not json: {e}")))?
        }
        other => other,
    };

    serde_json::from_value(value).map_err(|e| AdvisoryError::Malformed(e.to_string()))
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trustgrid_core::{CategoryFieldPolicy, ComplianceGateway, OrgCategory, ProfileField};

    #[test]
    fn parses_bare_object() {
        let raw = parse_verdict_payload(r#"{"decision":"APPROVED","reason":"covered"}"#).unwrap();
        assert_eq!(raw.decision, "APPROVED");
        assert_eq!(raw.reason, "covered");
    }

    #[test]
    fn parses_fenced_model_text() {
        let body = "```json\n{\"decision\": \"VIOLATION\", \"reason\": \"not in policy\"}\n```";
        let raw = parse_verdict_payload(body).unwrap();
        assert_eq!(
            PolicyDecision::parse_lenient(&raw.decision),
            PolicyDecision::Violation
        );

        let envelope = serde_json::json!({ "text": body }).to_string();
        assert_eq!(parse_verdict_payload(&envelope).unwrap(), raw);
    }

    #[test]
    fn unknown_decision_is_conservative() {
        let raw = parse_verdict_payload(r#"{"decision":"PROBABLY","reason":"?"}"#).unwrap();
        assert_eq!(
            IdentityDecision::parse_lenient(&raw.decision),
            IdentityDecision::Rejected
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_verdict_payload("I think this is fine"),
            Err(AdvisoryError::Malformed(_))
        ));
        assert!(matches!(
            parse_verdict_payload(r#"{"verdict":"APPROVED"}"#),
            Err(AdvisoryError::Malformed(_))
        ));
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let config = HttpAdvisoryConfig::new(" ", Duration::from_secs(1));
        assert!(HttpAdvisoryClient::new(config).is_err());
    }

    #[tokio::test]
    async fn unreachable_service_fails_closed() {
        let client = HttpAdvisoryClient::new(HttpAdvisoryConfig::new(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
        ))
        .unwrap();
        let gateway = ComplianceGateway::new(
            Arc::new(client),
            CategoryFieldPolicy::default(),
            Duration::from_secs(2),
        );

        let verdict = gateway
            .check_policy(&PolicyQuery {
                policy_text: "We collect email.".to_string(),
                field: ProfileField::Email,
                purpose: "receipts".to_string(),
                category: OrgCategory::ECommerce,
            })
            .await;
        assert_eq!(verdict.decision, PolicyDecision::Violation);
    }
}
