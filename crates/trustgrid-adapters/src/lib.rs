//! Advisory service adapters for TrustGrid.

#![deny(unsafe_code)]

mod http;

pub use http::{parse_verdict_payload, HttpAdvisoryClient, HttpAdvisoryConfig, RawVerdict};

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use trustgrid_core::{
    AdvisoryError, AdvisoryService, IdentityClaim, IdentityVerdict, PolicyQuery, PolicyVerdict,
};

/// Deterministic advisor returning fixed verdicts.
#[derive(Debug, Clone)]
pub struct StaticAdvisory {
    identity: IdentityVerdict,
    policy: PolicyVerdict,
}

impl StaticAdvisory {
    pub fn new(identity: IdentityVerdict, policy: PolicyVerdict) -> Self {
        Self { identity, policy }
    }

    pub fn approving() -> Self {
        Self::new(
            IdentityVerdict::verified("registry record matches certificate"),
            PolicyVerdict::approved("policy covers the requested field and purpose"),
        )
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            IdentityVerdict::rejected(reason.clone()),
            PolicyVerdict::violation(reason),
        )
    }
}

impl Default for StaticAdvisory {
    fn default() -> Self {
        Self::approving()
    }
}

#[async_trait]
impl AdvisoryService for StaticAdvisory {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn verify_identity(
        &self,
        _claim: &IdentityClaim,
    ) -> Result<IdentityVerdict, AdvisoryError> {
        Ok(self.identity.clone())
    }

    async fn check_policy(&self, _query: &PolicyQuery) -> Result<PolicyVerdict, AdvisoryError> {
        Ok(self.policy.clone())
    }
}

/// Deterministic failing advisor useful for fail-closed testing.
#[derive(Debug, Clone)]
pub struct FailingAdvisory {
    error: AdvisoryError,
}

impl FailingAdvisory {
    pub fn new(error: AdvisoryError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl AdvisoryService for FailingAdvisory {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn verify_identity(
        &self,
        _claim: &IdentityClaim,
    ) -> Result<IdentityVerdict, AdvisoryError> {
        Err(self.error.clone())
    }

    async fn check_policy(&self, _query: &PolicyQuery) -> Result<PolicyVerdict, AdvisoryError> {
        Err(self.error.clone())
    }
}

/// Wraps another advisor and delays every answer.
pub struct SlowAdvisory<A> {
    inner: A,
    delay: Duration,
}

impl<A: AdvisoryService> SlowAdvisory<A> {
    pub fn new(inner: A, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<A: AdvisoryService> AdvisoryService for SlowAdvisory<A> {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn verify_identity(
        &self,
        claim: &IdentityClaim,
    ) -> Result<IdentityVerdict, AdvisoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.verify_identity(claim).await
    }

    async fn check_policy(&self, query: &PolicyQuery) -> Result<PolicyVerdict, AdvisoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.check_policy(query).await
    }
}

const STOP_WORDS: &[&str] = &[
    "about", "also", "data", "for", "from", "into", "other", "purpose", "that", "their", "them",
    "this", "used", "user", "users", "will", "with", "your",
];

/// Offline policy reader.
///
/// Approves only when the policy text names the field and shares at least one
/// significant word with the stated purpose. It cannot verify identities, so
/// identity calls report `Unavailable` and fail closed upstream.
#[derive(Debug, Clone, Default)]
pub struct KeywordPolicyAdvisory;

impl KeywordPolicyAdvisory {
    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    fn significant_words(text: &str) -> BTreeSet<String> {
        Self::tokens(text)
            .into_iter()
            .filter(|word| word.len() >= 3 && !STOP_WORDS.contains(&word.as_str()))
            .collect()
    }

    /// Whole-word match of `phrase` inside `tokens`.
    fn mentions(tokens: &[String], phrase: &str) -> bool {
        let phrase = Self::tokens(phrase);
        !phrase.is_empty() && tokens.windows(phrase.len()).any(|window| window == phrase)
    }

    pub fn evaluate(query: &PolicyQuery) -> PolicyVerdict {
        let policy = Self::tokens(&query.policy_text);
        let field = query.field;
        let mentions_field =
            Self::mentions(&policy, field.as_str()) || Self::mentions(&policy, field.label());
        if !mentions_field {
            return PolicyVerdict::violation(format!(
                "privacy policy does not mention collecting {}",
                field.label()
            ));
        }

        let policy_words = Self::significant_words(&query.policy_text);
        let shared = Self::significant_words(&query.purpose)
            .into_iter()
            .find(|word| policy_words.contains(word));
        match shared {
            Some(word) => PolicyVerdict::approved(format!(
                "policy covers {} for '{word}'",
                field.label()
            )),
            None => PolicyVerdict::violation(format!(
                "stated purpose '{}' is not covered by the privacy policy",
                query.purpose
            )),
        }
    }
}

#[async_trait]
impl AdvisoryService for KeywordPolicyAdvisory {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn verify_identity(
        &self,
        _claim: &IdentityClaim,
    ) -> Result<IdentityVerdict, AdvisoryError> {
        Err(AdvisoryError::Unavailable(
            "no identity verification backend configured".to_string(),
        ))
    }

    async fn check_policy(&self, query: &PolicyQuery) -> Result<PolicyVerdict, AdvisoryError> {
        Ok(Self::evaluate(query))
    }
}
