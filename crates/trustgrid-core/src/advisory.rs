use crate::allowlist::CategoryFieldPolicy;
use crate::types::{CertificateRef, OrgCategory, ProfileField};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityDecision {
    Verified,
    Rejected,
}

impl IdentityDecision {
    /// Anything other than an exact `VERIFIED` is a rejection.
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("VERIFIED") {
            Self::Verified
        } else {
            Self::Rejected
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    Approved,
    Violation,
}

impl PolicyDecision {
    /// Anything other than an exact `APPROVED` is a violation.
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("APPROVED") {
            Self::Approved
        } else {
            Self::Violation
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityVerdict {
    pub decision: IdentityDecision,
    pub reason: String,
}

impl IdentityVerdict {
    pub fn verified(reason: impl Into<String>) -> Self {
        Self {
            decision: IdentityDecision::Verified,
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            decision: IdentityDecision::Rejected,
            reason: reason.into(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.decision == IdentityDecision::Verified
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub decision: PolicyDecision,
    pub reason: String,
}

impl PolicyVerdict {
    pub fn approved(reason: impl Into<String>) -> Self {
        Self {
            decision: PolicyDecision::Approved,
            reason: reason.into(),
        }
    }

    pub fn violation(reason: impl Into<String>) -> Self {
        Self {
            decision: PolicyDecision::Violation,
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.decision == PolicyDecision::Approved
    }
}

/// Identity fields an organization claims when submitting for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub claimed_name: String,
    pub registration_number: String,
    pub certificate: CertificateRef,
}

/// One data-access request as presented to the policy advisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyQuery {
    pub policy_text: String,
    pub field: ProfileField,
    pub purpose: String,
    pub category: OrgCategory,
}

/// Failures of an advisory backend. Never surfaced past [`ComplianceGateway`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdvisoryError {
    #[error("advisory call timed out after {0:?}")]
    Timeout(Duration),

    #[error("advisory transport error: {0}")]
    Transport(String),

    #[error("malformed advisory response: {0}")]
    Malformed(String),

    #[error("advisory service unavailable: {0}")]
    Unavailable(String),
}

/// External identity-verification and policy-compliance advisor.
///
/// Implementations may be non-deterministic; callers never cache or assume
/// repeatable verdicts.
#[async_trait]
pub trait AdvisoryService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn verify_identity(&self, claim: &IdentityClaim)
        -> Result<IdentityVerdict, AdvisoryError>;

    async fn check_policy(&self, query: &PolicyQuery) -> Result<PolicyVerdict, AdvisoryError>;
}

/// Fail-closed boundary around an [`AdvisoryService`].
///
/// Both operations are infallible from the caller's point of view: timeouts,
/// transport errors and malformed answers become `REJECTED` / `VIOLATION`.
/// Advisory calls are never retried.
#[derive(Clone)]
pub struct ComplianceGateway {
    advisory: Arc<dyn AdvisoryService>,
    allow_list: CategoryFieldPolicy,
    timeout: Duration,
}

impl ComplianceGateway {
    pub fn new(
        advisory: Arc<dyn AdvisoryService>,
        allow_list: CategoryFieldPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            advisory,
            allow_list,
            timeout,
        }
    }

    pub async fn verify_identity(&self, claim: &IdentityClaim) -> IdentityVerdict {
        let outcome =
            match tokio::time::timeout(self.timeout, self.advisory.verify_identity(claim)).await {
                Ok(result) => result,
                Err(_) => Err(AdvisoryError::Timeout(self.timeout)),
            };

        match outcome {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    advisory = self.advisory.name(),
                    error = %err,
                    "Identity verification failed closed"
                );
                IdentityVerdict::rejected(format!(
                    "identity verification unavailable ({err}); submission rejected"
                ))
            }
        }
    }

    pub async fn check_policy(&self, query: &PolicyQuery) -> PolicyVerdict {
        if let Err(reason) = self.allow_list.check(query.category, query.field) {
            warn!(
                category = %query.category,
                field = %query.field,
                "Allow-list denied field"
            );
            return PolicyVerdict::violation(reason);
        }

        let outcome =
            match tokio::time::timeout(self.timeout, self.advisory.check_policy(query)).await {
                Ok(result) => result,
                Err(_) => Err(AdvisoryError::Timeout(self.timeout)),
            };

        match outcome {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    advisory = self.advisory.name(),
                    error = %err,
                    "Policy check failed closed"
                );
                PolicyVerdict::violation(format!(
                    "compliance check unavailable ({err}); request blocked"
                ))
            }
        }
    }
}

impl std::fmt::Debug for ComplianceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceGateway")
            .field("advisory", &self.advisory.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
