use crate::advisory::{
    AdvisoryError, AdvisoryService, IdentityClaim, IdentityVerdict, PolicyQuery, PolicyVerdict,
};
use crate::credentials::CredentialConfig;
use crate::runtime::EngineConfig;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Advisory double with fixed answers and call counters.
pub(crate) struct ScriptedAdvisory {
    identity: Result<IdentityVerdict, AdvisoryError>,
    policy: Result<PolicyVerdict, AdvisoryError>,
    delay: Option<Duration>,
    pub identity_calls: AtomicUsize,
    pub policy_calls: AtomicUsize,
}

impl ScriptedAdvisory {
    pub fn approving() -> Self {
        Self {
            identity: Ok(IdentityVerdict::verified("registry record matches")),
            policy: Ok(PolicyVerdict::approved("policy covers the field")),
            delay: None,
            identity_calls: AtomicUsize::new(0),
            policy_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            identity: Err(AdvisoryError::Transport("connection reset".to_string())),
            policy: Err(AdvisoryError::Transport("connection reset".to_string())),
            ..Self::approving()
        }
    }

    pub fn rejecting_identity(reason: &str) -> Self {
        Self {
            identity: Ok(IdentityVerdict::rejected(reason)),
            ..Self::approving()
        }
    }

    pub fn with_policy(mut self, verdict: PolicyVerdict) -> Self {
        self.policy = Ok(verdict);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AdvisoryService for ScriptedAdvisory {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn verify_identity(
        &self,
        _claim: &IdentityClaim,
    ) -> Result<IdentityVerdict, AdvisoryError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.identity.clone()
    }

    async fn check_policy(&self, _query: &PolicyQuery) -> Result<PolicyVerdict, AdvisoryError> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.policy.clone()
    }
}

/// Engine config with the cheapest bcrypt cost.
pub(crate) fn fast_config() -> EngineConfig {
    EngineConfig {
        credentials: CredentialConfig {
            hash_cost: 4,
            ..CredentialConfig::default()
        },
        advisory_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}
