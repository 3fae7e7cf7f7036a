use crate::advisory::{AdvisoryService, ComplianceGateway};
use crate::allowlist::CategoryFieldPolicy;
use crate::consent::{AccessOutcome, ConsentService, ResponseOutcome, StatusReport};
use crate::credentials::{
    CredentialConfig, CredentialService, IssuedCredential, RevokeOutcome, DEFAULT_KEY_NAME,
};
use crate::error::TrustGridError;
use crate::storage::{
    CitizenStorage, ConsentStorage, OrganizationStorage, Storage, StorageConfig,
};
use crate::types::{
    Citizen, ConditionalUpdate, ConsentDecision, ConsentRecord, ConsentStatus, Credential,
    Organization, ProfileField, ProfileUpdate,
};
use crate::verification::{VerificationOutcome, VerificationService, VerificationSubmission};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// TrustGrid runtime configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub credentials: CredentialConfig,
    /// Upper bound on each advisory call; expiry fails closed.
    pub advisory_timeout: Duration,
    pub allow_list: CategoryFieldPolicy,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialConfig::default(),
            advisory_timeout: Duration::from_secs(20),
            allow_list: CategoryFieldPolicy::default(),
            storage: StorageConfig::Memory,
        }
    }
}

/// A freshly registered organization and its one-time default key.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub organization: Organization,
    pub api_key: IssuedCredential,
}

/// Consent gateway engine. Owns no global state; everything flows from the
/// storage handle and the advisory service passed in at construction.
#[derive(Clone)]
pub struct TrustGridEngine {
    storage: Arc<dyn Storage>,
    credentials: CredentialService,
    verification: VerificationService,
    consent: ConsentService,
    advisory_name: &'static str,
}

impl TrustGridEngine {
    /// Open the configured storage backend and wire the services.
    pub async fn bootstrap(
        config: EngineConfig,
        advisory: Arc<dyn AdvisoryService>,
    ) -> Result<Self, TrustGridError> {
        let storage = config.storage.open().await?;
        Ok(Self::with_storage(config, storage, advisory))
    }

    pub fn with_storage(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        advisory: Arc<dyn AdvisoryService>,
    ) -> Self {
        let advisory_name = advisory.name();
        let gateway =
            ComplianceGateway::new(advisory, config.allow_list, config.advisory_timeout);

        info!(
            storage = storage.backend_label(),
            advisory = advisory_name,
            timeout_ms = config.advisory_timeout.as_millis() as u64,
            "TrustGrid engine ready"
        );

        Self {
            credentials: CredentialService::new(storage.clone(), config.credentials),
            verification: VerificationService::new(storage.clone(), gateway.clone()),
            consent: ConsentService::new(storage.clone(), gateway),
            storage,
            advisory_name,
        }
    }

    pub fn storage_backend(&self) -> &'static str {
        self.storage.backend_label()
    }

    pub fn advisory_backend(&self) -> &'static str {
        self.advisory_name
    }

    // organizations

    pub async fn register_organization(&self, name: &str) -> Result<Registration, TrustGridError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrustGridError::BadRequest(
                "organization name is required".to_string(),
            ));
        }

        // Hash first; the organization and its key are written together.
        let organization = Organization::new(name);
        let api_key = self
            .credentials
            .prepare(organization.id, DEFAULT_KEY_NAME)
            .await?;
        self.storage
            .insert_organization_with_credential(&organization, &api_key.credential)
            .await?;

        info!(
            organization = %organization.id,
            name = %organization.name,
            "Organization registered"
        );
        Ok(Registration {
            organization,
            api_key,
        })
    }

    pub async fn authenticate(&self, presented_key: &str) -> Result<Organization, TrustGridError> {
        self.credentials.authenticate(presented_key).await
    }

    pub async fn organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Organization, TrustGridError> {
        self.storage
            .get_organization(organization_id)
            .await?
            .ok_or_else(|| TrustGridError::not_found("organization", organization_id))
    }

    pub async fn submit_for_verification(
        &self,
        organization_id: Uuid,
        submission: VerificationSubmission,
    ) -> Result<VerificationOutcome, TrustGridError> {
        self.verification.submit(organization_id, submission).await
    }

    pub async fn update_policy(
        &self,
        organization_id: Uuid,
        policy_text: &str,
    ) -> Result<Organization, TrustGridError> {
        let policy_text = policy_text.trim();
        if policy_text.is_empty() {
            return Err(TrustGridError::BadRequest(
                "policy text must not be empty".to_string(),
            ));
        }

        match self
            .storage
            .set_policy_text(organization_id, policy_text)
            .await?
        {
            ConditionalUpdate::Applied(organization) => {
                info!(organization = %organization_id, "Privacy policy updated");
                Ok(organization)
            }
            ConditionalUpdate::Rejected(_) => Err(TrustGridError::Forbidden(
                "only verified organizations can set a privacy policy".to_string(),
            )),
            ConditionalUpdate::Missing => {
                Err(TrustGridError::not_found("organization", organization_id))
            }
        }
    }

    pub async fn organization_log(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<ConsentRecord>, TrustGridError> {
        self.storage
            .list_consents_for_organization(organization_id)
            .await
    }

    // credentials

    pub async fn issue_credential(
        &self,
        organization_id: Uuid,
        display_name: &str,
    ) -> Result<IssuedCredential, TrustGridError> {
        self.credentials.issue(organization_id, display_name).await
    }

    pub async fn revoke_credential(
        &self,
        credential_id: Uuid,
        organization_id: Uuid,
    ) -> Result<RevokeOutcome, TrustGridError> {
        self.credentials.revoke(credential_id, organization_id).await
    }

    pub async fn list_credentials(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<Credential>, TrustGridError> {
        self.credentials.list(organization_id).await
    }

    // citizens

    pub async fn register_citizen(
        &self,
        username: &str,
        profile: BTreeMap<ProfileField, String>,
        manual_approval_required: bool,
    ) -> Result<Citizen, TrustGridError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(TrustGridError::BadRequest(
                "username is required".to_string(),
            ));
        }

        let citizen = Citizen {
            username: username.to_string(),
            profile: profile
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .collect(),
            manual_approval_required,
            created_at: Utc::now(),
        };
        self.storage.insert_citizen(&citizen).await?;

        info!(citizen = %citizen.username, "Citizen registered");
        Ok(citizen)
    }

    pub async fn citizen(&self, username: &str) -> Result<Citizen, TrustGridError> {
        self.storage
            .get_citizen(username)
            .await?
            .ok_or_else(|| TrustGridError::not_found("citizen", username))
    }

    pub async fn update_citizen_profile(
        &self,
        username: &str,
        update: ProfileUpdate,
    ) -> Result<Citizen, TrustGridError> {
        let citizen = self
            .storage
            .update_citizen(username, &update)
            .await?
            .ok_or_else(|| TrustGridError::not_found("citizen", username))?;

        info!(
            citizen = %username,
            fields = update.fields.len(),
            manual_approval_required = citizen.manual_approval_required,
            "Citizen profile updated"
        );
        Ok(citizen)
    }

    pub async fn pending_requests(
        &self,
        username: &str,
    ) -> Result<Vec<ConsentRecord>, TrustGridError> {
        self.citizen(username).await?;
        self.storage
            .list_consents_for_citizen(username, Some(ConsentStatus::Pending))
            .await
    }

    pub async fn citizen_log(&self, username: &str) -> Result<Vec<ConsentRecord>, TrustGridError> {
        self.citizen(username).await?;
        self.storage.list_consents_for_citizen(username, None).await
    }

    // consent

    pub async fn request_access(
        &self,
        organization: &Organization,
        citizen_username: &str,
        field_name: &str,
        purpose: &str,
    ) -> Result<AccessOutcome, TrustGridError> {
        self.consent
            .request_access(organization, citizen_username, field_name, purpose)
            .await
    }

    pub async fn respond(
        &self,
        request_id: Uuid,
        decision: ConsentDecision,
    ) -> Result<ResponseOutcome, TrustGridError> {
        self.consent.respond(request_id, decision).await
    }

    pub async fn get_status(
        &self,
        request_id: Uuid,
        organization_id: Uuid,
    ) -> Result<StatusReport, TrustGridError> {
        self.consent.get_status(request_id, organization_id).await
    }
}
