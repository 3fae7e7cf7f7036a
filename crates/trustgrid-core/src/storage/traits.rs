//! Storage trait definitions

use crate::error::TrustGridError;
use crate::types::{
    Citizen, ConditionalUpdate, ConsentRecord, ConsentStatus, Credential, Organization,
    ProfileUpdate, VerificationUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, TrustGridError>;

/// Combined storage trait
#[async_trait]
pub trait Storage:
    OrganizationStorage + CredentialStorage + CitizenStorage + ConsentStorage + Send + Sync
{
    /// Backend label for logs and health output
    fn backend_label(&self) -> &'static str;
}

/// Storage for organizations
#[async_trait]
pub trait OrganizationStorage: Send + Sync {
    /// Insert a new organization. A taken name is `Conflict`.
    async fn insert_organization(&self, organization: &Organization) -> StorageResult<()>;

    /// Insert a new organization together with its first credential. Either
    /// both rows land or neither does.
    async fn insert_organization_with_credential(
        &self,
        organization: &Organization,
        credential: &Credential,
    ) -> StorageResult<()>;

    async fn get_organization(&self, id: Uuid) -> StorageResult<Option<Organization>>;

    async fn find_organization_by_name(&self, name: &str) -> StorageResult<Option<Organization>>;

    /// Write the submitted profile and the verdict in one step, unless the
    /// organization is already verified.
    async fn apply_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> StorageResult<ConditionalUpdate<Organization>>;

    /// Set policy text, only while the organization is verified.
    async fn set_policy_text(
        &self,
        id: Uuid,
        policy_text: &str,
    ) -> StorageResult<ConditionalUpdate<Organization>>;
}

/// Storage for API credentials
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    async fn insert_credential(&self, credential: &Credential) -> StorageResult<()>;

    async fn get_credential(&self, id: Uuid) -> StorageResult<Option<Credential>>;

    /// All credentials currently in `active` status
    async fn list_active_credentials(&self) -> StorageResult<Vec<Credential>>;

    /// Newest first
    async fn list_credentials_for_organization(
        &self,
        organization_id: Uuid,
    ) -> StorageResult<Vec<Credential>>;

    /// Revoke if the credential belongs to `organization_id` and is active.
    /// An already revoked credential comes back as `Rejected`.
    async fn revoke_credential(
        &self,
        id: Uuid,
        organization_id: Uuid,
    ) -> StorageResult<ConditionalUpdate<Credential>>;
}

/// Storage for citizens
#[async_trait]
pub trait CitizenStorage: Send + Sync {
    /// Insert a new citizen. A taken username is `Conflict`.
    async fn insert_citizen(&self, citizen: &Citizen) -> StorageResult<()>;

    async fn get_citizen(&self, username: &str) -> StorageResult<Option<Citizen>>;

    /// Merge a profile update; `None` when the citizen does not exist.
    async fn update_citizen(
        &self,
        username: &str,
        update: &ProfileUpdate,
    ) -> StorageResult<Option<Citizen>>;
}

/// Storage for consent records
#[async_trait]
pub trait ConsentStorage: Send + Sync {
    async fn insert_consent(&self, record: &ConsentRecord) -> StorageResult<()>;

    async fn get_consent(&self, id: Uuid) -> StorageResult<Option<ConsentRecord>>;

    /// Move a record out of `pending`. Any other current status is `Rejected`.
    async fn resolve_consent(
        &self,
        id: Uuid,
        status: ConsentStatus,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<ConditionalUpdate<ConsentRecord>>;

    /// Newest first, optionally filtered by status
    async fn list_consents_for_citizen(
        &self,
        username: &str,
        status: Option<ConsentStatus>,
    ) -> StorageResult<Vec<ConsentRecord>>;

    /// Newest first
    async fn list_consents_for_organization(
        &self,
        organization_id: Uuid,
    ) -> StorageResult<Vec<ConsentRecord>>;
}
