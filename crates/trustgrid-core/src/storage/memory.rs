//! In-memory storage implementation

use super::traits::*;
use crate::error::TrustGridError;
use crate::types::{
    Citizen, ConditionalUpdate, ConsentRecord, ConsentStatus, Credential, CredentialStatus,
    Organization, ProfileUpdate, VerificationStatus, VerificationUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory storage for development and testing
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    organizations: Arc<RwLock<HashMap<Uuid, Organization>>>,
    credentials: Arc<RwLock<HashMap<Uuid, Credential>>>,
    citizens: Arc<RwLock<HashMap<String, Citizen>>>,
    consents: Arc<RwLock<HashMap<Uuid, ConsentRecord>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_name_free(
    organizations: &HashMap<Uuid, Organization>,
    organization: &Organization,
) -> StorageResult<()> {
    if organizations
        .values()
        .any(|existing| existing.name == organization.name)
    {
        return Err(TrustGridError::Conflict(format!(
            "organization name '{}' is already registered",
            organization.name
        )));
    }
    Ok(())
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            organizations: Arc::new(RwLock::new(HashMap::new())),
            credentials: Arc::new(RwLock::new(HashMap::new())),
            citizens: Arc::new(RwLock::new(HashMap::new())),
            consents: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items
}

#[async_trait]
impl OrganizationStorage for MemoryStorage {
    async fn insert_organization(&self, organization: &Organization) -> StorageResult<()> {
        let mut organizations = self.organizations.write().await;
        ensure_name_free(&organizations, organization)?;
        organizations.insert(organization.id, organization.clone());
        Ok(())
    }

    async fn insert_organization_with_credential(
        &self,
        organization: &Organization,
        credential: &Credential,
    ) -> StorageResult<()> {
        // Lock order: organizations, then credentials.
        let mut organizations = self.organizations.write().await;
        let mut credentials = self.credentials.write().await;
        ensure_name_free(&organizations, organization)?;
        if credential.organization_id != organization.id {
            return Err(TrustGridError::Internal(format!(
                "credential {} does not belong to organization {}",
                credential.id, organization.id
            )));
        }
        if credentials.contains_key(&credential.id) {
            return Err(TrustGridError::Conflict(format!(
                "credential {} already exists",
                credential.id
            )));
        }
        organizations.insert(organization.id, organization.clone());
        credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn get_organization(&self, id: Uuid) -> StorageResult<Option<Organization>> {
        let organizations = self.organizations.read().await;
        Ok(organizations.get(&id).cloned())
    }

    async fn find_organization_by_name(&self, name: &str) -> StorageResult<Option<Organization>> {
        let organizations = self.organizations.read().await;
        Ok(organizations
            .values()
            .find(|organization| organization.name == name)
            .cloned())
    }

    async fn apply_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> StorageResult<ConditionalUpdate<Organization>> {
        let mut organizations = self.organizations.write().await;
        if organizations
            .values()
            .any(|other| other.id != id && other.name == update.name)
        {
            return Err(TrustGridError::Conflict(format!(
                "organization name '{}' is already registered",
                update.name
            )));
        }

        let Some(organization) = organizations.get_mut(&id) else {
            return Ok(ConditionalUpdate::Missing);
        };
        if organization.verification_status == VerificationStatus::Verified {
            return Ok(ConditionalUpdate::Rejected(organization.clone()));
        }

        organization.name = update.name.clone();
        organization.category = update.category;
        organization.registration = Some(update.registration.clone());
        organization.certificate = Some(update.certificate.clone());
        organization.verification_status = update.status;
        Ok(ConditionalUpdate::Applied(organization.clone()))
    }

    async fn set_policy_text(
        &self,
        id: Uuid,
        policy_text: &str,
    ) -> StorageResult<ConditionalUpdate<Organization>> {
        let mut organizations = self.organizations.write().await;
        let Some(organization) = organizations.get_mut(&id) else {
            return Ok(ConditionalUpdate::Missing);
        };
        if !organization.is_verified() {
            return Ok(ConditionalUpdate::Rejected(organization.clone()));
        }
        organization.policy_text = Some(policy_text.to_string());
        Ok(ConditionalUpdate::Applied(organization.clone()))
    }
}

#[async_trait]
impl CredentialStorage for MemoryStorage {
    async fn insert_credential(&self, credential: &Credential) -> StorageResult<()> {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn get_credential(&self, id: Uuid) -> StorageResult<Option<Credential>> {
        let credentials = self.credentials.read().await;
        Ok(credentials.get(&id).cloned())
    }

    async fn list_active_credentials(&self) -> StorageResult<Vec<Credential>> {
        let credentials = self.credentials.read().await;
        Ok(credentials
            .values()
            .filter(|credential| credential.is_active())
            .cloned()
            .collect())
    }

    async fn list_credentials_for_organization(
        &self,
        organization_id: Uuid,
    ) -> StorageResult<Vec<Credential>> {
        let credentials = self.credentials.read().await;
        let owned = credentials
            .values()
            .filter(|credential| credential.organization_id == organization_id)
            .cloned()
            .collect();
        Ok(newest_first(owned, |credential| credential.created_at))
    }

    async fn revoke_credential(
        &self,
        id: Uuid,
        organization_id: Uuid,
    ) -> StorageResult<ConditionalUpdate<Credential>> {
        let mut credentials = self.credentials.write().await;
        let Some(credential) = credentials
            .get_mut(&id)
            .filter(|credential| credential.organization_id == organization_id)
        else {
            return Ok(ConditionalUpdate::Missing);
        };
        if credential.status == CredentialStatus::Revoked {
            return Ok(ConditionalUpdate::Rejected(credential.clone()));
        }
        credential.status = CredentialStatus::Revoked;
        Ok(ConditionalUpdate::Applied(credential.clone()))
    }
}

#[async_trait]
impl CitizenStorage for MemoryStorage {
    async fn insert_citizen(&self, citizen: &Citizen) -> StorageResult<()> {
        let mut citizens = self.citizens.write().await;
        if citizens.contains_key(&citizen.username) {
            return Err(TrustGridError::Conflict(format!(
                "username '{}' is already registered",
                citizen.username
            )));
        }
        citizens.insert(citizen.username.clone(), citizen.clone());
        Ok(())
    }

    async fn get_citizen(&self, username: &str) -> StorageResult<Option<Citizen>> {
        let citizens = self.citizens.read().await;
        Ok(citizens.get(username).cloned())
    }

    async fn update_citizen(
        &self,
        username: &str,
        update: &ProfileUpdate,
    ) -> StorageResult<Option<Citizen>> {
        let mut citizens = self.citizens.write().await;
        Ok(citizens.get_mut(username).map(|citizen| {
            update.apply_to(citizen);
            citizen.clone()
        }))
    }
}

#[async_trait]
impl ConsentStorage for MemoryStorage {
    async fn insert_consent(&self, record: &ConsentRecord) -> StorageResult<()> {
        let mut consents = self.consents.write().await;
        consents.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_consent(&self, id: Uuid) -> StorageResult<Option<ConsentRecord>> {
        let consents = self.consents.read().await;
        Ok(consents.get(&id).cloned())
    }

    async fn resolve_consent(
        &self,
        id: Uuid,
        status: ConsentStatus,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<ConditionalUpdate<ConsentRecord>> {
        let mut consents = self.consents.write().await;
        let Some(record) = consents.get_mut(&id) else {
            return Ok(ConditionalUpdate::Missing);
        };
        if record.status != ConsentStatus::Pending {
            return Ok(ConditionalUpdate::Rejected(record.clone()));
        }
        record.status = status;
        record.resolved_at = Some(resolved_at);
        Ok(ConditionalUpdate::Applied(record.clone()))
    }

    async fn list_consents_for_citizen(
        &self,
        username: &str,
        status: Option<ConsentStatus>,
    ) -> StorageResult<Vec<ConsentRecord>> {
        let consents = self.consents.read().await;
        let records = consents
            .values()
            .filter(|record| record.citizen_username == username)
            .filter(|record| status.map_or(true, |wanted| record.status == wanted))
            .cloned()
            .collect();
        Ok(newest_first(records, |record| record.created_at))
    }

    async fn list_consents_for_organization(
        &self,
        organization_id: Uuid,
    ) -> StorageResult<Vec<ConsentRecord>> {
        let consents = self.consents.read().await;
        let records = consents
            .values()
            .filter(|record| record.organization_id == organization_id)
            .cloned()
            .collect();
        Ok(newest_first(records, |record| record.created_at))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn backend_label(&self) -> &'static str {
        "memory"
    }
}
