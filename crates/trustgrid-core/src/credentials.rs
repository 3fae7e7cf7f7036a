//! API credential issuance, matching and revocation.
//!
//! Secrets are returned once at issuance and only their bcrypt hash is kept.
//! Matching scans active credentials linearly because salted one-way hashes
//! offer nothing to index on.

use crate::error::TrustGridError;
use crate::storage::{CredentialStorage, OrganizationStorage, Storage};
use crate::types::{ConditionalUpdate, Credential, CredentialStatus, Organization};
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Prefix every issued key starts with.
pub const API_KEY_PREFIX: &str = "tg_live_";

/// bcrypt only reads the first 72 bytes of its input.
pub const MAX_HASH_INPUT_BYTES: usize = 72;

pub const DEFAULT_KEY_NAME: &str = "Default Key";

/// Entropy floor for generated keys.
pub const MIN_SECRET_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialConfig {
    /// Recognizable key prefix, `tg_live_` by default.
    pub key_prefix: String,
    /// Random bytes behind the prefix. Values below `MIN_SECRET_BYTES` are
    /// raised to it.
    pub secret_bytes: usize,
    /// bcrypt work factor.
    pub hash_cost: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            key_prefix: API_KEY_PREFIX.to_string(),
            secret_bytes: 32,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// Bytes actually fed to bcrypt, for both hashing and verification.
pub fn hash_input(secret: &str) -> &[u8] {
    let bytes = secret.as_bytes();
    &bytes[..bytes.len().min(MAX_HASH_INPUT_BYTES)]
}

pub fn hash_secret(secret: &str, cost: u32) -> Result<String, TrustGridError> {
    bcrypt::hash(hash_input(secret), cost)
        .map_err(|e| TrustGridError::Internal(format!("credential hashing failed: {e}")))
}

/// A malformed stored hash never matches.
pub fn verify_secret(secret: &str, key_hash: &str) -> bool {
    bcrypt::verify(hash_input(secret), key_hash).unwrap_or(false)
}

/// Plaintext key plus its stored metadata. The plaintext is not recoverable later.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    pub plaintext: String,
    pub credential: Credential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
}

#[derive(Clone)]
pub struct CredentialService {
    storage: Arc<dyn Storage>,
    config: CredentialConfig,
}

impl CredentialService {
    pub fn new(storage: Arc<dyn Storage>, config: CredentialConfig) -> Self {
        Self { storage, config }
    }

    pub fn generate_secret(&self) -> String {
        let mut random_bytes = vec![0u8; self.config.secret_bytes.max(MIN_SECRET_BYTES)];
        rand::rngs::OsRng.fill_bytes(&mut random_bytes);
        let random_part = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&random_bytes);
        format!("{}{}", self.config.key_prefix, random_part)
    }

    pub async fn issue(
        &self,
        organization_id: Uuid,
        display_name: &str,
    ) -> Result<IssuedCredential, TrustGridError> {
        let issued = self.prepare(organization_id, display_name).await?;
        self.storage.insert_credential(&issued.credential).await?;

        info!(
            organization = %organization_id,
            credential = %issued.credential.id,
            "API key issued"
        );
        Ok(issued)
    }

    /// Mint and hash a key without storing it.
    pub async fn prepare(
        &self,
        organization_id: Uuid,
        display_name: &str,
    ) -> Result<IssuedCredential, TrustGridError> {
        let plaintext = self.generate_secret();
        let cost = self.config.hash_cost;
        let secret = plaintext.clone();
        let key_hash = tokio::task::spawn_blocking(move || hash_secret(&secret, cost))
            .await
            .map_err(|e| TrustGridError::Internal(format!("hashing task failed: {e}")))??;

        let name = display_name.trim();
        let credential = Credential {
            id: Uuid::new_v4(),
            name: if name.is_empty() {
                DEFAULT_KEY_NAME.to_string()
            } else {
                name.to_string()
            },
            key_hash,
            status: CredentialStatus::Active,
            created_at: Utc::now(),
            organization_id,
        };
        Ok(IssuedCredential {
            plaintext,
            credential,
        })
    }

    /// Resolve a presented key to its organization.
    pub async fn authenticate(&self, presented: &str) -> Result<Organization, TrustGridError> {
        if presented.is_empty() {
            return Err(TrustGridError::Unauthenticated(
                "missing API key".to_string(),
            ));
        }

        let candidates = self.storage.list_active_credentials().await?;
        let secret = presented.to_string();
        let matched = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|credential| verify_secret(&secret, &credential.key_hash))
        })
        .await
        .map_err(|e| TrustGridError::Internal(format!("verification task failed: {e}")))?;

        let Some(credential) = matched else {
            warn!("API key rejected");
            return Err(TrustGridError::Unauthenticated(
                "invalid or revoked API key".to_string(),
            ));
        };

        // A revoke may have landed while the scan was running.
        let still_active = self
            .storage
            .get_credential(credential.id)
            .await?
            .is_some_and(|current| current.is_active());
        if !still_active {
            warn!(credential = %credential.id, "API key revoked during lookup");
            return Err(TrustGridError::Unauthenticated(
                "invalid or revoked API key".to_string(),
            ));
        }

        self.storage
            .get_organization(credential.organization_id)
            .await?
            .ok_or_else(|| {
                TrustGridError::Internal(format!(
                    "credential {} references missing organization {}",
                    credential.id, credential.organization_id
                ))
            })
    }

    pub async fn revoke(
        &self,
        credential_id: Uuid,
        organization_id: Uuid,
    ) -> Result<RevokeOutcome, TrustGridError> {
        match self
            .storage
            .revoke_credential(credential_id, organization_id)
            .await?
        {
            ConditionalUpdate::Applied(_) => {
                info!(
                    organization = %organization_id,
                    credential = %credential_id,
                    "API key revoked"
                );
                Ok(RevokeOutcome::Revoked)
            }
            ConditionalUpdate::Rejected(_) => Ok(RevokeOutcome::AlreadyRevoked),
            ConditionalUpdate::Missing => Err(TrustGridError::not_found("API key", credential_id)),
        }
    }

    pub async fn list(&self, organization_id: Uuid) -> Result<Vec<Credential>, TrustGridError> {
        self.storage
            .list_credentials_for_organization(organization_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use proptest::prelude::*;

    fn cheap_config() -> CredentialConfig {
        CredentialConfig {
            hash_cost: 4,
            ..CredentialConfig::default()
        }
    }

    async fn service_with_org() -> (CredentialService, Organization) {
        let storage = Arc::new(MemoryStorage::new());
        let organization = Organization::new("Acme");
        storage.insert_organization(&organization).await.unwrap();
        (CredentialService::new(storage, cheap_config()), organization)
    }

    #[test]
    fn truncation_is_shared_by_hash_and_verify() {
        let long_secret = format!("{API_KEY_PREFIX}{}", "x".repeat(120));
        assert_eq!(hash_input(&long_secret).len(), MAX_HASH_INPUT_BYTES);

        let key_hash = hash_secret(&long_secret, 4).unwrap();
        assert!(verify_secret(&long_secret, &key_hash));
        assert!(!verify_secret("tg_live_short", &key_hash));
        assert!(!verify_secret(&long_secret, "not-a-bcrypt-hash"));
    }

    #[test]
    fn secret_length_never_drops_below_floor() {
        let service = CredentialService::new(
            Arc::new(MemoryStorage::new()),
            CredentialConfig {
                secret_bytes: 4,
                ..cheap_config()
            },
        );
        let secret = service.generate_secret();
        let random_part = secret.strip_prefix(API_KEY_PREFIX).unwrap();
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(random_part)
            .unwrap();
        assert_eq!(decoded.len(), MIN_SECRET_BYTES);
    }

    #[tokio::test]
    async fn issued_key_authenticates_until_revoked() {
        let (service, organization) = service_with_org().await;
        let issued = service.issue(organization.id, "CI key").await.unwrap();

        assert!(issued.plaintext.starts_with(API_KEY_PREFIX));
        assert_ne!(issued.credential.key_hash, issued.plaintext);
        assert_eq!(
            service.authenticate(&issued.plaintext).await.unwrap().id,
            organization.id
        );

        let outcome = service
            .revoke(issued.credential.id, organization.id)
            .await
            .unwrap();
        assert_eq!(outcome, RevokeOutcome::Revoked);
        assert!(matches!(
            service.authenticate(&issued.plaintext).await,
            Err(TrustGridError::Unauthenticated(_))
        ));

        let again = service
            .revoke(issued.credential.id, organization.id)
            .await
            .unwrap();
        assert_eq!(again, RevokeOutcome::AlreadyRevoked);
    }

    #[tokio::test]
    async fn empty_key_is_unauthenticated() {
        let (service, _) = service_with_org().await;
        assert!(matches!(
            service.authenticate("").await,
            Err(TrustGridError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn revoke_of_foreign_key_is_not_found() {
        let (service, organization) = service_with_org().await;
        let issued = service.issue(organization.id, "").await.unwrap();
        assert_eq!(issued.credential.name, DEFAULT_KEY_NAME);

        let err = service
            .revoke(issued.credential.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::NotFound(_)));
        assert!(service.authenticate(&issued.plaintext).await.is_ok());
    }

    #[tokio::test]
    async fn orphaned_credential_is_internal() {
        let storage = Arc::new(MemoryStorage::new());
        let service = CredentialService::new(storage, cheap_config());
        let issued = service.issue(Uuid::new_v4(), "orphan").await.unwrap();

        assert!(matches!(
            service.authenticate(&issued.plaintext).await,
            Err(TrustGridError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn keys_resolve_to_their_own_organization() {
        let storage = Arc::new(MemoryStorage::new());
        let acme = Organization::new("Acme");
        let globex = Organization::new("Globex");
        storage.insert_organization(&acme).await.unwrap();
        storage.insert_organization(&globex).await.unwrap();
        let service = CredentialService::new(storage, cheap_config());

        let acme_key = service.issue(acme.id, "a").await.unwrap();
        let globex_key = service.issue(globex.id, "g").await.unwrap();

        assert_eq!(
            service.authenticate(&acme_key.plaintext).await.unwrap().id,
            acme.id
        );
        assert_eq!(
            service.authenticate(&globex_key.plaintext).await.unwrap().id,
            globex.id
        );

        let listed = service.list(acme.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, acme_key.credential.id);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn single_character_mutation_never_authenticates(
            position in 0usize..64,
            replacement in proptest::char::range('!', '~'),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let (service, organization) = service_with_org().await;
                let issued = service.issue(organization.id, "k").await.unwrap();
                prop_assert!(service.authenticate(&issued.plaintext).await.is_ok());

                let mut chars: Vec<char> = issued.plaintext.chars().collect();
                let index = position % chars.len();
                prop_assume!(chars[index] != replacement);
                chars[index] = replacement;
                let mutated: String = chars.into_iter().collect();

                prop_assert!(matches!(
                    service.authenticate(&mutated).await,
                    Err(TrustGridError::Unauthenticated(_))
                ));
                Ok(())
            })?;
        }
    }
}
