//! Organization verification state machine.
//!
//! `unverified | rejected --submit--> verified | rejected`. A verified
//! organization cannot resubmit. Each submission consults the identity
//! advisor once and lands in a single conditional write.

use crate::advisory::{ComplianceGateway, IdentityClaim, IdentityDecision};
use crate::error::TrustGridError;
use crate::storage::{OrganizationStorage, Storage};
use crate::types::{
    CertificateRef, ConditionalUpdate, OrgCategory, Organization, RegistrationProfile,
    VerificationStatus, VerificationUpdate,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Verification material submitted by an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSubmission {
    pub claimed_name: String,
    pub registration_number: String,
    #[serde(default)]
    pub category: OrgCategory,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub certificate: CertificateRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub decision: IdentityDecision,
    pub reason: String,
    pub organization: Organization,
}

#[derive(Clone)]
pub struct VerificationService {
    storage: Arc<dyn Storage>,
    gateway: ComplianceGateway,
}

impl VerificationService {
    pub fn new(storage: Arc<dyn Storage>, gateway: ComplianceGateway) -> Self {
        Self { storage, gateway }
    }

    /// Submit identity material for verification.
    ///
    /// A rejection is persisted (status and evidence) and then returned as
    /// `Forbidden` with the advisor's reason, so the caller can fix and resubmit.
    pub async fn submit(
        &self,
        organization_id: Uuid,
        submission: VerificationSubmission,
    ) -> Result<VerificationOutcome, TrustGridError> {
        let current = self
            .storage
            .get_organization(organization_id)
            .await?
            .ok_or_else(|| TrustGridError::not_found("organization", organization_id))?;
        if current.is_verified() {
            return Err(TrustGridError::Conflict(
                "organization is already verified".to_string(),
            ));
        }

        let claimed_name = submission.claimed_name.trim().to_string();
        let registration_number = submission.registration_number.trim().to_string();
        if claimed_name.is_empty() {
            return Err(TrustGridError::BadRequest(
                "claimed name is required".to_string(),
            ));
        }
        if registration_number.is_empty() {
            return Err(TrustGridError::BadRequest(
                "registration number is required".to_string(),
            ));
        }
        if submission.certificate.uri.trim().is_empty() {
            return Err(TrustGridError::BadRequest(
                "certificate reference is required".to_string(),
            ));
        }

        if let Some(holder) = self
            .storage
            .find_organization_by_name(&claimed_name)
            .await?
        {
            if holder.id != organization_id {
                return Err(TrustGridError::Conflict(format!(
                    "organization name '{claimed_name}' is already registered"
                )));
            }
        }

        let verdict = self
            .gateway
            .verify_identity(&IdentityClaim {
                claimed_name: claimed_name.clone(),
                registration_number: registration_number.clone(),
                certificate: submission.certificate.clone(),
            })
            .await;

        let status = match verdict.decision {
            IdentityDecision::Verified => VerificationStatus::Verified,
            IdentityDecision::Rejected => VerificationStatus::Rejected,
        };
        let update = VerificationUpdate {
            name: claimed_name,
            category: submission.category,
            registration: RegistrationProfile {
                registration_number,
                website_url: non_empty(submission.website_url),
                description: non_empty(submission.description),
            },
            certificate: submission.certificate,
            status,
        };

        let organization = match self
            .storage
            .apply_verification(organization_id, &update)
            .await?
        {
            ConditionalUpdate::Applied(organization) => organization,
            ConditionalUpdate::Rejected(_) => {
                return Err(TrustGridError::Conflict(
                    "organization is already verified".to_string(),
                ))
            }
            ConditionalUpdate::Missing => {
                return Err(TrustGridError::not_found("organization", organization_id))
            }
        };

        match verdict.decision {
            IdentityDecision::Verified => {
                info!(
                    organization = %organization_id,
                    category = %organization.category,
                    "Organization verified"
                );
                Ok(VerificationOutcome {
                    decision: verdict.decision,
                    reason: verdict.reason,
                    organization,
                })
            }
            IdentityDecision::Rejected => {
                warn!(
                    organization = %organization_id,
                    reason = %verdict.reason,
                    "Organization verification rejected"
                );
                Err(TrustGridError::Forbidden(format!(
                    "VERIFICATION REJECTED: {}",
                    verdict.reason
                )))
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::CategoryFieldPolicy;
    use crate::storage::MemoryStorage;
    use crate::test_support::ScriptedAdvisory;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn submission(name: &str) -> VerificationSubmission {
        VerificationSubmission {
            claimed_name: name.to_string(),
            registration_number: "RC-100200".to_string(),
            category: OrgCategory::Fintech,
            website_url: Some("https://acme.example".to_string()),
            description: Some(String::new()),
            certificate: CertificateRef::from_bytes("s3://certs/acme.pdf", b"%PDF-1.7 acme"),
        }
    }

    async fn setup(
        advisory: Arc<ScriptedAdvisory>,
    ) -> (VerificationService, Arc<MemoryStorage>, Organization) {
        let storage = Arc::new(MemoryStorage::new());
        let organization = Organization::new("Acme");
        storage.insert_organization(&organization).await.unwrap();
        let gateway = ComplianceGateway::new(
            advisory,
            CategoryFieldPolicy::default(),
            Duration::from_secs(1),
        );
        (
            VerificationService::new(storage.clone(), gateway),
            storage,
            organization,
        )
    }

    #[tokio::test]
    async fn verified_submission_updates_profile_in_one_write() {
        let (service, storage, organization) =
            setup(Arc::new(ScriptedAdvisory::approving())).await;

        let outcome = service
            .submit(organization.id, submission("Acme Holdings"))
            .await
            .unwrap();
        assert_eq!(outcome.decision, IdentityDecision::Verified);

        let stored = storage
            .get_organization(organization.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.verification_status, VerificationStatus::Verified);
        assert_eq!(stored.name, "Acme Holdings");
        assert_eq!(stored.category, OrgCategory::Fintech);
        let registration = stored.registration.unwrap();
        assert_eq!(registration.registration_number, "RC-100200");
        assert_eq!(registration.description, None);

        let err = service
            .submit(organization.id, submission("Acme Holdings"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejection_keeps_evidence_and_allows_resubmission() {
        let (service, storage, organization) = setup(Arc::new(
            ScriptedAdvisory::rejecting_identity("registration number not found"),
        ))
        .await;

        let err = service
            .submit(organization.id, submission("Acme"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TrustGridError::Forbidden(
                "VERIFICATION REJECTED: registration number not found".to_string()
            )
        );

        let stored = storage
            .get_organization(organization.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.verification_status, VerificationStatus::Rejected);
        assert!(stored.certificate.is_some());

        // still rejected, but the path is open
        assert!(matches!(
            service.submit(organization.id, submission("Acme")).await,
            Err(TrustGridError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn advisory_failure_is_a_rejection() {
        let (service, storage, organization) = setup(Arc::new(ScriptedAdvisory::failing())).await;

        assert!(matches!(
            service.submit(organization.id, submission("Acme")).await,
            Err(TrustGridError::Forbidden(_))
        ));
        let stored = storage
            .get_organization(organization.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.verification_status, VerificationStatus::Rejected);
    }

    #[tokio::test]
    async fn name_held_by_another_org_is_conflict_before_advisory() {
        let advisory = Arc::new(ScriptedAdvisory::approving());
        let (service, storage, organization) = setup(advisory.clone()).await;
        storage
            .insert_organization(&Organization::new("Globex"))
            .await
            .unwrap();

        let err = service
            .submit(organization.id, submission("Globex"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::Conflict(_)));
        assert_eq!(advisory.identity_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_fields_are_bad_request() {
        let (service, _, organization) = setup(Arc::new(ScriptedAdvisory::approving())).await;
        let mut incomplete = submission("Acme");
        incomplete.registration_number = "  ".to_string();
        assert!(matches!(
            service.submit(organization.id, incomplete).await,
            Err(TrustGridError::BadRequest(_))
        ));
    }
}
