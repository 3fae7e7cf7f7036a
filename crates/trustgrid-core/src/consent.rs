//! Consent request state machine.
//!
//! ```text
//!            check_policy: VIOLATION -> no record, Forbidden
//! request -> check_policy: APPROVED  -> auto_approved            (preference off)
//!                                    -> pending -> approved|denied (preference on)
//! ```
//!
//! `pending` is the only non-terminal state. The single transition out of it
//! is a conditional update in storage, which is what makes `respond` at most
//! once under concurrent callers.

use crate::advisory::{ComplianceGateway, PolicyQuery};
use crate::disclosure::{Disclosure, DisclosureResolver};
use crate::error::TrustGridError;
use crate::storage::{CitizenStorage, ConsentStorage, Storage};
use crate::types::{
    ApprovalMethod, ConditionalUpdate, ConsentDecision, ConsentRecord, ConsentStatus,
    Organization, ProfileField,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of an accepted data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccessOutcome {
    /// Released immediately; `value` is `None` if the citizen never set the field.
    AutoApproved {
        request_id: Uuid,
        field: ProfileField,
        value: Option<String>,
        compliance_reason: String,
    },
    /// Queued until the citizen responds.
    Pending {
        request_id: Uuid,
        compliance_reason: String,
    },
}

impl AccessOutcome {
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::AutoApproved { request_id, .. } | Self::Pending { request_id, .. } => {
                *request_id
            }
        }
    }

    pub fn status(&self) -> ConsentStatus {
        match self {
            Self::AutoApproved { .. } => ConsentStatus::AutoApproved,
            Self::Pending { .. } => ConsentStatus::Pending,
        }
    }
}

/// A citizen's resolved answer, with the field attached when approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseOutcome {
    pub record: ConsentRecord,
    pub disclosure: Option<Disclosure>,
}

/// What an organization sees when it polls a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub request_id: Uuid,
    pub status: ConsentStatus,
    pub field: ProfileField,
    pub citizen_username: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Re-resolved at read time for approved records.
    pub value: Option<String>,
    pub message: String,
}

#[derive(Clone)]
pub struct ConsentService {
    storage: Arc<dyn Storage>,
    gateway: ComplianceGateway,
    resolver: DisclosureResolver,
}

impl ConsentService {
    pub fn new(storage: Arc<dyn Storage>, gateway: ComplianceGateway) -> Self {
        let resolver = DisclosureResolver::new(storage.clone());
        Self {
            storage,
            gateway,
            resolver,
        }
    }

    /// Evaluate one data-access attempt.
    ///
    /// Checks run in a fixed order: verification, citizen existence, request
    /// shape, compliance. A compliance violation leaves no record behind.
    pub async fn request_access(
        &self,
        organization: &Organization,
        citizen_username: &str,
        field_name: &str,
        purpose: &str,
    ) -> Result<AccessOutcome, TrustGridError> {
        if !organization.is_verified() {
            warn!(
                organization = %organization.id,
                "Data request from unverified organization"
            );
            return Err(TrustGridError::Forbidden(
                "organization must be verified before requesting data".to_string(),
            ));
        }

        if self.storage.get_citizen(citizen_username).await?.is_none() {
            return Err(TrustGridError::not_found("citizen", citizen_username));
        }

        let Some(policy_text) = organization.policy() else {
            return Err(TrustGridError::BadRequest(
                "organization has no privacy policy on file".to_string(),
            ));
        };
        let field: ProfileField = field_name.parse()?;
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(TrustGridError::BadRequest(
                "a purpose is required".to_string(),
            ));
        }

        let verdict = self
            .gateway
            .check_policy(&PolicyQuery {
                policy_text: policy_text.to_string(),
                field,
                purpose: purpose.to_string(),
                category: organization.category,
            })
            .await;
        if !verdict.is_approved() {
            warn!(
                organization = %organization.id,
                field = %field,
                reason = %verdict.reason,
                "Compliance violation"
            );
            return Err(TrustGridError::Forbidden(format!(
                "COMPLIANCE VIOLATION: {}",
                verdict.reason
            )));
        }

        // The advisory call may have taken a while; the preference and the
        // released value must reflect the profile as it is now.
        let citizen = self
            .storage
            .get_citizen(citizen_username)
            .await?
            .ok_or_else(|| TrustGridError::not_found("citizen", citizen_username))?;

        let now = Utc::now();
        let manual = citizen.manual_approval_required;
        let record = ConsentRecord {
            id: Uuid::new_v4(),
            citizen_username: citizen.username.clone(),
            organization_id: organization.id,
            organization_name: organization.name.clone(),
            field,
            purpose: purpose.to_string(),
            status: if manual {
                ConsentStatus::Pending
            } else {
                ConsentStatus::AutoApproved
            },
            approval_method: if manual {
                ApprovalMethod::Manual
            } else {
                ApprovalMethod::Auto
            },
            compliance_reason: verdict.reason.clone(),
            created_at: now,
            resolved_at: (!manual).then_some(now),
        };
        self.storage.insert_consent(&record).await?;

        info!(
            organization = %organization.id,
            request = %record.id,
            field = %field,
            status = record.status.as_str(),
            "Consent request recorded"
        );

        if manual {
            return Ok(AccessOutcome::Pending {
                request_id: record.id,
                compliance_reason: record.compliance_reason,
            });
        }

        Ok(AccessOutcome::AutoApproved {
            request_id: record.id,
            field,
            value: citizen.profile.get(&field).cloned(),
            compliance_reason: record.compliance_reason,
        })
    }

    /// Resolve a pending request exactly once.
    pub async fn respond(
        &self,
        request_id: Uuid,
        decision: ConsentDecision,
    ) -> Result<ResponseOutcome, TrustGridError> {
        let record = match self
            .storage
            .resolve_consent(request_id, decision.target_status(), Utc::now())
            .await?
        {
            ConditionalUpdate::Applied(record) => record,
            ConditionalUpdate::Rejected(current) => {
                return Err(TrustGridError::Conflict(format!(
                    "request {request_id} is already {}",
                    current.status.as_str()
                )))
            }
            ConditionalUpdate::Missing => {
                return Err(TrustGridError::not_found("request", request_id))
            }
        };

        info!(
            request = %request_id,
            status = record.status.as_str(),
            "Consent request resolved"
        );

        let disclosure = if record.status.discloses() {
            Some(
                self.resolver
                    .resolve(&record.citizen_username, record.field)
                    .await?,
            )
        } else {
            None
        };

        Ok(ResponseOutcome { record, disclosure })
    }

    /// Current state of a request, visible only to the organization that made it.
    pub async fn get_status(
        &self,
        request_id: Uuid,
        organization_id: Uuid,
    ) -> Result<StatusReport, TrustGridError> {
        let record = self
            .storage
            .get_consent(request_id)
            .await?
            .ok_or_else(|| TrustGridError::not_found("request", request_id))?;
        if record.organization_id != organization_id {
            warn!(
                request = %request_id,
                organization = %organization_id,
                "Cross-organization status lookup"
            );
            return Err(TrustGridError::Forbidden(
                "request belongs to another organization".to_string(),
            ));
        }

        let (value, message) = match record.status {
            ConsentStatus::Pending => (None, "awaiting citizen approval".to_string()),
            ConsentStatus::Denied => (None, "citizen denied the request".to_string()),
            ConsentStatus::Approved | ConsentStatus::AutoApproved => {
                let disclosure = self
                    .resolver
                    .resolve(&record.citizen_username, record.field)
                    .await?;
                (disclosure.value, "data released".to_string())
            }
        };

        Ok(StatusReport {
            request_id: record.id,
            status: record.status,
            field: record.field,
            citizen_username: record.citizen_username,
            created_at: record.created_at,
            resolved_at: record.resolved_at,
            value,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::PolicyVerdict;
    use crate::allowlist::CategoryFieldPolicy;
    use crate::storage::MemoryStorage;
    use crate::test_support::ScriptedAdvisory;
    use crate::types::{Citizen, OrgCategory, ProfileUpdate, VerificationStatus};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        service: ConsentService,
        storage: Arc<MemoryStorage>,
        advisory: Arc<ScriptedAdvisory>,
        organization: Organization,
    }

    fn verified_org() -> Organization {
        let mut organization = Organization::new("Acme Bank");
        organization.verification_status = VerificationStatus::Verified;
        organization.category = OrgCategory::Fintech;
        organization.policy_text =
            Some("We collect email and BVN for KYC checks.".to_string());
        organization
    }

    async fn fixture(advisory: ScriptedAdvisory, manual: bool) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_citizen(
                &Citizen::new("ayo")
                    .with_field(ProfileField::Email, "ayo@example.com")
                    .with_manual_approval(manual),
            )
            .await
            .unwrap();
        let advisory = Arc::new(advisory);
        let gateway = ComplianceGateway::new(
            advisory.clone(),
            CategoryFieldPolicy::default(),
            Duration::from_secs(1),
        );
        Fixture {
            service: ConsentService::new(storage.clone(), gateway),
            storage,
            advisory,
            organization: verified_org(),
        }
    }

    #[tokio::test]
    async fn unverified_org_is_forbidden_without_advisory_call() {
        let fx = fixture(ScriptedAdvisory::approving(), false).await;
        let mut organization = fx.organization.clone();
        organization.verification_status = VerificationStatus::Unverified;

        let err = fx
            .service
            .request_access(&organization, "ayo", "email", "KYC")
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::Forbidden(_)));
        assert_eq!(fx.advisory.policy_calls.load(Ordering::SeqCst), 0);
        assert!(fx
            .storage
            .list_consents_for_citizen("ayo", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn check_order_citizen_then_policy_then_field() {
        let fx = fixture(ScriptedAdvisory::approving(), false).await;

        let err = fx
            .service
            .request_access(&fx.organization, "nobody", "shoe_size", "KYC")
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::NotFound(_)));

        let mut no_policy = fx.organization.clone();
        no_policy.policy_text = None;
        let err = fx
            .service
            .request_access(&no_policy, "ayo", "shoe_size", "KYC")
            .await
            .unwrap_err();
        assert!(err.reason().contains("policy"));

        let err = fx
            .service
            .request_access(&fx.organization, "ayo", "shoe_size", "KYC")
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::BadRequest(_)));
    }

    #[tokio::test]
    async fn violation_creates_no_record() {
        let fx = fixture(
            ScriptedAdvisory::approving()
                .with_policy(PolicyVerdict::violation("policy does not mention email")),
            false,
        )
        .await;

        let err = fx
            .service
            .request_access(&fx.organization, "ayo", "email", "marketing")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TrustGridError::Forbidden(
                "COMPLIANCE VIOLATION: policy does not mention email".to_string()
            )
        );
        assert!(fx
            .storage
            .list_consents_for_organization(fx.organization.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn auto_approval_releases_value_immediately() {
        let fx = fixture(ScriptedAdvisory::approving(), false).await;

        let outcome = fx
            .service
            .request_access(&fx.organization, "ayo", "email", "KYC")
            .await
            .unwrap();
        let (request_id, value) = match outcome {
            AccessOutcome::AutoApproved {
                request_id, value, ..
            } => (request_id, value),
            other => panic!("expected auto approval, got {other:?}"),
        };
        assert_eq!(value.as_deref(), Some("ayo@example.com"));

        let record = fx.storage.get_consent(request_id).await.unwrap().unwrap();
        assert_eq!(record.status, ConsentStatus::AutoApproved);
        assert_eq!(record.approval_method, ApprovalMethod::Auto);
        assert!(record.resolved_at.is_some());

        // terminal from birth
        assert!(matches!(
            fx.service.respond(request_id, ConsentDecision::Denied).await,
            Err(TrustGridError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn auto_approval_of_unset_field_is_absent_value() {
        let fx = fixture(ScriptedAdvisory::approving(), false).await;
        let outcome = fx
            .service
            .request_access(&fx.organization, "ayo", "bvn", "KYC")
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AccessOutcome::AutoApproved { value: None, .. }
        ));
    }

    #[tokio::test]
    async fn manual_flow_resolves_once() {
        let fx = fixture(ScriptedAdvisory::approving(), true).await;

        let outcome = fx
            .service
            .request_access(&fx.organization, "ayo", "email", "KYC")
            .await
            .unwrap();
        assert_eq!(outcome.status(), ConsentStatus::Pending);
        let request_id = outcome.request_id();

        let pending = fx
            .service
            .get_status(request_id, fx.organization.id)
            .await
            .unwrap();
        assert_eq!(pending.status, ConsentStatus::Pending);
        assert_eq!(pending.value, None);

        let response = fx
            .service
            .respond(request_id, ConsentDecision::Approved)
            .await
            .unwrap();
        assert_eq!(response.record.status, ConsentStatus::Approved);
        assert_eq!(
            response.disclosure.and_then(|d| d.value).as_deref(),
            Some("ayo@example.com")
        );

        let err = fx
            .service
            .respond(request_id, ConsentDecision::Denied)
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::Conflict(_)));
        let record = fx.storage.get_consent(request_id).await.unwrap().unwrap();
        assert_eq!(record.status, ConsentStatus::Approved);
    }

    #[tokio::test]
    async fn status_is_fetched_on_read() {
        let fx = fixture(ScriptedAdvisory::approving(), true).await;
        let request_id = fx
            .service
            .request_access(&fx.organization, "ayo", "email", "KYC")
            .await
            .unwrap()
            .request_id();
        fx.service
            .respond(request_id, ConsentDecision::Approved)
            .await
            .unwrap();

        let mut update = ProfileUpdate::default();
        update
            .fields
            .insert(ProfileField::Email, "ayo@new.example".to_string());
        fx.storage.update_citizen("ayo", &update).await.unwrap();

        let report = fx
            .service
            .get_status(request_id, fx.organization.id)
            .await
            .unwrap();
        assert_eq!(report.value.as_deref(), Some("ayo@new.example"));
    }

    #[tokio::test]
    async fn denied_request_discloses_nothing() {
        let fx = fixture(ScriptedAdvisory::approving(), true).await;
        let request_id = fx
            .service
            .request_access(&fx.organization, "ayo", "email", "KYC")
            .await
            .unwrap()
            .request_id();

        let response = fx
            .service
            .respond(request_id, ConsentDecision::Denied)
            .await
            .unwrap();
        assert_eq!(response.disclosure, None);

        let report = fx
            .service
            .get_status(request_id, fx.organization.id)
            .await
            .unwrap();
        assert_eq!(report.status, ConsentStatus::Denied);
        assert_eq!(report.value, None);
    }

    #[tokio::test]
    async fn other_org_cannot_read_status() {
        let fx = fixture(ScriptedAdvisory::approving(), false).await;
        let request_id = fx
            .service
            .request_access(&fx.organization, "ayo", "email", "KYC")
            .await
            .unwrap()
            .request_id();

        let err = fx
            .service
            .get_status(request_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, TrustGridError::Forbidden(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_responses_produce_one_success() {
        let fx = fixture(ScriptedAdvisory::approving(), true).await;
        let request_id = fx
            .service
            .request_access(&fx.organization, "ayo", "email", "KYC")
            .await
            .unwrap()
            .request_id();

        let mut handles = Vec::new();
        for attempt in 0..16 {
            let service = fx.service.clone();
            let decision = if attempt % 2 == 0 {
                ConsentDecision::Approved
            } else {
                ConsentDecision::Denied
            };
            handles.push(tokio::spawn(async move {
                service.respond(request_id, decision).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, TrustGridError::Conflict(_))),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn preference_change_during_compliance_check_is_honoured() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_citizen(&Citizen::new("ayo").with_field(ProfileField::Email, "a@x"))
            .await
            .unwrap();
        let gateway = ComplianceGateway::new(
            Arc::new(ScriptedAdvisory::approving().with_delay(Duration::from_secs(5))),
            CategoryFieldPolicy::default(),
            Duration::from_secs(20),
        );
        let service = ConsentService::new(storage.clone(), gateway);
        let organization = verified_org();

        let in_flight = tokio::spawn({
            let service = service.clone();
            async move {
                service
                    .request_access(&organization, "ayo", "email", "KYC")
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        storage
            .update_citizen(
                "ayo",
                &ProfileUpdate {
                    manual_approval_required: Some(true),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();

        let outcome = in_flight.await.unwrap().unwrap();
        assert!(matches!(outcome, AccessOutcome::Pending { .. }));
        let records = storage.list_consents_for_citizen("ayo", None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ConsentStatus::Pending);
    }
}
