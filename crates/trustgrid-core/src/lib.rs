//! TrustGrid core: a consent and compliance gateway between data-requesting
//! organizations and the citizens whose data they want.
//!
//! The crate owns credential matching, the organization verification state
//! machine, the per-request consent state machine and fetch-on-read field
//! disclosure. External advisory services sit behind [`AdvisoryService`] and
//! can only ever narrow access.

#![deny(unsafe_code)]

pub mod advisory;
pub mod allowlist;
pub mod consent;
pub mod credentials;
pub mod disclosure;
pub mod error;
pub mod runtime;
pub mod storage;
pub mod types;
pub mod verification;

#[cfg(test)]
mod test_support;

pub use advisory::{
    AdvisoryError, AdvisoryService, ComplianceGateway, IdentityClaim, IdentityDecision,
    IdentityVerdict, PolicyDecision, PolicyQuery, PolicyVerdict,
};
pub use allowlist::CategoryFieldPolicy;
pub use consent::{AccessOutcome, ConsentService, ResponseOutcome, StatusReport};
pub use credentials::{
    CredentialConfig, CredentialService, IssuedCredential, RevokeOutcome, API_KEY_PREFIX,
};
pub use disclosure::{Disclosure, DisclosureResolver};
pub use error::TrustGridError;
pub use runtime::{EngineConfig, Registration, TrustGridEngine};
pub use storage::{MemoryStorage, PostgresStorage, Storage, StorageConfig};
pub use types::{
    ApprovalMethod, CertificateRef, Citizen, ConsentDecision, ConsentRecord, ConsentStatus,
    Credential, CredentialStatus, OrgCategory, Organization, ProfileField, ProfileUpdate,
    RegistrationProfile, VerificationStatus,
};
pub use verification::{VerificationOutcome, VerificationService, VerificationSubmission};
