use crate::error::TrustGridError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Business category an organization declares when it submits for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrgCategory {
    Fintech,
    #[serde(rename = "E-commerce")]
    ECommerce,
    #[serde(rename = "Social Media")]
    SocialMedia,
    Dating,
    Healthcare,
    Gaming,
    Other,
}

impl OrgCategory {
    pub const ALL: [OrgCategory; 7] = [
        Self::Fintech,
        Self::ECommerce,
        Self::SocialMedia,
        Self::Dating,
        Self::Healthcare,
        Self::Gaming,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fintech => "Fintech",
            Self::ECommerce => "E-commerce",
            Self::SocialMedia => "Social Media",
            Self::Dating => "Dating",
            Self::Healthcare => "Healthcare",
            Self::Gaming => "Gaming",
            Self::Other => "Other",
        }
    }
}

impl Default for OrgCategory {
    fn default() -> Self {
        Self::Other
    }
}

impl fmt::Display for OrgCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgCategory {
    type Err = TrustGridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                TrustGridError::BadRequest(format!("unknown organization category '{value}'"))
            })
    }
}

/// Organization trust state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = TrustGridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unverified" => Ok(Self::Unverified),
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(TrustGridError::Internal(format!(
                "unknown verification status '{other}'"
            ))),
        }
    }
}

/// Registration metadata populated when an organization submits for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationProfile {
    pub registration_number: String,
    pub website_url: Option<String>,
    pub description: Option<String>,
}

/// Opaque reference to previously uploaded certificate evidence.
///
/// The file itself lives in external storage; the digest pins the exact bytes
/// the identity service was asked to look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRef {
    pub uri: String,
    pub blake3_digest: String,
}

impl CertificateRef {
    pub fn new(uri: impl Into<String>, blake3_digest: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            blake3_digest: blake3_digest.into(),
        }
    }

    pub fn from_bytes(uri: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(uri, blake3::hash(bytes).to_hex().to_string())
    }
}

/// A data-requesting organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub verification_status: VerificationStatus,
    pub category: OrgCategory,
    pub policy_text: Option<String>,
    pub registration: Option<RegistrationProfile>,
    pub certificate: Option<CertificateRef>,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            verification_status: VerificationStatus::Unverified,
            category: OrgCategory::Other,
            policy_text: None,
            registration: None,
            certificate: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }

    /// Declared policy text, if any non-blank text has been supplied.
    pub fn policy(&self) -> Option<&str> {
        self.policy_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Fields written in the single verification update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationUpdate {
    pub name: String,
    pub category: OrgCategory,
    pub registration: RegistrationProfile,
    pub certificate: CertificateRef,
    pub status: VerificationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Revoked,
}

impl CredentialStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

impl FromStr for CredentialStatus {
    type Err = TrustGridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            other => Err(TrustGridError::Internal(format!(
                "unknown credential status '{other}'"
            ))),
        }
    }
}

/// An API key bound to exactly one organization. Only the hash is ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credential {
    pub id: Uuid,
    pub name: String,
    #[serde(skip)]
    pub key_hash: String,
    pub status: CredentialStatus,
    pub created_at: DateTime<Utc>,
    pub organization_id: Uuid,
}

impl Credential {
    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }
}

/// The fixed set of disclosable citizen profile fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    FirstName,
    LastName,
    Email,
    PhoneNumber,
    DateOfBirth,
    Gender,
    Address,
    City,
    State,
    Country,
    PostalCode,
    Bvn,
    Nin,
    PassportNumber,
    DriversLicense,
    VotersCard,
    BankAccountNumber,
    BankName,
    Occupation,
    Employer,
    MonthlyIncome,
    BloodType,
    MedicalConditions,
    EmergencyContact,
    MaritalStatus,
    EducationLevel,
    SocialMediaHandles,
}

/// Coarse sensitivity grouping used to build the default allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldGroup {
    Personal,
    Address,
    NationalIdentity,
    Financial,
    Health,
    Social,
}

impl ProfileField {
    pub const ALL: [ProfileField; 27] = [
        Self::FirstName,
        Self::LastName,
        Self::Email,
        Self::PhoneNumber,
        Self::DateOfBirth,
        Self::Gender,
        Self::Address,
        Self::City,
        Self::State,
        Self::Country,
        Self::PostalCode,
        Self::Bvn,
        Self::Nin,
        Self::PassportNumber,
        Self::DriversLicense,
        Self::VotersCard,
        Self::BankAccountNumber,
        Self::BankName,
        Self::Occupation,
        Self::Employer,
        Self::MonthlyIncome,
        Self::BloodType,
        Self::MedicalConditions,
        Self::EmergencyContact,
        Self::MaritalStatus,
        Self::EducationLevel,
        Self::SocialMediaHandles,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Email => "email",
            Self::PhoneNumber => "phone_number",
            Self::DateOfBirth => "date_of_birth",
            Self::Gender => "gender",
            Self::Address => "address",
            Self::City => "city",
            Self::State => "state",
            Self::Country => "country",
            Self::PostalCode => "postal_code",
            Self::Bvn => "bvn",
            Self::Nin => "nin",
            Self::PassportNumber => "passport_number",
            Self::DriversLicense => "drivers_license",
            Self::VotersCard => "voters_card",
            Self::BankAccountNumber => "bank_account_number",
            Self::BankName => "bank_name",
            Self::Occupation => "occupation",
            Self::Employer => "employer",
            Self::MonthlyIncome => "monthly_income",
            Self::BloodType => "blood_type",
            Self::MedicalConditions => "medical_conditions",
            Self::EmergencyContact => "emergency_contact",
            Self::MaritalStatus => "marital_status",
            Self::EducationLevel => "education_level",
            Self::SocialMediaHandles => "social_media_handles",
        }
    }

    /// Human label, as a policy document would usually spell the field.
    pub fn label(self) -> &'static str {
        match self {
            Self::FirstName => "first name",
            Self::LastName => "last name",
            Self::Email => "email",
            Self::PhoneNumber => "phone number",
            Self::DateOfBirth => "date of birth",
            Self::Gender => "gender",
            Self::Address => "address",
            Self::City => "city",
            Self::State => "state",
            Self::Country => "country",
            Self::PostalCode => "postal code",
            Self::Bvn => "BVN",
            Self::Nin => "NIN",
            Self::PassportNumber => "passport number",
            Self::DriversLicense => "driver's license",
            Self::VotersCard => "voter's card",
            Self::BankAccountNumber => "bank account number",
            Self::BankName => "bank name",
            Self::Occupation => "occupation",
            Self::Employer => "employer",
            Self::MonthlyIncome => "monthly income",
            Self::BloodType => "blood type",
            Self::MedicalConditions => "medical conditions",
            Self::EmergencyContact => "emergency contact",
            Self::MaritalStatus => "marital status",
            Self::EducationLevel => "education level",
            Self::SocialMediaHandles => "social media handles",
        }
    }

    pub fn group(self) -> FieldGroup {
        match self {
            Self::FirstName
            | Self::LastName
            | Self::Email
            | Self::PhoneNumber
            | Self::DateOfBirth
            | Self::Gender => FieldGroup::Personal,
            Self::Address | Self::City | Self::State | Self::Country | Self::PostalCode => {
                FieldGroup::Address
            }
            Self::Bvn
            | Self::Nin
            | Self::PassportNumber
            | Self::DriversLicense
            | Self::VotersCard => FieldGroup::NationalIdentity,
            Self::BankAccountNumber
            | Self::BankName
            | Self::Occupation
            | Self::Employer
            | Self::MonthlyIncome => FieldGroup::Financial,
            Self::BloodType | Self::MedicalConditions | Self::EmergencyContact => {
                FieldGroup::Health
            }
            Self::MaritalStatus | Self::EducationLevel | Self::SocialMediaHandles => {
                FieldGroup::Social
            }
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileField {
    type Err = TrustGridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == normalized)
            .ok_or_else(|| TrustGridError::BadRequest(format!("unknown data field '{value}'")))
    }
}

/// The data subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citizen {
    pub username: String,
    pub profile: BTreeMap<ProfileField, String>,
    pub manual_approval_required: bool,
    pub created_at: DateTime<Utc>,
}

impl Citizen {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            profile: BTreeMap::new(),
            manual_approval_required: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, field: ProfileField, value: impl Into<String>) -> Self {
        self.profile.insert(field, value.into());
        self
    }

    pub fn with_manual_approval(mut self, required: bool) -> Self {
        self.manual_approval_required = required;
        self
    }
}

/// Partial citizen profile update. An empty string clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub fields: BTreeMap<ProfileField, String>,
    #[serde(default)]
    pub manual_approval_required: Option<bool>,
}

impl ProfileUpdate {
    pub fn apply_to(&self, citizen: &mut Citizen) {
        for (field, value) in &self.fields {
            if value.is_empty() {
                citizen.profile.remove(field);
            } else {
                citizen.profile.insert(*field, value.clone());
            }
        }
        if let Some(required) = self.manual_approval_required {
            citizen.manual_approval_required = required;
        }
    }
}

/// Consent record lifecycle. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Approved,
    Denied,
    AutoApproved,
}

impl ConsentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::AutoApproved => "auto_approved",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }

    /// Terminal states that release the requested field.
    pub fn discloses(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }
}

impl FromStr for ConsentStatus {
    type Err = TrustGridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "auto_approved" => Ok(Self::AutoApproved),
            other => Err(TrustGridError::Internal(format!(
                "unknown consent status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMethod {
    Manual,
    Auto,
}

impl ApprovalMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

impl FromStr for ApprovalMethod {
    type Err = TrustGridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            other => Err(TrustGridError::Internal(format!(
                "unknown approval method '{other}'"
            ))),
        }
    }
}

/// A citizen's answer to a pending consent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentDecision {
    Approved,
    Denied,
}

impl ConsentDecision {
    pub fn target_status(self) -> ConsentStatus {
        match self {
            Self::Approved => ConsentStatus::Approved,
            Self::Denied => ConsentStatus::Denied,
        }
    }
}

impl FromStr for ConsentDecision {
    type Err = TrustGridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Self::Approved),
            "denied" | "deny" => Ok(Self::Denied),
            other => Err(TrustGridError::BadRequest(format!(
                "invalid decision '{other}'; expected approved or denied"
            ))),
        }
    }
}

/// One evaluation of one data-access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: Uuid,
    pub citizen_username: String,
    pub organization_id: Uuid,
    pub organization_name: String,
    pub field: ProfileField,
    pub purpose: String,
    pub status: ConsentStatus,
    pub approval_method: ApprovalMethod,
    pub compliance_reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Result of a conditional (compare-and-set) storage update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalUpdate<T> {
    /// The precondition held and the new state was written.
    Applied(T),
    /// No row matched the id (or ownership scope).
    Missing,
    /// The row exists but its current state did not satisfy the precondition.
    Rejected(T),
}
