use crate::error::TrustGridError;
use crate::types::{FieldGroup, OrgCategory, ProfileField};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Category/field necessity table.
///
/// A field may be requested by an organization only if its category lists the
/// field. This check runs locally before any advisory call, so an advisory
/// verdict can narrow access but never widen it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFieldPolicy {
    pub rules: BTreeMap<OrgCategory, BTreeSet<ProfileField>>,
}

impl CategoryFieldPolicy {
    pub fn from_json(raw: &str) -> Result<Self, TrustGridError> {
        serde_json::from_str(raw)
            .map_err(|e| TrustGridError::BadRequest(format!("invalid allow-list json: {e}")))
    }

    pub fn permits(&self, category: OrgCategory, field: ProfileField) -> bool {
        self.rules
            .get(&category)
            .map(|fields| fields.contains(&field))
            .unwrap_or(false)
    }

    /// Returns the violation reason when the field is not proportionate for
    /// the category.
    pub fn check(&self, category: OrgCategory, field: ProfileField) -> Result<(), String> {
        if self.permits(category, field) {
            Ok(())
        } else {
            Err(format!(
                "field '{}' is not necessary for a {} organization",
                field.as_str(),
                category.as_str()
            ))
        }
    }
}

impl Default for CategoryFieldPolicy {
    fn default() -> Self {
        let mut rules: BTreeMap<OrgCategory, BTreeSet<ProfileField>> = BTreeMap::new();
        for category in OrgCategory::ALL {
            let fields = ProfileField::ALL
                .into_iter()
                .filter(|field| default_permits(category, *field))
                .collect();
            rules.insert(category, fields);
        }
        Self { rules }
    }
}

fn default_permits(category: OrgCategory, field: ProfileField) -> bool {
    use OrgCategory::*;

    match field {
        ProfileField::Gender => category != Gaming,
        ProfileField::EmergencyContact => matches!(category, Healthcare | Fintech),
        _ => match field.group() {
            FieldGroup::Personal => true,
            FieldGroup::Address => matches!(category, Fintech | ECommerce | Healthcare | Other),
            FieldGroup::NationalIdentity => matches!(category, Fintech | Healthcare),
            FieldGroup::Financial => category == Fintech,
            FieldGroup::Health => category == Healthcare,
            FieldGroup::Social => matches!(category, SocialMedia | Dating),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn national_identity_is_limited_to_fintech_and_healthcare() {
        let policy = CategoryFieldPolicy::default();
        for category in OrgCategory::ALL {
            let expected = matches!(category, OrgCategory::Fintech | OrgCategory::Healthcare);
            assert_eq!(policy.permits(category, ProfileField::Bvn), expected);
            assert_eq!(policy.permits(category, ProfileField::Nin), expected);
        }
    }

    #[test]
    fn contact_fields_are_open_to_every_category() {
        let policy = CategoryFieldPolicy::default();
        for category in OrgCategory::ALL {
            assert!(policy.permits(category, ProfileField::Email));
            assert!(policy.permits(category, ProfileField::DateOfBirth));
        }
        assert!(!policy.permits(OrgCategory::Gaming, ProfileField::Gender));
        assert!(policy.permits(OrgCategory::Fintech, ProfileField::EmergencyContact));
        assert!(!policy.permits(OrgCategory::Fintech, ProfileField::BloodType));
    }

    #[test]
    fn check_reports_category_in_reason() {
        let policy = CategoryFieldPolicy::default();
        let reason = policy
            .check(OrgCategory::Gaming, ProfileField::Bvn)
            .unwrap_err();
        assert!(reason.contains("bvn"));
        assert!(reason.contains("Gaming"));
    }

    #[test]
    fn loads_from_json() {
        let policy = CategoryFieldPolicy::from_json(
            r#"{"rules": {"Dating": ["first_name", "gender"], "Social Media": []}}"#,
        )
        .unwrap();
        assert!(policy.permits(OrgCategory::Dating, ProfileField::Gender));
        assert!(!policy.permits(OrgCategory::Dating, ProfileField::Email));
        assert!(!policy.permits(OrgCategory::Fintech, ProfileField::Email));

        assert!(matches!(
            CategoryFieldPolicy::from_json(r#"{"rules": {"Dating": ["shoe_size"]}}"#),
            Err(TrustGridError::BadRequest(_))
        ));
    }
}
