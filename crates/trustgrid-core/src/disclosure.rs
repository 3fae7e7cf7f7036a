use crate::error::TrustGridError;
use crate::storage::{CitizenStorage, Storage};
use crate::types::ProfileField;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One released field. `value` is `None` when the citizen never set it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disclosure {
    pub field: ProfileField,
    pub value: Option<String>,
}

/// Fetch-on-read lookup of a single profile field. Values are never copied
/// into consent records.
#[derive(Clone)]
pub struct DisclosureResolver {
    storage: Arc<dyn Storage>,
}

impl DisclosureResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn resolve(
        &self,
        username: &str,
        field: ProfileField,
    ) -> Result<Disclosure, TrustGridError> {
        let citizen = self
            .storage
            .get_citizen(username)
            .await?
            .ok_or_else(|| TrustGridError::not_found("citizen", username))?;

        Ok(Disclosure {
            field,
            value: citizen.profile.get(&field).cloned(),
        })
    }
}
