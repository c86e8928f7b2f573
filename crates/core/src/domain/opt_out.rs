use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;

/// Stored scope key for a global opt-out row.
pub const GLOBAL_SCOPE_KEY: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "business_id")]
pub enum OptOutScope {
    Business(BusinessId),
    Global,
}

impl OptOutScope {
    pub fn storage_key(&self) -> &str {
        match self {
            Self::Business(id) => id.as_str(),
            Self::Global => GLOBAL_SCOPE_KEY,
        }
    }

    pub fn from_storage_key(value: &str) -> Self {
        if value == GLOBAL_SCOPE_KEY {
            Self::Global
        } else {
            Self::Business(BusinessId(value.to_string()))
        }
    }

    pub fn covers(&self, business_id: &BusinessId) -> bool {
        match self {
            Self::Business(id) => id == business_id,
            Self::Global => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptOut {
    pub phone: String,
    pub scope: OptOutScope,
    pub created_at: DateTime<Utc>,
}
