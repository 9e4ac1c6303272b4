use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the users page shows. The full address never leaves the store layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUserRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub email_domain: Option<String>,
}

impl AdminUserRow {
    pub fn from_email(id: Uuid, created_at: DateTime<Utc>, email: Option<&str>) -> Self {
        Self {
            id,
            created_at,
            email_domain: email.and_then(email_domain),
        }
    }
}

pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.trim().rsplit_once('@')?;
    let domain = domain.trim();
    (!domain.is_empty()).then(|| domain.to_ascii_lowercase())
}
