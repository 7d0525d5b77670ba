//! Account listings for the admin endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use electrokart_core::{Role, UserId};

/// A user as listed by `GET /admin/users`.
///
/// The email is kept as a plain string: admin listings show whatever the
/// backend stored, valid or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(alias = "userId")]
    pub id: UserId,
    #[serde(alias = "name")]
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
