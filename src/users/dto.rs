use serde::Serialize;
use time::OffsetDateTime;

use crate::users::repo::User;

/// Public part of the user returned to clients. Built by explicit projection
/// so the password and refresh-token hashes never leave the service boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub nickname: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            created_at: user.created_at,
        }
    }
}
