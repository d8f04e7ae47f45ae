//! Persistence operations, grouped per domain area — each in its own file,
//! all implemented as methods on [`crate::db::Db`]. The connection mutex plus
//! per-operation transactions serialise every multi-statement invariant
//! (sequence assignment, DM creation, reaction toggles, invite redemption,
//! contact pairs).

mod contacts;
mod conversations;
mod invites;
mod members;
mod messages;
mod users;

pub use messages::{expire_read_messages, RecordedRead};
pub use invites::{expire_old_invites, RedeemedInvite};

use chrono::{SecondsFormat, Utc};

/// UTC timestamp at fixed microsecond precision so lexicographic order on
/// stored strings equals time order.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("gone")]
    Gone,
    #[error("database error: {0}")]
    Sql(rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict
            }
            other => StoreError::Sql(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parse a JSON TEXT column, tolerating legacy empty strings.
pub(crate) fn parse_json(raw: Option<String>) -> serde_json::Value {
    raw.as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(serde_json::Value::Null)
}

pub(crate) fn parse_json_object(raw: Option<String>) -> serde_json::Value {
    let v = parse_json(raw);
    if v.is_object() { v } else { serde_json::json!({}) }
}
