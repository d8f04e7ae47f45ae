use rusqlite::{params, OptionalExtension, Row};

use crate::db::Db;
use crate::models::{AuthRecord, User, UserState};

use super::{new_id, now_ts, parse_json_object, StoreError, StoreResult};

const USER_COLS: &str = "id, created_at, updated_at, state, public, email, email_verified, last_seen, user_agent, must_change_password";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        state: UserState::parse(&row.get::<_, String>(3)?),
        public: parse_json_object(row.get(4)?),
        email: row.get(5)?,
        email_verified: row.get::<_, i64>(6)? != 0,
        last_seen: row.get(7)?,
        user_agent: row.get(8)?,
        must_change_password: row.get::<_, i64>(9)? != 0,
    })
}

impl Db {
    pub fn create_user(
        &self,
        public: &serde_json::Value,
        must_change_password: bool,
        email: Option<&str>,
        email_verified: bool,
    ) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let now = now_ts();
        conn.execute(
            "INSERT INTO users (id, created_at, updated_at, state, public, email, email_verified, user_agent, must_change_password)
             VALUES (?1, ?2, ?2, 'ok', ?3, ?4, ?5, '', ?6)",
            params![
                &id,
                &now,
                public.to_string(),
                email,
                email_verified as i64,
                must_change_password as i64
            ],
        )?;
        drop(conn);
        self.get_user(&id)
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .map_err(StoreError::from)
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE email = ?1"),
            params![email],
            user_from_row,
        )
        .map_err(StoreError::from)
    }

    pub fn create_auth_basic(&self, user_id: &str, uname: &str, secret_hash: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auth (user_id, scheme, secret, uname) VALUES (?1, 'basic', ?2, ?3)",
            params![user_id, secret_hash, uname],
        )?;
        Ok(())
    }

    pub fn get_auth_by_username(&self, uname: &str) -> StoreResult<AuthRecord> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, scheme, secret, uname FROM auth WHERE scheme = 'basic' AND uname = ?1",
            params![uname],
            |row| {
                Ok(AuthRecord {
                    user_id: row.get(0)?,
                    scheme: row.get(1)?,
                    secret: row.get(2)?,
                    uname: row.get(3)?,
                })
            },
        )
        .map_err(StoreError::from)
    }

    pub fn get_auth_by_user(&self, user_id: &str) -> StoreResult<AuthRecord> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, scheme, secret, uname FROM auth WHERE scheme = 'basic' AND user_id = ?1",
            params![user_id],
            |row| {
                Ok(AuthRecord {
                    user_id: row.get(0)?,
                    scheme: row.get(1)?,
                    secret: row.get(2)?,
                    uname: row.get(3)?,
                })
            },
        )
        .map_err(StoreError::from)
    }

    pub fn update_password(&self, user_id: &str, secret_hash: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE auth SET secret = ?1 WHERE user_id = ?2 AND scheme = 'basic'",
            params![secret_hash, user_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn clear_must_change_password(&self, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET must_change_password = 0, updated_at = ?1 WHERE id = ?2",
            params![now_ts(), user_id],
        )?;
        Ok(())
    }

    pub fn set_email_verification_token(&self, user_id: &str, token: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE users SET email_token = ?1, updated_at = ?2 WHERE id = ?3",
            params![token, now_ts(), user_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Consume a verification token: marks the email verified and clears the
    /// token. Returns the verified user's id.
    pub fn verify_email_by_token(&self, token: &str) -> StoreResult<String> {
        let conn = self.conn.lock().unwrap();
        let user_id: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE email_token = ?1",
                params![token],
                |r| r.get(0),
            )
            .optional()?;
        let user_id = user_id.ok_or(StoreError::NotFound)?;
        conn.execute(
            "UPDATE users SET email_verified = 1, email_token = NULL, updated_at = ?1 WHERE id = ?2",
            params![now_ts(), &user_id],
        )?;
        Ok(user_id)
    }

    pub fn mark_email_verified(&self, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET email_verified = 1, updated_at = ?1 WHERE id = ?2",
            params![now_ts(), user_id],
        )?;
        Ok(())
    }

    /// Case-insensitive substring match on the display name inside `public`.
    /// Limit is clamped to [1, 20].
    pub fn search_users(&self, query: &str, limit: i64) -> StoreResult<Vec<User>> {
        let limit = limit.clamp(1, 20);
        let pattern = format!("%{}%", query.to_lowercase());
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLS} FROM users
             WHERE state = 'ok' AND LOWER(COALESCE(json_extract(public, '$.fn'), '')) LIKE ?1
             ORDER BY json_extract(public, '$.fn') LIMIT ?2"
        ))?;
        let users = stmt
            .query_map(params![pattern, limit], user_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(users)
    }

    pub fn touch_last_seen(&self, user_id: &str, user_agent: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        conn.execute(
            "UPDATE users SET last_seen = ?1, user_agent = ?2, updated_at = ?1 WHERE id = ?3",
            params![&now, user_agent, user_id],
        )?;
        Ok(())
    }
}
