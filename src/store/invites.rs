use rusqlite::{params, Connection, Row};

use crate::db::Db;
use crate::invite::INVITE_TTL_SECS;
use crate::models::{Invite, InviteStatus};

use super::contacts::add_contact_tx;
use super::conversations::create_dm_tx;
use super::{new_id, now_ts, StoreError, StoreResult};

const INVITE_COLS: &str = "id, inviter_id, code, token, email, invitee_name, status, used_at, used_by, created_at, expires_at";

fn invite_from_row(row: &Row<'_>) -> rusqlite::Result<Invite> {
    Ok(Invite {
        id: row.get(0)?,
        inviter_id: row.get(1)?,
        code: row.get(2)?,
        token: row.get(3)?,
        email: row.get(4)?,
        invitee_name: row.get(5)?,
        status: InviteStatus::parse(&row.get::<_, String>(6)?),
        used_at: row.get(7)?,
        used_by: row.get(8)?,
        created_at: row.get(9)?,
        expires_at: row.get(10)?,
    })
}

/// One inviter's share of a redeemed bundle.
#[derive(Debug, Clone)]
pub struct RedeemedInvite {
    pub invite_id: String,
    pub inviter_id: String,
    pub conversation_id: String,
    pub dm_created: bool,
}

/// Bulk sweep: pending invites past their expiry flip to `expired`.
pub fn expire_old_invites(conn: &Connection) -> i64 {
    let now = now_ts();
    conn.execute(
        "UPDATE invites SET status = 'expired' WHERE status = 'pending' AND expires_at <= ?1",
        params![&now],
    )
    .map(|n| n as i64)
    .unwrap_or(0)
}

impl Db {
    pub fn create_invite(
        &self,
        inviter_id: &str,
        code: &str,
        token_ciphertext: &[u8],
        email: &str,
        invitee_name: Option<&str>,
    ) -> StoreResult<Invite> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let now = chrono::Utc::now();
        let created_at = now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let expires_at = (now + chrono::Duration::seconds(INVITE_TTL_SECS))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        conn.execute(
            "INSERT INTO invites (id, inviter_id, code, token, email, invitee_name, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8)",
            params![&id, inviter_id, code, token_ciphertext, email, invitee_name, &created_at, &expires_at],
        )?;
        conn.query_row(
            &format!("SELECT {INVITE_COLS} FROM invites WHERE id = ?1"),
            params![&id],
            invite_from_row,
        )
        .map_err(StoreError::from)
    }

    /// Only pending, unexpired invites resolve.
    pub fn get_invite_by_code(&self, code: &str) -> StoreResult<Invite> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT {INVITE_COLS} FROM invites
                 WHERE code = ?1 AND status = 'pending' AND expires_at > ?2"
            ),
            params![code, now_ts()],
            invite_from_row,
        )
        .map_err(StoreError::from)
    }

    /// Atomic single-use claim: exactly one concurrent redemption sees the
    /// pending row.
    pub fn use_invite(&self, invite_id: &str, used_by: &str) -> StoreResult<Invite> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        let n = conn.execute(
            "UPDATE invites SET status = 'used', used_at = ?1, used_by = ?2
             WHERE id = ?3 AND status = 'pending' AND expires_at > ?1",
            params![&now, used_by, invite_id],
        )?;
        if n == 0 {
            return Err(StoreError::Gone);
        }
        conn.query_row(
            &format!("SELECT {INVITE_COLS} FROM invites WHERE id = ?1"),
            params![invite_id],
            invite_from_row,
        )
        .map_err(StoreError::from)
    }

    pub fn get_user_invites(&self, inviter_id: &str) -> StoreResult<Vec<Invite>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INVITE_COLS} FROM invites WHERE inviter_id = ?1 ORDER BY created_at DESC"
        ))?;
        let invites = stmt
            .query_map(params![inviter_id], invite_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(invites)
    }

    /// Only the creator may revoke, and only while pending.
    pub fn revoke_invite(&self, invite_id: &str, inviter_id: &str) -> StoreResult<Invite> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE invites SET status = 'revoked' WHERE id = ?1 AND inviter_id = ?2 AND status = 'pending'",
            params![invite_id, inviter_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        conn.query_row(
            &format!("SELECT {INVITE_COLS} FROM invites WHERE id = ?1"),
            params![invite_id],
            invite_from_row,
        )
        .map_err(StoreError::from)
    }

    pub fn expire_old_invites(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        expire_old_invites(&conn)
    }

    /// Redeem every pending invite addressed to `email` for `user_id`, in one
    /// transaction: each invite is marked used and materialises a DM plus a
    /// bidirectional contact pair with its inviter. The primary invite (the
    /// one whose code was presented) must still be claimable or the whole
    /// redemption fails.
    pub fn redeem_invite_bundle(
        &self,
        primary_invite_id: &str,
        email: &str,
        user_id: &str,
    ) -> StoreResult<Vec<RedeemedInvite>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_ts();

        let claimed = tx.execute(
            "UPDATE invites SET status = 'used', used_at = ?1, used_by = ?2
             WHERE id = ?3 AND status = 'pending' AND expires_at > ?1",
            params![&now, user_id, primary_invite_id],
        )?;
        if claimed == 0 {
            return Err(StoreError::Gone);
        }

        // Sibling invites for the same email ride along; the support network
        // materialises atomically.
        let siblings: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, inviter_id FROM invites
                 WHERE email = ?1 AND status = 'pending' AND expires_at > ?2",
            )?;
            stmt.query_map(params![email, &now], |r| Ok((r.get(0)?, r.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect()
        };
        for (id, _) in &siblings {
            tx.execute(
                "UPDATE invites SET status = 'used', used_at = ?1, used_by = ?2 WHERE id = ?3",
                params![&now, user_id, id],
            )?;
        }

        let primary_inviter: String = tx.query_row(
            "SELECT inviter_id FROM invites WHERE id = ?1",
            params![primary_invite_id],
            |r| r.get(0),
        )?;

        let mut all: Vec<(String, String)> = vec![(primary_invite_id.to_string(), primary_inviter)];
        all.extend(siblings);

        let mut redeemed = Vec::with_capacity(all.len());
        for (invite_id, inviter_id) in all {
            if inviter_id == user_id {
                continue;
            }
            let (conv, dm_created) = create_dm_tx(&tx, &inviter_id, user_id)?;
            add_contact_tx(&tx, user_id, &inviter_id, "invite", Some(invite_id.as_str()))?;
            redeemed.push(RedeemedInvite {
                invite_id,
                inviter_id,
                conversation_id: conv.id,
                dm_created,
            });
        }
        tx.commit()?;
        Ok(redeemed)
    }
}
