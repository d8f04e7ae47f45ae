use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::Db;
use crate::models::{Conversation, ConversationEntry, ConversationKind, PeerInfo, Role};

use super::{new_id, now_ts, parse_json, parse_json_object, StoreError, StoreResult};

pub(crate) const CONV_COLS: &str = "id, kind, owner_id, public, last_seq, last_msg_at, disappearing_ttl, pinned_message_id, pinned_at, pinned_by, no_screenshots, created_at, updated_at";

pub(crate) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let public: Option<String> = row.get(3)?;
    Ok(Conversation {
        id: row.get(0)?,
        kind: ConversationKind::parse(&row.get::<_, String>(1)?),
        owner_id: row.get(2)?,
        public: public.filter(|s| !s.is_empty()).map(|s| parse_json(Some(s))),
        last_seq: row.get(4)?,
        last_msg_at: row.get(5)?,
        disappearing_ttl: row.get(6)?,
        pinned_message_id: row.get(7)?,
        pinned_at: row.get(8)?,
        pinned_by: row.get(9)?,
        no_screenshots: row.get::<_, i64>(10)? != 0,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Find-or-create the DM between two users, inside the caller's transaction.
/// The pair is canonicalised to `user_a < user_b`; at most one DM per pair.
pub(crate) fn create_dm_tx(conn: &Connection, u1: &str, u2: &str) -> StoreResult<(Conversation, bool)> {
    let (a, b) = if u1 < u2 { (u1, u2) } else { (u2, u1) };

    let existing: Option<String> = conn
        .query_row(
            "SELECT conversation_id FROM dm_participants WHERE user_a = ?1 AND user_b = ?2",
            params![a, b],
            |r| r.get(0),
        )
        .optional()?;

    if let Some(conv_id) = existing {
        let conv = conn.query_row(
            &format!("SELECT {CONV_COLS} FROM conversations WHERE id = ?1"),
            params![&conv_id],
            conversation_from_row,
        )?;
        // A previously-left DM is restored on revisit.
        conn.execute(
            "UPDATE members SET deleted_at = NULL, updated_at = ?1
             WHERE conversation_id = ?2 AND deleted_at IS NOT NULL",
            params![now_ts(), &conv_id],
        )?;
        return Ok((conv, false));
    }

    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO conversations (id, kind, created_at, updated_at) VALUES (?1, 'dm', ?2, ?2)",
        params![&id, &now],
    )?;
    conn.execute(
        "INSERT INTO dm_participants (conversation_id, user_a, user_b) VALUES (?1, ?2, ?3)",
        params![&id, a, b],
    )?;
    for user in [a, b] {
        conn.execute(
            "INSERT INTO members (conversation_id, user_id, role, created_at, updated_at)
             VALUES (?1, ?2, 'member', ?3, ?3)",
            params![&id, user, &now],
        )?;
    }
    let conv = conn.query_row(
        &format!("SELECT {CONV_COLS} FROM conversations WHERE id = ?1"),
        params![&id],
        conversation_from_row,
    )?;
    Ok((conv, true))
}

impl Db {
    /// Find-or-create a DM. Returns `(conversation, created)` where `created`
    /// is true iff the conversation did not exist before.
    pub fn create_dm(&self, u1: &str, u2: &str) -> StoreResult<(Conversation, bool)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = create_dm_tx(&tx, u1, u2)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn create_room(&self, owner: &str, public: Option<&serde_json::Value>) -> StoreResult<Conversation> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let id = new_id();
        let now = now_ts();
        tx.execute(
            "INSERT INTO conversations (id, kind, owner_id, public, created_at, updated_at)
             VALUES (?1, 'room', ?2, ?3, ?4, ?4)",
            params![&id, owner, public.map(|p| p.to_string()), &now],
        )?;
        tx.execute(
            "INSERT INTO members (conversation_id, user_id, role, created_at, updated_at)
             VALUES (?1, ?2, 'owner', ?3, ?3)",
            params![&id, owner, &now],
        )?;
        let conv = tx.query_row(
            &format!("SELECT {CONV_COLS} FROM conversations WHERE id = ?1"),
            params![&id],
            conversation_from_row,
        )?;
        tx.commit()?;
        Ok(conv)
    }

    pub fn get_conversation(&self, id: &str) -> StoreResult<Conversation> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {CONV_COLS} FROM conversations WHERE id = ?1"),
            params![id],
            conversation_from_row,
        )
        .map_err(StoreError::from)
    }

    /// Every conversation the user is an active member of, with the caller's
    /// membership fields, the DM peer, and the pinned message seq — one query,
    /// no per-row lookups.
    pub fn get_user_conversations(&self, user_id: &str, online: &dyn Fn(&str) -> bool) -> StoreResult<Vec<ConversationEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.kind, c.owner_id, c.public, c.last_seq, c.last_msg_at, c.disappearing_ttl,
                    c.pinned_message_id, c.pinned_at, c.pinned_by, c.no_screenshots, c.created_at, c.updated_at,
                    m.role, m.read_seq, m.recv_seq, m.clear_seq, m.favorite, m.muted, m.blocked, m.private,
                    u.id, u.public, u.last_seen,
                    pm.seq
             FROM members m
             JOIN conversations c ON c.id = m.conversation_id
             LEFT JOIN dm_participants dp ON dp.conversation_id = c.id
             LEFT JOIN users u ON u.id = CASE WHEN dp.user_a = m.user_id THEN dp.user_b ELSE dp.user_a END
             LEFT JOIN messages pm ON pm.id = c.pinned_message_id
             WHERE m.user_id = ?1 AND m.deleted_at IS NULL
             ORDER BY c.last_msg_at IS NULL, c.last_msg_at DESC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                let conversation = conversation_from_row(row)?;
                let peer_id: Option<String> = row.get(21)?;
                let peer_public: Option<String> = row.get(22)?;
                let peer_last_seen: Option<String> = row.get(23)?;
                let peer = peer_id.map(|id| {
                    let is_online = online(&id);
                    PeerInfo {
                        id,
                        public: parse_json_object(peer_public.clone()),
                        last_seen: peer_last_seen.clone(),
                        online: is_online,
                    }
                });
                let private: Option<String> = row.get(20)?;
                Ok(ConversationEntry {
                    conversation,
                    role: Role::parse(&row.get::<_, String>(13)?),
                    read_seq: row.get(14)?,
                    recv_seq: row.get(15)?,
                    clear_seq: row.get(16)?,
                    favorite: row.get::<_, i64>(17)? != 0,
                    muted: row.get::<_, i64>(18)? != 0,
                    blocked: row.get::<_, i64>(19)? != 0,
                    private: private.filter(|s| !s.is_empty()).map(|s| parse_json(Some(s))),
                    peer,
                    pinned_seq: row.get(24)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Pin (`Some(message_id)`) or unpin (`None`).
    pub fn set_pinned_message(&self, conv_id: &str, message_id: Option<&str>, pinned_by: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        let n = match message_id {
            Some(mid) => conn.execute(
                "UPDATE conversations SET pinned_message_id = ?1, pinned_at = ?2, pinned_by = ?3, updated_at = ?2
                 WHERE id = ?4",
                params![mid, &now, pinned_by, conv_id],
            )?,
            None => conn.execute(
                "UPDATE conversations SET pinned_message_id = NULL, pinned_at = NULL, pinned_by = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![&now, conv_id],
            )?,
        };
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_pinned_message_seq(&self, conv_id: &str) -> StoreResult<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let seq: Option<i64> = conn
            .query_row(
                "SELECT m.seq FROM conversations c JOIN messages m ON m.id = c.pinned_message_id
                 WHERE c.id = ?1",
                params![conv_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(seq)
    }

    /// `None` clears the conversation-level disappearing TTL.
    pub fn set_disappearing_ttl(&self, conv_id: &str, ttl: Option<i64>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE conversations SET disappearing_ttl = ?1, updated_at = ?2 WHERE id = ?3",
            params![ttl, now_ts(), conv_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_disappearing_ttl(&self, conv_id: &str) -> StoreResult<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT disappearing_ttl FROM conversations WHERE id = ?1",
            params![conv_id],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    pub fn update_room_profile(&self, conv_id: &str, public: &serde_json::Value) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE conversations SET public = ?1, updated_at = ?2 WHERE id = ?3 AND kind = 'room'",
            params![public.to_string(), now_ts(), conv_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Hand a room to a new owner: the old owner steps down to admin.
    pub fn transfer_room_owner(&self, conv_id: &str, old_owner: &str, new_owner: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_ts();
        let n = tx.execute(
            "UPDATE conversations SET owner_id = ?1, updated_at = ?2 WHERE id = ?3 AND kind = 'room' AND owner_id = ?4",
            params![new_owner, &now, conv_id, old_owner],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        tx.execute(
            "UPDATE members SET role = 'admin', updated_at = ?1 WHERE conversation_id = ?2 AND user_id = ?3",
            params![&now, conv_id, old_owner],
        )?;
        let n = tx.execute(
            "UPDATE members SET role = 'owner', updated_at = ?1
             WHERE conversation_id = ?2 AND user_id = ?3 AND deleted_at IS NULL",
            params![&now, conv_id, new_owner],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }
}
