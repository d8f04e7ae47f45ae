use rusqlite::{params, Connection, Row};

use crate::db::Db;
use crate::models::{Member, MemberEntry, ReadReceipt, Role};

use super::{now_ts, parse_json, parse_json_object, StoreError, StoreResult};

const MEMBER_COLS: &str = "conversation_id, user_id, role, read_seq, recv_seq, clear_seq, favorite, muted, blocked, private, deleted_at, created_at, updated_at";

pub(crate) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    let private: Option<String> = row.get(9)?;
    Ok(Member {
        conversation_id: row.get(0)?,
        user_id: row.get(1)?,
        role: Role::parse(&row.get::<_, String>(2)?),
        read_seq: row.get(3)?,
        recv_seq: row.get(4)?,
        clear_seq: row.get(5)?,
        favorite: row.get::<_, i64>(6)? != 0,
        muted: row.get::<_, i64>(7)? != 0,
        blocked: row.get::<_, i64>(8)? != 0,
        private: private.filter(|s| !s.is_empty()).map(|s| parse_json(Some(s))),
        deleted_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Active member ids of a conversation, inside the caller's lock.
pub(crate) fn member_user_ids_tx(conn: &Connection, conv_id: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM members WHERE conversation_id = ?1 AND deleted_at IS NULL",
    )?;
    let ids = stmt
        .query_map(params![conv_id], |r| r.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

impl Db {
    /// The membership row, whether active or soft-removed.
    pub fn get_member(&self, conv_id: &str, user_id: &str) -> StoreResult<Member> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {MEMBER_COLS} FROM members WHERE conversation_id = ?1 AND user_id = ?2"),
            params![conv_id, user_id],
            member_from_row,
        )
        .map_err(StoreError::from)
    }

    pub fn is_member(&self, conv_id: &str, user_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM members WHERE conversation_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
            params![conv_id, user_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_member_role(&self, conv_id: &str, user_id: &str) -> StoreResult<Role> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT role FROM members WHERE conversation_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
            params![conv_id, user_id],
            |r| Ok(Role::parse(&r.get::<_, String>(0)?)),
        )
        .map_err(StoreError::from)
    }

    /// Upsert: restores a soft-removed member and sets the supplied role.
    pub fn add_room_member(&self, conv_id: &str, user_id: &str, role: Role) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        conn.execute(
            "INSERT INTO members (conversation_id, user_id, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(conversation_id, user_id)
             DO UPDATE SET deleted_at = NULL, role = excluded.role, updated_at = excluded.updated_at",
            params![conv_id, user_id, role.as_str(), &now],
        )?;
        Ok(())
    }

    /// Soft delete.
    pub fn remove_member(&self, conv_id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        let n = conn.execute(
            "UPDATE members SET deleted_at = ?1, updated_at = ?1
             WHERE conversation_id = ?2 AND user_id = ?3 AND deleted_at IS NULL",
            params![&now, conv_id, user_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Monotone: `read_seq ← max(read_seq, seq)`, and `recv_seq` keeps its
    /// `recv_seq ≥ read_seq` invariant.
    pub fn update_read_seq(&self, conv_id: &str, user_id: &str, seq: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE members SET read_seq = MAX(read_seq, ?1), recv_seq = MAX(recv_seq, ?1), updated_at = ?2
             WHERE conversation_id = ?3 AND user_id = ?4 AND deleted_at IS NULL",
            params![seq, now_ts(), conv_id, user_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn update_recv_seq(&self, conv_id: &str, user_id: &str, seq: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE members SET recv_seq = MAX(recv_seq, ?1), updated_at = ?2
             WHERE conversation_id = ?3 AND user_id = ?4 AND deleted_at IS NULL",
            params![seq, now_ts(), conv_id, user_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Clamped to the conversation's `last_seq`.
    pub fn update_clear_seq(&self, conv_id: &str, user_id: &str, seq: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE members SET clear_seq = MIN(?1, (SELECT last_seq FROM conversations WHERE id = ?2)), updated_at = ?3
             WHERE conversation_id = ?2 AND user_id = ?4 AND deleted_at IS NULL",
            params![seq, conv_id, now_ts(), user_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Only non-null fields change.
    pub fn update_member_settings(
        &self,
        conv_id: &str,
        user_id: &str,
        favorite: Option<bool>,
        muted: Option<bool>,
        blocked: Option<bool>,
        private: Option<&serde_json::Value>,
    ) -> StoreResult<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut idx = 1;
        if let Some(v) = favorite {
            sets.push(format!("favorite = ?{idx}"));
            values.push(Box::new(v as i64));
            idx += 1;
        }
        if let Some(v) = muted {
            sets.push(format!("muted = ?{idx}"));
            values.push(Box::new(v as i64));
            idx += 1;
        }
        if let Some(v) = blocked {
            sets.push(format!("blocked = ?{idx}"));
            values.push(Box::new(v as i64));
            idx += 1;
        }
        if let Some(v) = private {
            sets.push(format!("private = ?{idx}"));
            values.push(Box::new(v.to_string()));
            idx += 1;
        }
        if sets.is_empty() {
            return Ok(());
        }
        sets.push(format!("updated_at = ?{idx}"));
        values.push(Box::new(now_ts()));
        idx += 1;

        let sql = format!(
            "UPDATE members SET {} WHERE conversation_id = ?{} AND user_id = ?{} AND deleted_at IS NULL",
            sets.join(", "),
            idx,
            idx + 1
        );
        values.push(Box::new(conv_id.to_string()));
        values.push(Box::new(user_id.to_string()));

        let conn = self.conn.lock().unwrap();
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let n = conn.execute(&sql, params_refs.as_slice())?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_read_receipts(&self, conv_id: &str) -> StoreResult<Vec<ReadReceipt>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, read_seq, recv_seq FROM members
             WHERE conversation_id = ?1 AND deleted_at IS NULL ORDER BY user_id",
        )?;
        let receipts = stmt
            .query_map(params![conv_id], |row| {
                Ok(ReadReceipt {
                    user_id: row.get(0)?,
                    read_seq: row.get(1)?,
                    recv_seq: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(receipts)
    }

    pub fn get_conversation_members(&self, conv_id: &str) -> StoreResult<Vec<MemberEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.user_id, m.role, u.public, m.read_seq, m.recv_seq
             FROM members m JOIN users u ON u.id = m.user_id
             WHERE m.conversation_id = ?1 AND m.deleted_at IS NULL
             ORDER BY m.created_at",
        )?;
        let members = stmt
            .query_map(params![conv_id], |row| {
                Ok(MemberEntry {
                    user_id: row.get(0)?,
                    role: Role::parse(&row.get::<_, String>(1)?),
                    public: parse_json_object(row.get(2)?),
                    read_seq: row.get(3)?,
                    recv_seq: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(members)
    }

    /// Active member ids — the fan-out audience of a conversation.
    pub fn member_user_ids(&self, conv_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        member_user_ids_tx(&conn, conv_id)
    }

    /// True if any *other* active member of the conversation has `blocked`
    /// set on their own row — the DM send gate.
    pub fn is_blocked_by_peer(&self, conv_id: &str, user_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM members
             WHERE conversation_id = ?1 AND user_id != ?2 AND blocked = 1 AND deleted_at IS NULL",
            params![conv_id, user_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Everyone who shares at least one conversation with `user_id` — the
    /// presence broadcast audience.
    pub fn get_related_user_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT other.user_id
             FROM members own
             JOIN members other ON other.conversation_id = own.conversation_id
             WHERE own.user_id = ?1 AND own.deleted_at IS NULL
               AND other.user_id != ?1 AND other.deleted_at IS NULL",
        )?;
        let ids = stmt
            .query_map(params![user_id], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}
