use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::Db;
use crate::models::Message;

use super::{new_id, now_ts, parse_json_object, StoreError, StoreResult};

const MSG_COLS: &str = "id, conversation_id, seq, from_user_id, created_at, updated_at, content, head, deleted_at, view_once, view_once_ttl";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        seq: row.get(2)?,
        from_user_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        content: row.get(6)?,
        head: parse_json_object(row.get(7)?),
        deleted_at: row.get(8)?,
        view_once: row.get::<_, i64>(9)? != 0,
        view_once_ttl: row.get(10)?,
    })
}

/// A read row inserted by `record_reads_up_to`.
#[derive(Debug, Clone)]
pub struct RecordedRead {
    pub message_id: String,
    pub seq: i64,
    pub expires_at: Option<String>,
}

fn expiry_for(view_once: bool, view_once_ttl: Option<i64>, conv_ttl: Option<i64>) -> Option<String> {
    let ttl = if view_once { view_once_ttl.or(conv_ttl) } else { conv_ttl }?;
    Some(
        (Utc::now() + Duration::seconds(ttl)).to_rfc3339_opts(SecondsFormat::Micros, true),
    )
}

/// Bulk sweep: flips every due read row to `expired`. Runs on its own
/// connection from the expirer as well as through the `Db` method.
pub fn expire_read_messages(conn: &Connection) -> i64 {
    let now = now_ts();
    conn.execute(
        "UPDATE message_reads SET expired = 1
         WHERE expired = 0 AND expires_at IS NOT NULL AND expires_at <= ?1",
        params![&now],
    )
    .map(|n| n as i64)
    .unwrap_or(0)
}

impl Db {
    pub fn create_message(
        &self,
        conv_id: &str,
        from: &str,
        content: &[u8],
        head: &serde_json::Value,
    ) -> StoreResult<Message> {
        self.insert_message(conv_id, from, content, head, false, None)
    }

    pub fn create_message_with_view_once(
        &self,
        conv_id: &str,
        from: &str,
        content: &[u8],
        head: &serde_json::Value,
        view_once_ttl: Option<i64>,
    ) -> StoreResult<Message> {
        self.insert_message(conv_id, from, content, head, true, view_once_ttl)
    }

    /// The sequence-assignment transaction: advance `last_seq` by exactly one
    /// and insert the row with the returned value; commit-or-rollback.
    fn insert_message(
        &self,
        conv_id: &str,
        from: &str,
        content: &[u8],
        head: &serde_json::Value,
        view_once: bool,
        view_once_ttl: Option<i64>,
    ) -> StoreResult<Message> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_ts();
        let n = tx.execute(
            "UPDATE conversations SET last_seq = last_seq + 1, last_msg_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![&now, conv_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        let seq: i64 = tx.query_row(
            "SELECT last_seq FROM conversations WHERE id = ?1",
            params![conv_id],
            |r| r.get(0),
        )?;
        let id = new_id();
        tx.execute(
            "INSERT INTO messages (id, conversation_id, seq, from_user_id, created_at, updated_at, content, head, view_once, view_once_ttl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8, ?9)",
            params![
                &id,
                conv_id,
                seq,
                from,
                &now,
                content,
                head.to_string(),
                view_once as i64,
                view_once_ttl
            ],
        )?;
        let msg = tx.query_row(
            &format!("SELECT {MSG_COLS} FROM messages WHERE id = ?1"),
            params![&id],
            message_from_row,
        )?;
        tx.commit()?;
        Ok(msg)
    }

    /// Live history for one viewer: `seq ∈ (max(clear_seq, 0), before)`
    /// descending (`before = 0` means unbounded above), excluding rows the
    /// viewer deleted for themselves and rows whose read has expired for
    /// them. Limit clamps to [1, 100], defaulting to 50 when `≤ 0`.
    pub fn get_messages(
        &self,
        conv_id: &str,
        viewer: &str,
        before: i64,
        limit: i64,
        clear_seq: i64,
    ) -> StoreResult<Vec<Message>> {
        let limit = if limit <= 0 { 50 } else { limit.clamp(1, 100) };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MSG_COLS} FROM messages
             WHERE conversation_id = ?1 AND seq > ?2
               AND (?3 = 0 OR seq < ?3)
               AND NOT EXISTS (SELECT 1 FROM message_deletions d
                               WHERE d.message_id = messages.id AND d.user_id = ?4)
               AND NOT EXISTS (SELECT 1 FROM message_reads r
                               WHERE r.message_id = messages.id AND r.user_id = ?4 AND r.expired = 1)
             ORDER BY seq DESC LIMIT ?5"
        ))?;
        let messages = stmt
            .query_map(params![conv_id, clear_seq, before, viewer, limit], message_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    pub fn get_message_by_seq(&self, conv_id: &str, seq: i64) -> StoreResult<Message> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {MSG_COLS} FROM messages WHERE conversation_id = ?1 AND seq = ?2"),
            params![conv_id, seq],
            message_from_row,
        )
        .map_err(StoreError::from)
    }

    pub fn get_message_by_id(&self, id: &str) -> StoreResult<Message> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {MSG_COLS} FROM messages WHERE id = ?1"),
            params![id],
            message_from_row,
        )
        .map_err(StoreError::from)
    }

    /// Replace content and advance `head.edit_count` / `head.edited_at`
    /// atomically with the content write.
    pub fn edit_message(&self, conv_id: &str, seq: i64, new_content: &[u8]) -> StoreResult<Message> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let (id, mut head) = load_head(&tx, conv_id, seq)?;
        let now = now_ts();
        let count = head.get("edit_count").and_then(|v| v.as_i64()).unwrap_or(0);
        head["edit_count"] = serde_json::json!(count + 1);
        head["edited_at"] = serde_json::json!(&now);
        tx.execute(
            "UPDATE messages SET content = ?1, head = ?2, updated_at = ?3 WHERE id = ?4",
            params![new_content, head.to_string(), &now, &id],
        )?;
        let msg = tx.query_row(
            &format!("SELECT {MSG_COLS} FROM messages WHERE id = ?1"),
            params![&id],
            message_from_row,
        )?;
        tx.commit()?;
        Ok(msg)
    }

    /// Retract for everyone and flag the tombstone as unsent.
    pub fn unsend_message(&self, conv_id: &str, seq: i64) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let (id, mut head) = load_head(&tx, conv_id, seq)?;
        let now = now_ts();
        head["unsent"] = serde_json::json!(true);
        tx.execute(
            "UPDATE messages SET deleted_at = ?1, head = ?2, updated_at = ?1 WHERE id = ?3",
            params![&now, head.to_string(), &id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_message_for_everyone(&self, conv_id: &str, seq: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ts();
        let n = conn.execute(
            "UPDATE messages SET deleted_at = ?1, updated_at = ?1
             WHERE conversation_id = ?2 AND seq = ?3 AND deleted_at IS NULL",
            params![&now, conv_id, seq],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Per-user hide. Idempotent.
    pub fn delete_message_for_user(&self, message_id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO message_deletions (message_id, user_id, deleted_at) VALUES (?1, ?2, ?3)",
            params![message_id, user_id, now_ts()],
        )?;
        Ok(())
    }

    /// Toggle under the row lock: present `(emoji, user)` is removed, absent
    /// is added. Empty emoji lists and an empty reactions map are pruned.
    /// Returns `(added, head)`.
    pub fn add_reaction(
        &self,
        conv_id: &str,
        seq: i64,
        user_id: &str,
        emoji: &str,
    ) -> StoreResult<(bool, serde_json::Value)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let (id, mut head) = load_head(&tx, conv_id, seq)?;

        let mut reactions = head
            .get("reactions")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let mut users: Vec<String> = reactions
            .get(emoji)
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let added = if let Some(pos) = users.iter().position(|u| u == user_id) {
            users.remove(pos);
            false
        } else {
            users.push(user_id.to_string());
            true
        };

        if users.is_empty() {
            reactions.remove(emoji);
        } else {
            reactions.insert(emoji.to_string(), serde_json::json!(users));
        }
        if reactions.is_empty() {
            if let Some(obj) = head.as_object_mut() {
                obj.remove("reactions");
            }
        } else {
            head["reactions"] = serde_json::Value::Object(reactions);
        }

        tx.execute(
            "UPDATE messages SET head = ?1, updated_at = ?2 WHERE id = ?3",
            params![head.to_string(), now_ts(), &id],
        )?;
        tx.commit()?;
        Ok((added, head))
    }

    /// First-read-wins read receipt for one message. Noop when the reader is
    /// the sender. `expires_at` is computed once, here.
    pub fn record_message_read(&self, message_id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, bool, Option<i64>, String)> = conn
            .query_row(
                "SELECT m.from_user_id, m.view_once, m.view_once_ttl, m.conversation_id
                 FROM messages m WHERE m.id = ?1",
                params![message_id],
                |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let (from, view_once, view_once_ttl, conv_id) = row.ok_or(StoreError::NotFound)?;
        if from == user_id {
            return Ok(());
        }
        let conv_ttl: Option<i64> = conn.query_row(
            "SELECT disappearing_ttl FROM conversations WHERE id = ?1",
            params![&conv_id],
            |r| r.get(0),
        )?;
        let expires_at = expiry_for(view_once, view_once_ttl, conv_ttl);
        conn.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![message_id, user_id, now_ts(), expires_at],
        )?;
        Ok(())
    }

    /// Record reads for every not-yet-read message from other senders with
    /// `seq ≤ upto_seq`, in one transaction. This is where view-once and
    /// disappearing TTL clocks start.
    pub fn record_reads_up_to(
        &self,
        conv_id: &str,
        user_id: &str,
        upto_seq: i64,
    ) -> StoreResult<Vec<RecordedRead>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let conv_ttl: Option<i64> = tx.query_row(
            "SELECT disappearing_ttl FROM conversations WHERE id = ?1",
            params![conv_id],
            |r| r.get(0),
        )?;
        let candidates: Vec<(String, i64, bool, Option<i64>)> = {
            let mut stmt = tx.prepare(
                "SELECT m.id, m.seq, m.view_once, m.view_once_ttl FROM messages m
                 WHERE m.conversation_id = ?1 AND m.seq <= ?2 AND m.from_user_id != ?3
                   AND m.deleted_at IS NULL
                   AND NOT EXISTS (SELECT 1 FROM message_reads r
                                   WHERE r.message_id = m.id AND r.user_id = ?3)
                 ORDER BY m.seq",
            )?;
            stmt.query_map(params![conv_id, upto_seq, user_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get::<_, i64>(2)? != 0, r.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect()
        };
        let now = now_ts();
        let mut recorded = Vec::with_capacity(candidates.len());
        for (message_id, seq, view_once, view_once_ttl) in candidates {
            let expires_at = expiry_for(view_once, view_once_ttl, conv_ttl);
            tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![&message_id, user_id, &now, &expires_at],
            )?;
            recorded.push(RecordedRead {
                message_id,
                seq,
                expires_at,
            });
        }
        tx.commit()?;
        Ok(recorded)
    }

    pub fn is_message_expired_for_user(&self, message_id: &str, user_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let expired: Option<i64> = conn
            .query_row(
                "SELECT expired FROM message_reads WHERE message_id = ?1 AND user_id = ?2",
                params![message_id, user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(expired == Some(1))
    }

    pub fn expire_read_messages(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        expire_read_messages(&conn)
    }
}

/// Lock a live message's head for read-modify-write inside `tx`.
fn load_head(tx: &Connection, conv_id: &str, seq: i64) -> StoreResult<(String, serde_json::Value)> {
    let row: Option<(String, Option<String>, Option<String>)> = tx
        .query_row(
            "SELECT id, head, deleted_at FROM messages WHERE conversation_id = ?1 AND seq = ?2",
            params![conv_id, seq],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (id, head, deleted_at) = row.ok_or(StoreError::NotFound)?;
    if deleted_at.is_some() {
        return Err(StoreError::Gone);
    }
    Ok((id, parse_json_object(head)))
}
