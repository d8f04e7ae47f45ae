use rusqlite::{params, Connection};

use crate::db::Db;
use crate::models::ContactEntry;

use super::{now_ts, parse_json_object, StoreError, StoreResult};

/// Insert both directions of the contact pair inside the caller's
/// transaction. Idempotent.
pub(crate) fn add_contact_tx(
    conn: &Connection,
    user_id: &str,
    contact_id: &str,
    source: &str,
    invite_id: Option<&str>,
) -> StoreResult<()> {
    let now = now_ts();
    for (a, b) in [(user_id, contact_id), (contact_id, user_id)] {
        conn.execute(
            "INSERT OR IGNORE INTO contacts (user_id, contact_id, source, invite_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![a, b, source, invite_id, &now],
        )?;
    }
    Ok(())
}

impl Db {
    /// Bidirectional: `(A,B)` and `(B,A)` are created together.
    pub fn add_contact(
        &self,
        user_id: &str,
        contact_id: &str,
        source: &str,
        invite_id: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        add_contact_tx(&tx, user_id, contact_id, source, invite_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Removes both directions together.
    pub fn remove_contact(&self, user_id: &str, contact_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for (a, b) in [(user_id, contact_id), (contact_id, user_id)] {
            removed += tx.execute(
                "DELETE FROM contacts WHERE user_id = ?1 AND contact_id = ?2",
                params![a, b],
            )?;
        }
        tx.commit()?;
        if removed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Nicknames are private to the owning direction; `None` clears.
    pub fn update_contact_nickname(
        &self,
        user_id: &str,
        contact_id: &str,
        nickname: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE contacts SET nickname = ?1 WHERE user_id = ?2 AND contact_id = ?3",
            params![nickname, user_id, contact_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// The caller's own rows only.
    pub fn get_contacts(&self, user_id: &str, online: &dyn Fn(&str) -> bool) -> StoreResult<Vec<ContactEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.contact_id, c.source, c.nickname, u.public, c.created_at
             FROM contacts c JOIN users u ON u.id = c.contact_id
             WHERE c.user_id = ?1
             ORDER BY c.created_at",
        )?;
        let contacts = stmt
            .query_map(params![user_id], |row| {
                let contact_id: String = row.get(0)?;
                let is_online = online(&contact_id);
                Ok(ContactEntry {
                    user_id: contact_id,
                    source: row.get(1)?,
                    nickname: row.get(2)?,
                    public: parse_json_object(row.get(3)?),
                    online: is_online,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(contacts)
    }

    pub fn has_contact(&self, user_id: &str, contact_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM contacts WHERE user_id = ?1 AND contact_id = ?2",
            params![user_id, contact_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}
