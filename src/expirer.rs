//! Background expiry sweeps: read view-once / disappearing messages past
//! their TTL, and stale pending invites. Clients discover message expiry on
//! their next fetch — there is no push.

use rusqlite::Connection;

use crate::db::PRAGMAS;
use crate::store::{expire_old_invites, expire_read_messages};

/// Delay before the first sweep, so the server finishes starting up.
const STARTUP_DELAY_SECS: u64 = 5;

/// Spawns the sweep loop on its own database connection.
pub fn spawn_expirer(db_path: String, interval_secs: u64) {
    tokio::spawn(async move {
        let conn = match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("expirer: failed to open DB: {e}");
                return;
            }
        };
        conn.execute_batch(PRAGMAS).ok();

        tokio::time::sleep(std::time::Duration::from_secs(STARTUP_DELAY_SECS)).await;

        loop {
            let (reads, invites) = run_sweep(&conn);
            if reads > 0 || invites > 0 {
                log::info!("expirer: expired_reads={reads} expired_invites={invites}");
            }
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs.max(1))).await;
        }
    });
}

/// One sweep. Returns (expired read rows, expired invites).
pub fn run_sweep(conn: &Connection) -> (i64, i64) {
    (expire_read_messages(conn), expire_old_invites(conn))
}
