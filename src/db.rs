use rusqlite::Connection;
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

pub const PRAGMAS: &str = "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;";

/// Full schema, applied as migration version 1. `schema_version` rows are
/// append-only; `migrate` runs every batch above the current version.
const SCHEMA_V1: &str = "
    CREATE TABLE users (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'ok',
        public TEXT NOT NULL DEFAULT '{}',
        email TEXT UNIQUE,
        email_verified INTEGER NOT NULL DEFAULT 0,
        email_token TEXT,
        last_seen TEXT,
        user_agent TEXT NOT NULL DEFAULT '',
        must_change_password INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE auth (
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        scheme TEXT NOT NULL,
        secret TEXT NOT NULL,
        uname TEXT,
        PRIMARY KEY (user_id, scheme),
        UNIQUE (scheme, uname)
    );

    CREATE TABLE conversations (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        owner_id TEXT REFERENCES users(id),
        public TEXT,
        last_seq INTEGER NOT NULL DEFAULT 0,
        last_msg_at TEXT,
        disappearing_ttl INTEGER,
        pinned_message_id TEXT,
        pinned_at TEXT,
        pinned_by TEXT,
        no_screenshots INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE dm_participants (
        conversation_id TEXT PRIMARY KEY REFERENCES conversations(id) ON DELETE CASCADE,
        user_a TEXT NOT NULL,
        user_b TEXT NOT NULL,
        UNIQUE (user_a, user_b),
        CHECK (user_a < user_b)
    );

    CREATE TABLE members (
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id),
        role TEXT NOT NULL DEFAULT 'member',
        read_seq INTEGER NOT NULL DEFAULT 0,
        recv_seq INTEGER NOT NULL DEFAULT 0,
        clear_seq INTEGER NOT NULL DEFAULT 0,
        favorite INTEGER NOT NULL DEFAULT 0,
        muted INTEGER NOT NULL DEFAULT 0,
        blocked INTEGER NOT NULL DEFAULT 0,
        private TEXT,
        deleted_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (conversation_id, user_id)
    );
    CREATE INDEX idx_members_user ON members(user_id);

    CREATE TABLE messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        seq INTEGER NOT NULL,
        from_user_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        content BLOB NOT NULL,
        head TEXT NOT NULL DEFAULT '{}',
        deleted_at TEXT,
        view_once INTEGER NOT NULL DEFAULT 0,
        view_once_ttl INTEGER,
        UNIQUE (conversation_id, seq)
    );
    CREATE INDEX idx_messages_conv_seq ON messages(conversation_id, seq);

    CREATE TABLE message_deletions (
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        deleted_at TEXT NOT NULL,
        PRIMARY KEY (message_id, user_id)
    );

    CREATE TABLE message_reads (
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        read_at TEXT NOT NULL,
        expires_at TEXT,
        expired INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (message_id, user_id)
    );
    CREATE INDEX idx_message_reads_expiry ON message_reads(expired, expires_at);

    CREATE TABLE invites (
        id TEXT PRIMARY KEY,
        inviter_id TEXT NOT NULL REFERENCES users(id),
        code TEXT NOT NULL UNIQUE,
        token BLOB NOT NULL,
        email TEXT NOT NULL,
        invitee_name TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        used_at TEXT,
        used_by TEXT,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX idx_invites_email ON invites(email, status);

    CREATE TABLE contacts (
        user_id TEXT NOT NULL REFERENCES users(id),
        contact_id TEXT NOT NULL REFERENCES users(id),
        source TEXT NOT NULL,
        nickname TEXT,
        invite_id TEXT,
        created_at TEXT NOT NULL,
        PRIMARY KEY (user_id, contact_id)
    );
";

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch(PRAGMAS).expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )
        .expect("Failed to create schema_version table");

        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
            .unwrap_or(0);

        let migrations: &[(i64, &str)] = &[(1, SCHEMA_V1)];
        for (version, sql) in migrations {
            if *version > current {
                conn.execute_batch(sql).expect("Failed to run migration");
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
                )
                .expect("Failed to record migration");
            }
        }
    }
}
