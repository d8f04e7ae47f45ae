use base64::Engine;
use tokio::sync::mpsc;

use wirechat::config::Config;
use wirechat::handlers::{self, Caller, SignupOutcome};
use wirechat::hub::SessionHandle;
use wirechat::protocol::{ClientFrame, Ctrl, ServerFrame};
use wirechat::AppState;

/// Wrapper that auto-deletes the temp DB on drop. Uses Option<AppState> so
/// the SQLite connection is released before the files go (WAL holds them).
pub struct TestServer {
    state: Option<AppState>,
    db_path: String,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.state.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestServer {
    type Target = AppState;
    fn deref(&self) -> &AppState {
        self.state.as_ref().unwrap()
    }
}

pub fn test_server() -> TestServer {
    test_server_with(|_| {})
}

pub fn test_server_with(tweak: impl FnOnce(&mut Config)) -> TestServer {
    // Unique temp DB for each test (avoids parallel test contention)
    let db_path = format!(
        "/tmp/wirechat_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let mut config = Config {
        db_path: db_path.clone(),
        token_key: b"fJ8sK2lQ9xVbN4mC7zR1tY6wE3uA5oPd".to_vec(),
        content_key: b"aB3dE6gH9jK2mN5pQ8sT1vW4yZ7cF0xR".to_vec(),
        invite_key: b"qW2eR4tY6uI8oP0aS1dF3gH5jK7lZ9xC".to_vec(),
        ..Config::default()
    };
    tweak(&mut config);
    TestServer {
        state: Some(AppState::new(config)),
        db_path,
    }
}

/// A recorder session: registered on the Hub like a live connection, with
/// the receive side kept for assertions.
pub struct TestSession {
    pub caller: Caller,
    rx: mpsc::Receiver<ServerFrame>,
}

impl TestSession {
    pub fn user_id(&self) -> &str {
        &self.caller.user_id
    }

    /// Next queued frame, if any.
    pub fn next_frame(&mut self) -> Option<ServerFrame> {
        self.rx.try_recv().ok()
    }

    pub fn drain(&mut self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(f) = self.rx.try_recv() {
            frames.push(f);
        }
        frames
    }
}

pub fn basic_secret(uname: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{uname}:{password}"))
}

impl TestServer {
    /// Create an account and return its user id.
    pub fn signup(&self, uname: &str, password: &str, display_name: &str) -> String {
        self.try_signup(uname, password, display_name, None)
            .expect("signup failed")
            .user
            .id
    }

    pub fn try_signup(
        &self,
        uname: &str,
        password: &str,
        display_name: &str,
        invite_code: Option<&str>,
    ) -> Result<SignupOutcome, wirechat::handlers::Fail> {
        let acc: wirechat::protocol::Account = serde_json::from_value(serde_json::json!({
            "user": "new",
            "scheme": "basic",
            "secret": basic_secret(uname, password),
            "login": true,
            "inviteCode": invite_code,
            "desc": { "public": { "fn": display_name } },
        }))
        .unwrap();
        handlers::signup(self, &acc, "test-agent")
    }

    /// Register a live recorder session for the user.
    pub fn connect(&self, user_id: &str) -> TestSession {
        let (tx, rx) = mpsc::channel(64);
        let session_id = uuid::Uuid::new_v4().to_string();
        self.hub.register(SessionHandle {
            id: session_id.clone(),
            user_id: user_id.to_string(),
            tx,
        });
        TestSession {
            caller: Caller {
                session_id,
                user_id: user_id.to_string(),
            },
            rx,
        }
    }

    /// Dispatch one frame as `sess` and apply its fan-outs through the Hub,
    /// exactly as the session loop would. Returns the ctrl ack, if any.
    pub fn exec(&self, sess: &TestSession, frame: serde_json::Value) -> Option<Ctrl> {
        let frame: ClientFrame = serde_json::from_value(frame).expect("valid client frame");
        let frame_id = frame.id.clone();
        let mut reply = handlers::dispatch(self, &sess.caller, frame);
        let ctrl = reply.take_ctrl_frame(frame_id);
        for fanout in reply.fanout {
            self.hub
                .send_to_users(&fanout.user_ids, &fanout.frame, fanout.exclude_session.as_deref());
        }
        match ctrl {
            Some(ServerFrame::Ctrl(c)) => Some(c),
            _ => None,
        }
    }

    /// Create (or find) the DM between the session's user and `other`,
    /// returning the conversation id.
    pub fn open_dm(&self, sess: &TestSession, other: &str) -> String {
        let ctrl = self
            .exec(sess, serde_json::json!({"id": "d", "dm": {"user": other}}))
            .expect("dm ctrl");
        assert!(ctrl.code == 200 || ctrl.code == 201, "dm failed: {ctrl:?}");
        ctrl.params.unwrap()["conv"]["id"].as_str().unwrap().to_string()
    }

    /// Send a text message, returning its seq.
    pub fn send_text(&self, sess: &TestSession, conv: &str, text: &str) -> i64 {
        let ctrl = self
            .exec(
                sess,
                serde_json::json!({"id": "s", "send": {"conv": conv, "content": {"v": 1, "text": text}}}),
            )
            .expect("send ctrl");
        assert_eq!(ctrl.code, 202, "send failed: {ctrl:?}");
        ctrl.params.unwrap()["seq"].as_i64().unwrap()
    }

    /// Backdate a message's creation time by `secs` seconds.
    pub fn backdate_message(&self, conv: &str, seq: i64, secs: i64) {
        let past = (chrono::Utc::now() - chrono::Duration::seconds(secs))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET created_at = ?1 WHERE conversation_id = ?2 AND seq = ?3",
            rusqlite::params![past, conv, seq],
        )
        .unwrap();
    }

    /// Backdate a read row's expiry so the next sweep flips it.
    pub fn backdate_read_expiry(&self, conv: &str, seq: i64, user_id: &str, secs: i64) {
        let past = (chrono::Utc::now() - chrono::Duration::seconds(secs))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_reads SET expires_at = ?1
             WHERE user_id = ?2 AND message_id = (SELECT id FROM messages WHERE conversation_id = ?3 AND seq = ?4)",
            rusqlite::params![past, user_id, conv, seq],
        )
        .unwrap();
    }
}

/// Assert the frame is `data` and return (conv, seq, content).
pub fn as_data(frame: &ServerFrame) -> (&str, i64, &serde_json::Value) {
    let data = frame.data().expect("expected data frame");
    (&data.conv, data.seq, &data.content)
}

/// Assert the frame is `info` with the given `what`.
pub fn as_info<'f>(frame: &'f ServerFrame, what: &str) -> &'f wirechat::protocol::Info {
    let info = frame.info().expect("expected info frame");
    assert_eq!(info.what, what, "unexpected info kind");
    info
}
