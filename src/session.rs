//! One session per live WebSocket connection. The session owns the
//! handshake/auth state machine, reads frames sequentially, writes the
//! caller's ack before any fan-out, and drains its bounded outbound queue as
//! the connection's single writer.

use std::time::{Duration, Instant};

use rocket::futures::{SinkExt, StreamExt};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{get, State};
use rocket_ws as ws;
use tokio::sync::mpsc;

use crate::handlers::{self, Caller, Fail, Fanout, Reply};
use crate::hub::SessionHandle;
use crate::protocol::{Account, ClientFrame, Code, Ctrl, Hello, Login, ServerFrame, Verb};
use crate::store;
use crate::AppState;

/// Protocol revision echoed in the handshake reply.
const PROTO_VERSION: &str = "1";
/// Headroom for the frame envelope around a maximum-size content payload.
const FRAME_OVERHEAD: usize = 4096;

/// Rejects upgrade requests whose Origin fails the configured allow-list.
pub struct OriginAllowed;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for OriginAllowed {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(state) = req.rocket().state::<AppState>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        match req.headers().get_one("Origin") {
            Some(origin) if !state.config.origin_allowed(origin) => {
                Outcome::Error((Status::Forbidden, ()))
            }
            _ => Outcome::Success(OriginAllowed),
        }
    }
}

#[get("/ws")]
pub fn chat_ws(ws: ws::WebSocket, state: &State<AppState>, _origin: OriginAllowed) -> ws::Channel<'static> {
    let state = state.inner().clone();
    let max = state.config.max_frame_bytes + FRAME_OVERHEAD;
    let ws = ws.config(ws::Config {
        max_message_size: Some(max),
        max_frame_size: Some(max),
        ..Default::default()
    });
    ws.channel(move |stream| Box::pin(run_session(stream, state)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    HelloReceived,
    Authenticated,
}

struct Session {
    id: String,
    phase: Phase,
    user_id: Option<String>,
    user_agent: String,
    outbound_tx: mpsc::Sender<ServerFrame>,
}

/// What one inbound frame produced: frames for the session's own stream
/// (written first), fan-outs for the hub, and whether to terminate.
#[derive(Default)]
struct FrameResult {
    write: Vec<ServerFrame>,
    fanout: Vec<Fanout>,
    close: bool,
}

impl FrameResult {
    fn reply(frame: ServerFrame) -> Self {
        FrameResult {
            write: vec![frame],
            ..Default::default()
        }
    }

    fn close_with(frame: ServerFrame) -> Self {
        FrameResult {
            write: vec![frame],
            close: true,
            ..Default::default()
        }
    }

    fn close_silent() -> Self {
        FrameResult {
            close: true,
            ..Default::default()
        }
    }
}

fn ctrl_frame(id: Option<String>, code: Code, text: Option<&str>, params: Option<serde_json::Value>) -> ServerFrame {
    ServerFrame::Ctrl(Ctrl {
        id,
        code: code.as_u16(),
        text: text.map(String::from),
        params,
        ts: store::now_ts(),
    })
}

async fn run_session(mut stream: ws::stream::DuplexStream, state: AppState) -> ws::result::Result<()> {
    let session_id = store::new_id();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerFrame>(state.config.send_queue_depth);
    let mut session = Session {
        id: session_id,
        phase: Phase::New,
        user_id: None,
        user_agent: String::new(),
        outbound_tx,
    };
    let mut heartbeat = tokio::time::interval(Duration::from_secs(state.config.heartbeat_secs.max(1)));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let idle_timeout = Duration::from_secs(state.config.idle_timeout_secs);
    let mut last_inbound = Instant::now();

    log::info!("session open session_id={}", session.id);

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                last_inbound = Instant::now();
                match message {
                    ws::Message::Text(text) => {
                        let result = handle_frame(&state, &mut session, &text).await;
                        let mut write_failed = false;
                        for frame in &result.write {
                            if write_frame(&mut stream, frame).await.is_err() {
                                write_failed = true;
                                break;
                            }
                        }
                        for fanout in &result.fanout {
                            state.hub.send_to_users(
                                &fanout.user_ids,
                                &fanout.frame,
                                fanout.exclude_session.as_deref(),
                            );
                        }
                        if result.close || write_failed {
                            break;
                        }
                    }
                    ws::Message::Binary(_) => {
                        log::info!("session close session_id={} reason=binary_frame", session.id);
                        break;
                    }
                    ws::Message::Close(_) => break,
                    // Ping/pong are answered by the transport layer.
                    _ => {}
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if write_frame(&mut stream, &frame).await.is_err() {
                            break;
                        }
                    }
                    // Queue sender dropped: the hub evicted this session.
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if last_inbound.elapsed() > idle_timeout {
                    log::info!("session close session_id={} reason=idle", session.id);
                    break;
                }
                if stream.send(ws::Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    teardown(&state, &session);
    Ok(())
}

async fn write_frame(stream: &mut ws::stream::DuplexStream, frame: &ServerFrame) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    stream.send(ws::Message::Text(json)).await.map_err(|_| ())
}

fn teardown(state: &AppState, session: &Session) {
    state.limiter.forget(&format!("frames:{}", session.id));
    if let Some(user_id) = &session.user_id {
        let went_offline = state.hub.unregister(user_id, &session.id);
        let _ = state.db.touch_last_seen(user_id, &session.user_agent);
        if went_offline {
            broadcast_presence(state, user_id, false);
        }
    }
    log::info!("session closed session_id={}", session.id);
}

/// Presence edges go to everyone sharing a conversation with the user.
fn broadcast_presence(state: &AppState, user_id: &str, online: bool) {
    let related = match state.db.get_related_user_ids(user_id) {
        Ok(ids) => ids,
        Err(e) => {
            log::warn!("presence fanout skipped user_id={user_id} error={e}");
            return;
        }
    };
    if related.is_empty() {
        return;
    }
    let mut note = crate::protocol::Info::new("presence", store::now_ts());
    note.user = Some(user_id.to_string());
    note.online = Some(online);
    if !online {
        note.last_seen = Some(store::now_ts());
    }
    state.hub.send_to_users(&related, &ServerFrame::Info(note), None);
}

async fn handle_frame(state: &AppState, session: &mut Session, text: &str) -> FrameResult {
    let limit_key = format!("frames:{}", session.id);
    if !state.limiter.check(&limit_key, state.config.messages_per_sec, 1) {
        log::info!("session close session_id={} reason=rate_limit", session.id);
        return FrameResult::close_silent();
    }

    // Unparseable JSON is a protocol error and drops the link; a well-formed
    // object with a bad payload is only a 400.
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            log::info!("session close session_id={} reason=bad_json", session.id);
            return FrameResult::close_with(ctrl_frame(
                None,
                Code::BadRequest,
                Some("malformed frame"),
                None,
            ));
        }
    };
    let fallback_id = value.get("id").and_then(|v| v.as_str()).map(String::from);
    let frame: ClientFrame = match serde_json::from_value(value) {
        Ok(f) => f,
        Err(_) => {
            return FrameResult::reply(ctrl_frame(
                fallback_id,
                Code::BadRequest,
                Some("malformed payload"),
                None,
            ));
        }
    };
    let frame_id = frame.id.clone();

    let verb = match frame.into_verb() {
        Ok(v) => v,
        Err(text) => {
            return FrameResult::reply(ctrl_frame(frame_id, Code::BadRequest, Some(text), None));
        }
    };

    match (session.phase, verb) {
        // Handshake first. Anything else on a fresh connection is fatal.
        (Phase::New, Verb::Hi(hello)) => handle_hello(session, frame_id, hello),
        (Phase::New, _) => {
            log::info!("session close session_id={} reason=no_handshake", session.id);
            FrameResult::close_with(ctrl_frame(
                frame_id,
                Code::BadRequest,
                Some("handshake required"),
                None,
            ))
        }

        // A second hi, or login on a live identity, is an illegal transition.
        (_, Verb::Hi(_)) => {
            log::info!("session close session_id={} reason=duplicate_hello", session.id);
            FrameResult::close_with(ctrl_frame(
                frame_id,
                Code::BadRequest,
                Some("handshake already done"),
                None,
            ))
        }
        (Phase::Authenticated, Verb::Login(_)) => {
            log::info!("session close session_id={} reason=duplicate_login", session.id);
            FrameResult::close_with(ctrl_frame(
                frame_id,
                Code::BadRequest,
                Some("already authenticated"),
                None,
            ))
        }

        (Phase::HelloReceived, Verb::Login(login)) => {
            handle_login(state, session, frame_id, login).await
        }
        (Phase::HelloReceived, Verb::Acc(acc)) if acc.user == "new" => {
            handle_signup(state, session, frame_id, acc).await
        }
        (Phase::HelloReceived, _) => FrameResult::reply(ctrl_frame(
            frame_id,
            Code::Unauthorized,
            Some("login required"),
            None,
        )),

        (Phase::Authenticated, verb) => dispatch_authenticated(state, session, frame_id, verb).await,
    }
}

fn handle_hello(session: &mut Session, frame_id: Option<String>, hello: Hello) -> FrameResult {
    if hello.ver.is_empty() {
        return FrameResult::reply(ctrl_frame(
            frame_id,
            Code::BadRequest,
            Some("ver required"),
            None,
        ));
    }
    session.user_agent = hello.ua.unwrap_or_default();
    session.phase = Phase::HelloReceived;
    FrameResult::reply(ctrl_frame(
        frame_id,
        Code::Ok,
        None,
        Some(serde_json::json!({
            "ver": PROTO_VERSION,
            "build": env!("CARGO_PKG_VERSION"),
            "sid": session.id,
        })),
    ))
}

async fn handle_login(
    state: &AppState,
    session: &mut Session,
    frame_id: Option<String>,
    login: Login,
) -> FrameResult {
    let state2 = state.clone();
    let ua = session.user_agent.clone();
    let scheme = login.scheme.clone();
    let outcome = tokio::task::spawn_blocking(move || match scheme.as_str() {
        "basic" => handlers::login_basic(&state2, &login.secret, &ua),
        "token" => handlers::login_token(&state2, &login.secret, &ua),
        _ => Err(Fail::new(Code::BadRequest, "unknown auth scheme")),
    })
    .await
    .unwrap_or_else(|_| Err(Fail::internal("login task failed".to_string())));

    match outcome {
        Ok((user, grant)) => {
            let mut params = serde_json::json!({
                "user": user.id,
                "token": grant.token,
                "expires": grant.expires_at,
            });
            if user.must_change_password {
                params["mustChangePassword"] = serde_json::json!(true);
            }
            bind_identity(state, session, user.id);
            FrameResult::reply(ctrl_frame(frame_id, Code::Ok, None, Some(params)))
        }
        Err(fail) => FrameResult::reply(ctrl_frame(frame_id, fail.code, Some(fail.text.as_str()), None)),
    }
}

async fn handle_signup(
    state: &AppState,
    session: &mut Session,
    frame_id: Option<String>,
    acc: Account,
) -> FrameResult {
    let state2 = state.clone();
    let ua = session.user_agent.clone();
    let outcome = tokio::task::spawn_blocking(move || handlers::signup(&state2, &acc, &ua))
        .await
        .unwrap_or_else(|_| Err(Fail::internal("signup task failed".to_string())));

    match outcome {
        Ok(outcome) => {
            let mut params = serde_json::json!({
                "user": outcome.user.id,
                "desc": { "public": outcome.user.public },
            });
            if !outcome.inviter_ids.is_empty() {
                params["inviters"] = serde_json::json!(outcome.inviter_ids);
            }
            if let Some(grant) = &outcome.grant {
                params["token"] = serde_json::json!(grant.token);
                params["expires"] = serde_json::json!(grant.expires_at);
            }
            if outcome.grant.is_some() {
                bind_identity(state, session, outcome.user.id);
            }
            FrameResult::reply(ctrl_frame(frame_id, Code::Created, None, Some(params)))
        }
        Err(fail) => FrameResult::reply(ctrl_frame(frame_id, fail.code, Some(fail.text.as_str()), None)),
    }
}

/// Bind the session to its user, register with the hub, and announce the
/// online edge if this is the user's first session.
fn bind_identity(state: &AppState, session: &mut Session, user_id: String) {
    session.phase = Phase::Authenticated;
    session.user_id = Some(user_id.clone());
    let first = state.hub.register(SessionHandle {
        id: session.id.clone(),
        user_id: user_id.clone(),
        tx: session.outbound_tx.clone(),
    });
    log::info!(
        "session authenticated session_id={} user_id={user_id}",
        session.id
    );
    if first {
        broadcast_presence(state, &user_id, true);
    }
}

async fn dispatch_authenticated(
    state: &AppState,
    session: &Session,
    frame_id: Option<String>,
    verb: Verb,
) -> FrameResult {
    let caller = Caller {
        session_id: session.id.clone(),
        user_id: session.user_id.clone().unwrap_or_default(),
    };
    let state2 = state.clone();
    // Ownership moves into the blocking pool, where store calls may block
    // freely without starving the reactor.
    let task = tokio::task::spawn_blocking(move || handlers::dispatch_verb(&state2, &caller, verb));
    let timeout = Duration::from_secs(state.config.handler_timeout_secs.max(1));
    let reply: Reply = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(join_err)) => {
            log::error!(
                "handler task failed session_id={} error={join_err}",
                session.id
            );
            return FrameResult::reply(ctrl_frame(
                frame_id,
                Code::InternalError,
                Some("internal error"),
                None,
            ));
        }
        Err(_) => {
            log::error!("handler deadline exceeded session_id={}", session.id);
            return FrameResult::reply(ctrl_frame(
                frame_id,
                Code::InternalError,
                Some("internal error"),
                None,
            ));
        }
    };

    let mut reply = reply;
    let ctrl = reply.take_ctrl_frame(frame_id);
    FrameResult {
        write: ctrl.into_iter().collect(),
        fanout: reply.fanout,
        close: false,
    }
}
