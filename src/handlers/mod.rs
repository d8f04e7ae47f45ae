//! The business layer: one module per verb family. Every handler follows the
//! same shape — authenticate, validate, authorize against the store, mutate,
//! reply, fan out — and returns its effects as a [`Reply`] so the session
//! can write the caller's ack before the Hub delivers to anyone else.

mod account;
mod contact;
mod dm;
mod get;
mod invite;
mod message;
mod pin;
mod read;
mod room;
mod search;

pub use account::{login_basic, login_token, signup, SignupOutcome};

use std::time::Instant;

use crate::models::{Conversation, Member};
use crate::protocol::{Code, ClientFrame, Ctrl, Info, ServerFrame, Verb};
use crate::store::{self, StoreError};
use crate::AppState;

/// The authenticated identity behind a dispatched frame.
#[derive(Debug, Clone)]
pub struct Caller {
    pub session_id: String,
    pub user_id: String,
}

/// A request failure: the code and stable text sent to the client, plus an
/// optional internal detail that goes to the log only.
#[derive(Debug)]
pub struct Fail {
    pub code: Code,
    pub text: String,
    detail: Option<String>,
}

impl Fail {
    pub fn new(code: Code, text: &str) -> Self {
        Fail {
            code,
            text: text.to_string(),
            detail: None,
        }
    }

    pub fn internal(detail: String) -> Self {
        Fail {
            code: Code::InternalError,
            text: "internal error".to_string(),
            detail: Some(detail),
        }
    }
}

impl From<StoreError> for Fail {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Fail::new(Code::NotFound, "not found"),
            StoreError::Conflict => Fail::new(Code::Conflict, "already exists"),
            StoreError::Gone => Fail::new(Code::Gone, "gone"),
            StoreError::Sql(err) => Fail::internal(format!("store: {err}")),
            StoreError::Corrupt(detail) => Fail::internal(format!("corrupt row: {detail}")),
        }
    }
}

impl From<crate::codec::CodecError> for Fail {
    fn from(e: crate::codec::CodecError) -> Self {
        Fail::internal(format!("codec: {e}"))
    }
}

/// The body of the caller's `ctrl` ack; the dispatcher attaches frame id and
/// timestamp.
#[derive(Debug)]
pub struct CtrlBody {
    pub code: Code,
    pub text: Option<String>,
    pub params: Option<serde_json::Value>,
}

/// One outbound broadcast: a frame for every live session of the listed
/// users, minus an optionally excluded session.
#[derive(Debug)]
pub struct Fanout {
    pub user_ids: Vec<String>,
    pub frame: ServerFrame,
    pub exclude_session: Option<String>,
}

/// A handler's effects. The session writes `ctrl` first, then applies the
/// fan-outs in order.
#[derive(Debug, Default)]
pub struct Reply {
    pub ctrl: Option<CtrlBody>,
    pub fanout: Vec<Fanout>,
}

impl Reply {
    pub fn ok(code: Code) -> Self {
        Reply {
            ctrl: Some(CtrlBody {
                code,
                text: None,
                params: None,
            }),
            fanout: Vec::new(),
        }
    }

    pub fn with_params(code: Code, params: serde_json::Value) -> Self {
        Reply {
            ctrl: Some(CtrlBody {
                code,
                text: None,
                params: Some(params),
            }),
            fanout: Vec::new(),
        }
    }

    /// No ctrl ack — `typing` and `recv` only.
    pub fn silent() -> Self {
        Reply::default()
    }

    pub fn and_info(mut self, user_ids: Vec<String>, info: Info, exclude_session: Option<String>) -> Self {
        if !user_ids.is_empty() {
            self.fanout.push(Fanout {
                user_ids,
                frame: ServerFrame::Info(info),
                exclude_session,
            });
        }
        self
    }

    pub fn and_data(mut self, user_ids: Vec<String>, data: crate::protocol::Data) -> Self {
        if !user_ids.is_empty() {
            self.fanout.push(Fanout {
                user_ids,
                frame: ServerFrame::Data(data),
                exclude_session: None,
            });
        }
        self
    }
}

pub type HandlerResult = Result<Reply, Fail>;

/// Route an authenticated frame. Always yields a `Reply`; failures become
/// the error `ctrl`. The detailed cause is logged under a trace id, never
/// sent to the client.
pub fn dispatch(state: &AppState, caller: &Caller, frame: ClientFrame) -> Reply {
    match frame.into_verb() {
        Ok(verb) => dispatch_verb(state, caller, verb),
        Err(text) => {
            log::info!(
                "dispatch session_id={} user_id={} verb=? outcome=bad_request",
                caller.session_id,
                caller.user_id
            );
            finish(Err(Fail::new(Code::BadRequest, text)))
        }
    }
}

pub fn dispatch_verb(state: &AppState, caller: &Caller, verb: Verb) -> Reply {
    let trace_id = store::new_id();
    let start = Instant::now();
    let verb_name = verb.name();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        route(state, caller, verb)
    }))
    .unwrap_or_else(|_| Err(Fail::internal("handler panicked".to_string())));

    let latency_ms = start.elapsed().as_millis();
    match &result {
        Ok(_) => log::info!(
            "dispatch trace_id={trace_id} session_id={} user_id={} verb={verb_name} outcome=ok latency_ms={latency_ms}",
            caller.session_id,
            caller.user_id
        ),
        Err(fail) => {
            if let Some(detail) = &fail.detail {
                log::error!(
                    "dispatch trace_id={trace_id} session_id={} user_id={} verb={verb_name} outcome=error code={} detail={detail} latency_ms={latency_ms}",
                    caller.session_id,
                    caller.user_id,
                    fail.code.as_u16()
                );
            } else {
                log::info!(
                    "dispatch trace_id={trace_id} session_id={} user_id={} verb={verb_name} outcome=denied code={} latency_ms={latency_ms}",
                    caller.session_id,
                    caller.user_id,
                    fail.code.as_u16()
                );
            }
        }
    }

    finish(result)
}

fn route(state: &AppState, caller: &Caller, verb: Verb) -> HandlerResult {
    match verb {
        Verb::Hi(_) | Verb::Login(_) => {
            Err(Fail::new(Code::BadRequest, "connection is already set up"))
        }
        Verb::Acc(p) => account::handle(state, caller, p),
        Verb::Dm(p) => dm::handle(state, caller, p),
        Verb::Room(p) => room::handle(state, caller, p),
        Verb::Get(p) => get::handle(state, caller, p),
        Verb::Send(p) => message::send(state, caller, p),
        Verb::Edit(p) => message::edit(state, caller, p),
        Verb::Unsend(p) => message::unsend(state, caller, p),
        Verb::Delete(p) => message::delete(state, caller, p),
        Verb::React(p) => message::react(state, caller, p),
        Verb::Typing(p) => message::typing(state, caller, p),
        Verb::Read(p) => read::read(state, caller, p),
        Verb::Recv(p) => read::recv(state, caller, p),
        Verb::Pin(p) => pin::handle(state, caller, p),
        Verb::Invite(p) => invite::handle(state, caller, p),
        Verb::Contact(p) => contact::handle(state, caller, p),
        Verb::Search(p) => search::handle(state, caller, p),
        Verb::File(_) => Err(Fail::new(
            Code::BadRequest,
            "file transfers use the upload endpoint",
        )),
    }
}

fn finish(result: HandlerResult) -> Reply {
    match result {
        Ok(reply) => reply,
        Err(fail) => Reply {
            ctrl: Some(CtrlBody {
                code: fail.code,
                text: Some(fail.text),
                params: None,
            }),
            fanout: Vec::new(),
        },
    }
}

impl Reply {
    /// Materialise the ctrl body into a wire frame for `frame_id`.
    pub fn take_ctrl_frame(&mut self, frame_id: Option<String>) -> Option<ServerFrame> {
        self.ctrl.take().map(|body| {
            ServerFrame::Ctrl(Ctrl {
                id: frame_id,
                code: body.code.as_u16(),
                text: body.text,
                params: body.params,
                ts: store::now_ts(),
            })
        })
    }
}

// --- Shared authorization helpers ---

/// The conversation plus the caller's active membership. Unknown
/// conversation is NotFound; known but non-member (or soft-removed) is
/// Forbidden.
pub(crate) fn require_member(
    state: &AppState,
    conv_id: &str,
    user_id: &str,
) -> Result<(Conversation, Member), Fail> {
    let conv = state.db.get_conversation(conv_id).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "conversation not found"),
        other => other.into(),
    })?;
    let member = state.db.get_member(conv_id, user_id).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::Forbidden, "not a member"),
        other => other.into(),
    })?;
    if !member.is_active() {
        return Err(Fail::new(Code::Forbidden, "not a member"));
    }
    Ok((conv, member))
}

/// The conversation's fan-out audience without the caller.
pub(crate) fn other_member_ids(state: &AppState, conv_id: &str, caller: &str) -> Result<Vec<String>, Fail> {
    let mut ids = state.db.member_user_ids(conv_id)?;
    ids.retain(|id| id != caller);
    Ok(ids)
}

pub(crate) fn info(what: &str) -> Info {
    Info::new(what, store::now_ts())
}
