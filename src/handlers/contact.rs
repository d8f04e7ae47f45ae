use crate::models::UserState;
use crate::protocol::{Code, ContactCall};
use crate::store::StoreError;
use crate::AppState;

use super::{Caller, Fail, HandlerResult, Reply};

pub fn handle(state: &AppState, caller: &Caller, p: ContactCall) -> HandlerResult {
    match (&p.add, &p.remove, &p.user) {
        (Some(target), None, None) => add(state, caller, target),
        (None, Some(target), None) => remove(state, caller, target),
        (None, None, Some(target)) => nickname(state, caller, target, p.nickname.as_deref()),
        _ => Err(Fail::new(Code::BadRequest, "contact needs exactly one of add, remove, user")),
    }
}

fn add(state: &AppState, caller: &Caller, target: &str) -> HandlerResult {
    if target == caller.user_id {
        return Err(Fail::new(Code::BadRequest, "cannot add yourself"));
    }
    let user = state.db.get_user(target).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "user not found"),
        other => other.into(),
    })?;
    if user.state != UserState::Ok {
        return Err(Fail::new(Code::NotFound, "user not found"));
    }
    state.db.add_contact(&caller.user_id, target, "manual", None)?;
    Ok(Reply::ok(Code::Ok))
}

fn remove(state: &AppState, caller: &Caller, target: &str) -> HandlerResult {
    state
        .db
        .remove_contact(&caller.user_id, target)
        .map_err(|e| match e {
            StoreError::NotFound => Fail::new(Code::NotFound, "contact not found"),
            other => other.into(),
        })?;
    Ok(Reply::ok(Code::Ok))
}

/// `None` clears the nickname. Only the caller's own direction changes.
fn nickname(state: &AppState, caller: &Caller, target: &str, nickname: Option<&str>) -> HandlerResult {
    state
        .db
        .update_contact_nickname(&caller.user_id, target, nickname)
        .map_err(|e| match e {
            StoreError::NotFound => Fail::new(Code::NotFound, "contact not found"),
            other => other.into(),
        })?;
    Ok(Reply::ok(Code::Ok))
}
