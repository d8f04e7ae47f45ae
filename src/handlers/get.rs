//! Read paths: `get.what ∈ {conversations, messages, members, receipts,
//! contacts}`.

use crate::protocol::{Code, GetCall};
use crate::AppState;

use super::message::decrypt_content;
use super::{require_member, Caller, Fail, HandlerResult, Reply};

pub fn handle(state: &AppState, caller: &Caller, p: GetCall) -> HandlerResult {
    match p.what.as_str() {
        "conversations" => conversations(state, caller),
        "messages" => messages(state, caller, &p),
        "members" => members(state, caller, &p),
        "receipts" => receipts(state, caller, &p),
        "contacts" => contacts(state, caller),
        _ => Err(Fail::new(Code::BadRequest, "unknown get target")),
    }
}

fn conv_id(p: &GetCall) -> Result<&str, Fail> {
    p.conv
        .as_deref()
        .ok_or_else(|| Fail::new(Code::BadRequest, "conv required"))
}

fn conversations(state: &AppState, caller: &Caller) -> HandlerResult {
    let online = |id: &str| state.hub.is_online(id);
    let entries = state.db.get_user_conversations(&caller.user_id, &online)?;
    Ok(Reply::with_params(
        Code::Ok,
        serde_json::json!({ "conversations": entries }),
    ))
}

/// History respects the caller's clear watermark and per-viewer expiry.
/// Tombstones come back head-only; an undecryptable row is dropped (and
/// logged), never served raw.
fn messages(state: &AppState, caller: &Caller, p: &GetCall) -> HandlerResult {
    let conv = conv_id(p)?;
    let (conv, member) = require_member(state, conv, &caller.user_id)?;
    let rows = state.db.get_messages(
        &conv.id,
        &caller.user_id,
        p.before.unwrap_or(0),
        p.limit.unwrap_or(0),
        member.clear_seq,
    )?;

    let mut messages = Vec::with_capacity(rows.len());
    for msg in &rows {
        let mut entry = serde_json::json!({
            "conv": msg.conversation_id,
            "seq": msg.seq,
            "from": msg.from_user_id,
            "ts": msg.created_at,
        });
        if msg.head.as_object().is_some_and(|o| !o.is_empty()) {
            entry["head"] = msg.head.clone();
        }
        if msg.is_deleted() {
            entry["deleted"] = serde_json::json!(true);
        } else {
            match decrypt_content(state, msg) {
                Some(content) => entry["content"] = content,
                None => continue,
            }
        }
        messages.push(entry);
    }

    Ok(Reply::with_params(Code::Ok, serde_json::json!({ "messages": messages })))
}

fn members(state: &AppState, caller: &Caller, p: &GetCall) -> HandlerResult {
    let conv = conv_id(p)?;
    let (conv, _member) = require_member(state, conv, &caller.user_id)?;
    let members = state.db.get_conversation_members(&conv.id)?;
    Ok(Reply::with_params(Code::Ok, serde_json::json!({ "members": members })))
}

fn receipts(state: &AppState, caller: &Caller, p: &GetCall) -> HandlerResult {
    let conv = conv_id(p)?;
    let (conv, _member) = require_member(state, conv, &caller.user_id)?;
    let receipts = state.db.get_read_receipts(&conv.id)?;
    Ok(Reply::with_params(Code::Ok, serde_json::json!({ "receipts": receipts })))
}

fn contacts(state: &AppState, caller: &Caller) -> HandlerResult {
    let online = |id: &str| state.hub.is_online(id);
    let contacts = state.db.get_contacts(&caller.user_id, &online)?;
    Ok(Reply::with_params(Code::Ok, serde_json::json!({ "contacts": contacts })))
}
