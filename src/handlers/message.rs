use chrono::{DateTime, Duration, Utc};

use crate::models::{ConversationKind, Message};
use crate::protocol::{AddReaction, Code, Data, DeleteMessage, EditMessage, SendMessage, TypingNote, UnsendMessage};
use crate::store::StoreError;
use crate::AppState;

use super::{info, other_member_ids, require_member, Caller, Fail, HandlerResult, Reply};

const MAX_EMOJI_LEN: usize = 64;

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, Fail> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Fail::internal(format!("bad stored timestamp {raw:?}: {e}")))
}

fn live_message(state: &AppState, conv_id: &str, seq: i64) -> Result<Message, Fail> {
    let msg = state.db.get_message_by_seq(conv_id, seq).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "message not found"),
        other => other.into(),
    })?;
    if msg.is_deleted() {
        return Err(Fail::new(Code::Gone, "message deleted"));
    }
    Ok(msg)
}

pub fn send(state: &AppState, caller: &Caller, p: SendMessage) -> HandlerResult {
    if p.content.is_null() {
        return Err(Fail::new(Code::BadRequest, "content required"));
    }
    let plaintext = serde_json::to_vec(&p.content)
        .map_err(|e| Fail::internal(format!("content serialize: {e}")))?;
    if plaintext.len() > state.config.max_frame_bytes {
        return Err(Fail::new(Code::BadRequest, "message too large"));
    }

    let (conv, _member) = require_member(state, &p.conv, &caller.user_id)?;
    if conv.kind == ConversationKind::Dm && state.db.is_blocked_by_peer(&conv.id, &caller.user_id)? {
        return Err(Fail::new(Code::Forbidden, "blocked"));
    }

    let view_once = p.view_once.unwrap_or(false);
    if let Some(ttl) = p.view_once_ttl {
        if !view_once {
            return Err(Fail::new(Code::BadRequest, "viewOnceTTL requires viewOnce"));
        }
        if ttl <= 0 || !state.config.disappearing_ttls.contains(&ttl) {
            return Err(Fail::new(Code::BadRequest, "invalid view-once TTL"));
        }
    }

    let mut head = serde_json::Map::new();
    if let Some(reply_to) = p.reply_to {
        head.insert("reply_to".to_string(), serde_json::json!(reply_to));
    }
    if view_once {
        head.insert("view_once".to_string(), serde_json::json!(true));
        if let Some(ttl) = p.view_once_ttl {
            head.insert("view_once_ttl".to_string(), serde_json::json!(ttl));
        }
    }
    let head = serde_json::Value::Object(head);

    let ciphertext = state.codec.encrypt(&plaintext);
    let msg = if view_once {
        state
            .db
            .create_message_with_view_once(&conv.id, &caller.user_id, &ciphertext, &head, p.view_once_ttl)?
    } else {
        state.db.create_message(&conv.id, &caller.user_id, &ciphertext, &head)?
    };

    let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
    let data = Data {
        conv: conv.id.clone(),
        seq: msg.seq,
        from: caller.user_id.clone(),
        content: p.content,
        head: if msg.head.as_object().is_some_and(|o| !o.is_empty()) {
            Some(msg.head.clone())
        } else {
            None
        },
        ts: msg.created_at.clone(),
    };

    Ok(Reply::with_params(
        Code::Accepted,
        serde_json::json!({ "conv": conv.id, "seq": msg.seq, "ts": msg.created_at }),
    )
    .and_data(audience, data))
}

pub fn edit(state: &AppState, caller: &Caller, p: EditMessage) -> HandlerResult {
    if p.content.is_null() {
        return Err(Fail::new(Code::BadRequest, "content required"));
    }
    let plaintext = serde_json::to_vec(&p.content)
        .map_err(|e| Fail::internal(format!("content serialize: {e}")))?;
    if plaintext.len() > state.config.max_frame_bytes {
        return Err(Fail::new(Code::BadRequest, "message too large"));
    }

    let (conv, _member) = require_member(state, &p.conv, &caller.user_id)?;
    let msg = live_message(state, &conv.id, p.seq)?;
    if msg.from_user_id != caller.user_id {
        return Err(Fail::new(Code::Forbidden, "only the sender can edit"));
    }
    let created = parse_ts(&msg.created_at)?;
    if Utc::now().signed_duration_since(created) > Duration::seconds(state.config.edit_window_secs) {
        return Err(Fail::new(Code::Forbidden, "edit window expired"));
    }
    if msg.edit_count() >= state.config.max_edit_count {
        return Err(Fail::new(Code::Forbidden, "maximum edits reached"));
    }

    let ciphertext = state.codec.encrypt(&plaintext);
    let updated = state.db.edit_message(&conv.id, p.seq, &ciphertext)?;

    let mut note = info("edit");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.seq = Some(updated.seq);
    note.content = Some(p.content);
    let audience = state.db.member_user_ids(&conv.id)?;
    Ok(Reply::ok(Code::Ok).and_info(audience, note, Some(caller.session_id.clone())))
}

pub fn unsend(state: &AppState, caller: &Caller, p: UnsendMessage) -> HandlerResult {
    let (conv, _member) = require_member(state, &p.conv, &caller.user_id)?;
    let msg = live_message(state, &conv.id, p.seq)?;
    if msg.from_user_id != caller.user_id {
        return Err(Fail::new(Code::Forbidden, "only the sender can unsend"));
    }
    let created = parse_ts(&msg.created_at)?;
    if Utc::now().signed_duration_since(created) > Duration::seconds(state.config.unsend_window_secs) {
        return Err(Fail::new(Code::Forbidden, "unsend window expired"));
    }

    state.db.unsend_message(&conv.id, p.seq)?;

    let mut note = info("unsend");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.seq = Some(p.seq);
    let audience = state.db.member_user_ids(&conv.id)?;
    Ok(Reply::ok(Code::Ok).and_info(audience, note, Some(caller.session_id.clone())))
}

pub fn delete(state: &AppState, caller: &Caller, p: DeleteMessage) -> HandlerResult {
    let (conv, _member) = require_member(state, &p.conv, &caller.user_id)?;

    if p.for_everyone.unwrap_or(false) {
        let msg = live_message(state, &conv.id, p.seq)?;
        if msg.from_user_id != caller.user_id {
            return Err(Fail::new(Code::Forbidden, "only the sender can delete for everyone"));
        }
        state.db.delete_message_for_everyone(&conv.id, p.seq)?;

        let mut note = info("delete");
        note.conv = Some(conv.id.clone());
        note.from = Some(caller.user_id.clone());
        note.seq = Some(p.seq);
        let audience = state.db.member_user_ids(&conv.id)?;
        return Ok(Reply::ok(Code::Ok).and_info(audience, note, Some(caller.session_id.clone())));
    }

    // Per-user hide: tombstones included, no broadcast.
    let msg = state.db.get_message_by_seq(&conv.id, p.seq).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "message not found"),
        other => other.into(),
    })?;
    state.db.delete_message_for_user(&msg.id, &caller.user_id)?;
    Ok(Reply::ok(Code::Ok))
}

pub fn react(state: &AppState, caller: &Caller, p: AddReaction) -> HandlerResult {
    if p.emoji.is_empty() || p.emoji.len() > MAX_EMOJI_LEN {
        return Err(Fail::new(Code::BadRequest, "invalid emoji"));
    }
    let (conv, _member) = require_member(state, &p.conv, &caller.user_id)?;
    let (added, _head) = state
        .db
        .add_reaction(&conv.id, p.seq, &caller.user_id, &p.emoji)
        .map_err(|e| match e {
            StoreError::NotFound => Fail::new(Code::NotFound, "message not found"),
            StoreError::Gone => Fail::new(Code::Gone, "message deleted"),
            other => other.into(),
        })?;

    // The remove side reuses the same frame; clients diff against their copy.
    let mut note = info("react");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.seq = Some(p.seq);
    note.emoji = Some(p.emoji);
    let audience = state.db.member_user_ids(&conv.id)?;
    Ok(
        Reply::with_params(Code::Ok, serde_json::json!({ "added": added }))
            .and_info(audience, note, Some(caller.session_id.clone())),
    )
}

/// No reply, and invalid conversations fail silently.
pub fn typing(state: &AppState, caller: &Caller, p: TypingNote) -> HandlerResult {
    let Ok((conv, _member)) = require_member(state, &p.conv, &caller.user_id) else {
        return Ok(Reply::silent());
    };
    let mut note = info("typing");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
    Ok(Reply::silent().and_info(audience, note, None))
}

pub(crate) fn decrypt_content(state: &AppState, msg: &Message) -> Option<serde_json::Value> {
    match state.codec.decrypt(&msg.content) {
        Ok(plain) => serde_json::from_slice(&plain).ok(),
        Err(_) => {
            log::warn!("content_unreadable message_id={}", msg.id);
            None
        }
    }
}
