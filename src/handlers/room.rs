use crate::models::{ConversationKind, Role, UserState};
use crate::protocol::{Code, RoomCall};
use crate::store::StoreError;
use crate::AppState;

use super::{info, other_member_ids, require_member, Caller, Fail, HandlerResult, Reply};

pub fn handle(state: &AppState, caller: &Caller, p: RoomCall) -> HandlerResult {
    match p.action.as_str() {
        "create" => create(state, caller, &p),
        "invite" => invite(state, caller, &p),
        "leave" => leave(state, caller, &p),
        "kick" => kick(state, caller, &p),
        "update" => update(state, caller, &p),
        _ => Err(Fail::new(Code::BadRequest, "unknown room action")),
    }
}

fn room_id(p: &RoomCall) -> Result<&str, Fail> {
    p.id.as_deref()
        .ok_or_else(|| Fail::new(Code::BadRequest, "room id required"))
}

fn target_user(p: &RoomCall) -> Result<&str, Fail> {
    p.user
        .as_deref()
        .ok_or_else(|| Fail::new(Code::BadRequest, "user required"))
}

fn create(state: &AppState, caller: &Caller, p: &RoomCall) -> HandlerResult {
    let conv = state.db.create_room(&caller.user_id, p.desc.as_ref())?;
    if let Some(ttl) = p.disappearing_ttl {
        if !state.config.disappearing_ttls.contains(&ttl) {
            return Err(Fail::new(Code::BadRequest, "invalid disappearing TTL"));
        }
        if ttl > 0 {
            state.db.set_disappearing_ttl(&conv.id, Some(ttl))?;
        }
    }
    let conv = state.db.get_conversation(&conv.id)?;
    Ok(Reply::with_params(Code::Created, serde_json::json!({ "conv": conv })))
}

fn invite(state: &AppState, caller: &Caller, p: &RoomCall) -> HandlerResult {
    let conv_id = room_id(p)?;
    let target = target_user(p)?;
    let (conv, member) = require_member(state, conv_id, &caller.user_id)?;
    if conv.kind != ConversationKind::Room {
        return Err(Fail::new(Code::BadRequest, "not a room"));
    }
    if member.role < Role::Admin {
        return Err(Fail::new(Code::Forbidden, "only owner or admin can invite"));
    }
    let user = state.db.get_user(target).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "user not found"),
        other => other.into(),
    })?;
    if user.state != UserState::Ok {
        return Err(Fail::new(Code::NotFound, "user not found"));
    }
    state.db.add_room_member(&conv.id, target, Role::Member)?;

    let mut note = info("member_joined");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.user = Some(target.to_string());
    let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
    Ok(Reply::ok(Code::Ok).and_info(audience, note, None))
}

fn leave(state: &AppState, caller: &Caller, p: &RoomCall) -> HandlerResult {
    let conv_id = room_id(p)?;
    let (conv, member) = require_member(state, conv_id, &caller.user_id)?;
    if conv.kind != ConversationKind::Room {
        return Err(Fail::new(Code::BadRequest, "not a room"));
    }
    if member.role == Role::Owner {
        return Err(Fail::new(Code::Forbidden, "owner cannot leave"));
    }
    state.db.remove_member(&conv.id, &caller.user_id)?;

    let mut note = info("member_left");
    note.conv = Some(conv.id.clone());
    note.user = Some(caller.user_id.clone());
    let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
    Ok(Reply::ok(Code::Ok).and_info(audience, note, None))
}

fn kick(state: &AppState, caller: &Caller, p: &RoomCall) -> HandlerResult {
    let conv_id = room_id(p)?;
    let target = target_user(p)?;
    let (conv, member) = require_member(state, conv_id, &caller.user_id)?;
    if conv.kind != ConversationKind::Room {
        return Err(Fail::new(Code::BadRequest, "not a room"));
    }
    if member.role < Role::Admin {
        return Err(Fail::new(Code::Forbidden, "only owner or admin can kick"));
    }
    if target == caller.user_id {
        return Err(Fail::new(Code::BadRequest, "cannot kick yourself"));
    }
    let target_role = state.db.get_member_role(&conv.id, target).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "no such member"),
        other => other.into(),
    })?;
    if target_role == Role::Owner {
        return Err(Fail::new(Code::Forbidden, "cannot kick the owner"));
    }
    if member.role == Role::Admin && target_role == Role::Admin {
        return Err(Fail::new(Code::Forbidden, "admin cannot kick admin"));
    }

    // Audience snapshot taken before removal so the kicked user is told too.
    let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
    state.db.remove_member(&conv.id, target)?;

    let mut note = info("member_kicked");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.user = Some(target.to_string());
    Ok(Reply::ok(Code::Ok).and_info(audience, note, None))
}

fn update(state: &AppState, caller: &Caller, p: &RoomCall) -> HandlerResult {
    let conv_id = room_id(p)?;
    let (conv, member) = require_member(state, conv_id, &caller.user_id)?;
    if conv.kind != ConversationKind::Room {
        return Err(Fail::new(Code::BadRequest, "not a room"));
    }
    if member.role < Role::Admin {
        return Err(Fail::new(Code::Forbidden, "only owner or admin can update"));
    }

    if let Some(desc) = &p.desc {
        state.db.update_room_profile(&conv.id, desc)?;
    }

    let mut reply = Reply::ok(Code::Ok);

    if let Some(ttl) = p.disappearing_ttl {
        if !state.config.disappearing_ttls.contains(&ttl) {
            return Err(Fail::new(Code::BadRequest, "invalid disappearing TTL"));
        }
        let stored = if ttl == 0 { None } else { Some(ttl) };
        state.db.set_disappearing_ttl(&conv.id, stored)?;
        let mut note = info("disappearing_updated");
        note.conv = Some(conv.id.clone());
        note.from = Some(caller.user_id.clone());
        note.ttl = Some(ttl);
        let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
        reply = reply.and_info(audience, note, None);
    }

    // Ownership transfer rides on `user`; owner only.
    if let Some(new_owner) = p.user.as_deref() {
        if member.role != Role::Owner {
            return Err(Fail::new(Code::Forbidden, "only the owner can transfer ownership"));
        }
        if !state.db.is_member(&conv.id, new_owner)? {
            return Err(Fail::new(Code::NotFound, "no such member"));
        }
        state.db.transfer_room_owner(&conv.id, &caller.user_id, new_owner)?;
    }

    if p.desc.is_some() || p.user.is_some() {
        let updated = state.db.get_conversation(&conv.id)?;
        let mut note = info("room_updated");
        note.conv = Some(conv.id.clone());
        note.from = Some(caller.user_id.clone());
        note.desc = updated.public.clone();
        let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
        reply = reply.and_info(audience, note, None);
    }

    Ok(reply)
}
