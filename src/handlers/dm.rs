use crate::models::UserState;
use crate::protocol::{Code, DmCall};
use crate::store::StoreError;
use crate::AppState;

use super::{info, other_member_ids, require_member, Caller, Fail, HandlerResult, Reply};

pub fn handle(state: &AppState, caller: &Caller, p: DmCall) -> HandlerResult {
    match (&p.user, &p.conv) {
        (Some(user), None) => open_dm(state, caller, user),
        (None, Some(conv)) => update_settings(state, caller, conv, &p),
        _ => Err(Fail::new(Code::BadRequest, "dm needs either user or conv")),
    }
}

/// Find-or-create the DM with `other`. 201 when newly created, 200 otherwise.
fn open_dm(state: &AppState, caller: &Caller, other: &str) -> HandlerResult {
    if other == caller.user_id {
        return Err(Fail::new(Code::BadRequest, "cannot DM yourself"));
    }
    let peer = state.db.get_user(other).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "user not found"),
        other => other.into(),
    })?;
    if peer.state != UserState::Ok {
        return Err(Fail::new(Code::NotFound, "user not found"));
    }

    let (conv, created) = state.db.create_dm(&caller.user_id, other)?;
    let code = if created { Code::Created } else { Code::Ok };
    Ok(Reply::with_params(
        code,
        serde_json::json!({
            "conv": conv,
            "created": created,
            "user": {
                "id": peer.id,
                "public": peer.public,
                "online": state.hub.is_online(&peer.id),
            },
        }),
    ))
}

/// Per-member settings on any conversation the caller belongs to, plus the
/// conversation-level disappearing TTL.
fn update_settings(state: &AppState, caller: &Caller, conv_id: &str, p: &DmCall) -> HandlerResult {
    let (conv, _member) = require_member(state, conv_id, &caller.user_id)?;

    state.db.update_member_settings(
        conv_id,
        &caller.user_id,
        p.favorite,
        p.muted,
        p.blocked,
        p.private.as_ref(),
    )?;

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
    Ok(reply)
}
