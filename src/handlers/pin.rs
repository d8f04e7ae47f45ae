use crate::models::{ConversationKind, Role};
use crate::protocol::{Code, PinMessage};
use crate::store::StoreError;
use crate::AppState;

use super::{info, require_member, Caller, Fail, HandlerResult, Reply};

/// DM members may pin and unpin freely; rooms require owner or admin.
/// `seq = 0` unpins.
pub fn handle(state: &AppState, caller: &Caller, p: PinMessage) -> HandlerResult {
    let (conv, member) = require_member(state, &p.conv, &caller.user_id)?;
    if conv.kind == ConversationKind::Room && member.role < Role::Admin {
        return Err(Fail::new(Code::Forbidden, "only owner or admin can pin"));
    }

    let audience = state.db.member_user_ids(&conv.id)?;

    if p.seq == 0 {
        state.db.set_pinned_message(&conv.id, None, &caller.user_id)?;
        let mut note = info("unpin");
        note.conv = Some(conv.id.clone());
        note.from = Some(caller.user_id.clone());
        return Ok(Reply::ok(Code::Ok).and_info(audience, note, Some(caller.session_id.clone())));
    }

    let msg = state.db.get_message_by_seq(&conv.id, p.seq).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "message not found"),
        other => other.into(),
    })?;
    if msg.is_deleted() {
        return Err(Fail::new(Code::Gone, "message deleted"));
    }
    state.db.set_pinned_message(&conv.id, Some(msg.id.as_str()), &caller.user_id)?;

    let mut note = info("pin");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.seq = Some(p.seq);
    Ok(Reply::ok(Code::Ok).and_info(audience, note, Some(caller.session_id.clone())))
}
