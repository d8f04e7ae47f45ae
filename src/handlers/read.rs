//! Read and receive watermarks. `read` also starts the view-once and
//! disappearing TTL clocks via the range read-recording operation.

use crate::protocol::{Code, MarkSeq};
use crate::AppState;

use super::{info, other_member_ids, require_member, Caller, HandlerResult, Reply};

pub fn read(state: &AppState, caller: &Caller, p: MarkSeq) -> HandlerResult {
    let (conv, _member) = require_member(state, &p.conv, &caller.user_id)?;
    state.db.update_read_seq(&conv.id, &caller.user_id, p.seq)?;
    state.db.record_reads_up_to(&conv.id, &caller.user_id, p.seq)?;

    let mut note = info("read");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.seq = Some(p.seq);
    let audience = state.db.member_user_ids(&conv.id)?;
    Ok(Reply::ok(Code::Ok).and_info(audience, note, Some(caller.session_id.clone())))
}

/// Like `read`, but only the delivery watermark moves — and no ctrl ack.
pub fn recv(state: &AppState, caller: &Caller, p: MarkSeq) -> HandlerResult {
    let Ok((conv, _member)) = require_member(state, &p.conv, &caller.user_id) else {
        return Ok(Reply::silent());
    };
    state.db.update_recv_seq(&conv.id, &caller.user_id, p.seq)?;

    let mut note = info("recv");
    note.conv = Some(conv.id.clone());
    note.from = Some(caller.user_id.clone());
    note.seq = Some(p.seq);
    let audience = other_member_ids(state, &conv.id, &caller.user_id)?;
    Ok(Reply::silent().and_info(audience, note, None))
}
