use crate::protocol::{Code, InviteCall, InviteCreate};
use crate::store::StoreError;
use crate::AppState;

use super::{Caller, Fail, HandlerResult, Reply};

const MAX_EMAIL_LEN: usize = 320;

pub fn handle(state: &AppState, caller: &Caller, p: InviteCall) -> HandlerResult {
    match (&p.create, p.list, &p.revoke, &p.redeem) {
        (Some(create), None, None, None) => create_invite(state, caller, create),
        (None, Some(true), None, None) => list(state, caller),
        (None, None, Some(id), None) => revoke(state, caller, id),
        (None, None, None, Some(code)) => redeem(state, caller, code),
        _ => Err(Fail::new(Code::BadRequest, "invite needs exactly one of create, list, revoke, redeem")),
    }
}

fn create_invite(state: &AppState, caller: &Caller, p: &InviteCreate) -> HandlerResult {
    let email = p.email.trim().to_lowercase();
    if email.is_empty() || email.len() > MAX_EMAIL_LEN || !email.contains('@') {
        return Err(Fail::new(Code::BadRequest, "invalid email"));
    }
    let uname = state
        .db
        .get_auth_by_user(&caller.user_id)?
        .uname
        .ok_or_else(|| Fail::internal("inviter has no username".to_string()))?;

    // The short code is derived from the token; a collision just means
    // minting again.
    let mut last_err: Option<Fail> = None;
    for _ in 0..3 {
        let minted = state.invites.mint(&uname, &email);
        match state.db.create_invite(
            &caller.user_id,
            &minted.code,
            &minted.token_ciphertext,
            &email,
            p.name.as_deref(),
        ) {
            Ok(invite) => {
                return Ok(Reply::with_params(
                    Code::Created,
                    serde_json::json!({
                        "id": invite.id,
                        "code": invite.code,
                        "email": invite.email,
                        "expiresAt": invite.expires_at,
                    }),
                ));
            }
            Err(StoreError::Conflict) => {
                last_err = Some(Fail::new(Code::Conflict, "code collision"));
            }
            Err(other) => return Err(other.into()),
        }
    }
    Err(last_err.unwrap_or_else(|| Fail::internal("invite mint failed".to_string())))
}

fn list(state: &AppState, caller: &Caller) -> HandlerResult {
    let invites = state.db.get_user_invites(&caller.user_id)?;
    Ok(Reply::with_params(
        Code::Ok,
        serde_json::json!({ "invites": invites }),
    ))
}

fn revoke(state: &AppState, caller: &Caller, invite_id: &str) -> HandlerResult {
    let invite = state
        .db
        .revoke_invite(invite_id, &caller.user_id)
        .map_err(|e| match e {
            StoreError::NotFound => Fail::new(Code::NotFound, "invite not found"),
            other => other.into(),
        })?;
    Ok(Reply::with_params(
        Code::Ok,
        serde_json::json!({ "id": invite.id, "status": invite.status }),
    ))
}

/// Redeem as an already-registered, logged-in user: every pending invite for
/// the same email is consumed, each materialising a DM and a contact pair.
fn redeem(state: &AppState, caller: &Caller, code: &str) -> HandlerResult {
    let invite = state.db.get_invite_by_code(code).map_err(|e| match e {
        StoreError::NotFound => Fail::new(Code::NotFound, "invite not found"),
        other => other.into(),
    })?;
    let now_ts = chrono::Utc::now().timestamp();
    state
        .invites
        .open(&invite.token, now_ts)
        .map_err(|_| Fail::new(Code::Gone, "invite no longer valid"))?;

    let redeemed = state
        .db
        .redeem_invite_bundle(&invite.id, &invite.email, &caller.user_id)
        .map_err(|e| match e {
            StoreError::Gone => Fail::new(Code::Gone, "invite no longer valid"),
            other => other.into(),
        })?;

    let inviters: Vec<&str> = redeemed.iter().map(|r| r.inviter_id.as_str()).collect();
    let convs: Vec<&str> = redeemed.iter().map(|r| r.conversation_id.as_str()).collect();
    Ok(Reply::with_params(
        Code::Ok,
        serde_json::json!({ "inviters": inviters, "convs": convs }),
    ))
}
