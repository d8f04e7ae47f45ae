//! Signup, login, and password change. Signup and login are reachable before
//! the session is authenticated; the session layer calls them directly.

use crate::auth::{decode_basic_secret, AuthError, TokenGrant};
use crate::models::{User, UserState};
use crate::protocol::{Account, Code};
use crate::store::StoreError;
use crate::AppState;

use super::{Caller, Fail, HandlerResult, Reply};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_UNAME_LEN: usize = 64;

/// Uniform login failure: never distinguishes wrong password from unknown
/// user, suspended account, or a rate-limited name.
fn bad_credentials() -> Fail {
    Fail::new(Code::Unauthorized, "invalid credentials")
}

#[derive(Debug)]
pub struct SignupOutcome {
    pub user: User,
    pub grant: Option<TokenGrant>,
    pub inviter_ids: Vec<String>,
}

pub fn signup(state: &AppState, acc: &Account, _user_agent: &str) -> Result<SignupOutcome, Fail> {
    if acc.scheme.as_deref() != Some("basic") {
        return Err(Fail::new(Code::BadRequest, "unsupported auth scheme"));
    }
    let secret = acc
        .secret
        .as_deref()
        .ok_or_else(|| Fail::new(Code::BadRequest, "secret required"))?;
    let (uname, password) =
        decode_basic_secret(secret).map_err(|_| Fail::new(Code::BadRequest, "malformed secret"))?;
    if uname.is_empty() || uname.len() > MAX_UNAME_LEN {
        return Err(Fail::new(Code::BadRequest, "username must be 1-64 characters"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Fail::new(Code::BadRequest, "password too short"));
    }
    if state.db.get_auth_by_username(&uname).is_ok() {
        return Err(Fail::new(Code::Conflict, "username already taken"));
    }

    // Resolve the invite before creating anything so its email can seed the
    // account as verified.
    let invite = match acc.invite_code.as_deref() {
        Some(code) => {
            let invite = state.db.get_invite_by_code(code).map_err(|e| match e {
                StoreError::NotFound => Fail::new(Code::NotFound, "invite not found"),
                other => other.into(),
            })?;
            let now_ts = chrono::Utc::now().timestamp();
            state
                .invites
                .open(&invite.token, now_ts)
                .map_err(|_| Fail::new(Code::Gone, "invite no longer valid"))?;
            Some(invite)
        }
        None => None,
    };

    let public = acc
        .desc
        .as_ref()
        .and_then(|d| d.public.clone())
        .unwrap_or_else(|| serde_json::json!({}));
    let email = acc
        .email
        .as_deref()
        .or(invite.as_ref().map(|i| i.email.as_str()));
    let email_verified = invite.is_some() && acc.email.is_none();

    let user = state
        .db
        .create_user(&public, false, email, email_verified)
        .map_err(|e| match e {
            StoreError::Conflict => Fail::new(Code::Conflict, "email already registered"),
            other => other.into(),
        })?;

    let hash = state
        .auth
        .hash_password(&password)
        .map_err(|e| Fail::internal(format!("hash: {e}")))?;
    state.db.create_auth_basic(&user.id, &uname, &hash)?;

    let inviter_ids = match invite {
        Some(invite) => state
            .db
            .redeem_invite_bundle(&invite.id, &invite.email, &user.id)
            .map_err(|e| match e {
                StoreError::Gone => Fail::new(Code::Gone, "invite no longer valid"),
                other => other.into(),
            })?
            .into_iter()
            .map(|r| r.inviter_id)
            .collect(),
        None => Vec::new(),
    };

    let grant = if acc.login.unwrap_or(false) {
        Some(
            state
                .auth
                .issue_token(&user.id)
                .map_err(|e| Fail::internal(format!("token: {e}")))?,
        )
    } else {
        None
    };

    Ok(SignupOutcome {
        user,
        grant,
        inviter_ids,
    })
}

/// `basic` login: secret is `base64("uname:password")`.
pub fn login_basic(state: &AppState, secret: &str, user_agent: &str) -> Result<(User, TokenGrant), Fail> {
    let (uname, password) = decode_basic_secret(secret).map_err(|_| bad_credentials())?;

    let window_key = format!("auth:{uname}");
    if !state.limiter.check(&window_key, state.config.auth_per_min, 60) {
        log::warn!("login rate limited uname_len={}", uname.len());
        return Err(bad_credentials());
    }

    let auth_record = match state.db.get_auth_by_username(&uname) {
        Ok(r) => r,
        Err(StoreError::NotFound) => {
            state.auth.verify_dummy(&password);
            return Err(bad_credentials());
        }
        Err(other) => return Err(other.into()),
    };
    state
        .auth
        .verify_password(&password, &auth_record.secret)
        .map_err(|_| bad_credentials())?;

    let user = state.db.get_user(&auth_record.user_id)?;
    if user.state != UserState::Ok {
        return Err(bad_credentials());
    }

    let grant = state
        .auth
        .issue_token(&user.id)
        .map_err(|e| Fail::internal(format!("token: {e}")))?;
    state.db.touch_last_seen(&user.id, user_agent)?;
    Ok((user, grant))
}

/// `token` login: echoes the presented token and its expiry on success.
pub fn login_token(state: &AppState, secret: &str, user_agent: &str) -> Result<(User, TokenGrant), Fail> {
    let claims = state.auth.verify_token(secret).map_err(|e| match e {
        AuthError::TokenExpired => Fail::new(Code::Unauthorized, "token expired"),
        _ => bad_credentials(),
    })?;
    let user = match state.db.get_user(&claims.user_id) {
        Ok(u) => u,
        Err(StoreError::NotFound) => return Err(bad_credentials()),
        Err(other) => return Err(other.into()),
    };
    if user.state != UserState::Ok {
        return Err(bad_credentials());
    }
    state.db.touch_last_seen(&user.id, user_agent)?;
    let grant = TokenGrant {
        user_id: user.id.clone(),
        token: secret.to_string(),
        expires_at: claims.exp,
    };
    Ok((user, grant))
}

/// Post-auth `acc`: only password change (`user:"me"`) is meaningful here.
pub fn handle(state: &AppState, caller: &Caller, acc: Account) -> HandlerResult {
    match acc.user.as_str() {
        "me" => change_password(state, caller, &acc),
        "new" => Err(Fail::new(Code::BadRequest, "already authenticated")),
        _ => Err(Fail::new(Code::BadRequest, "unknown account target")),
    }
}

/// Secret is `base64("old:new")`; the old password must verify.
fn change_password(state: &AppState, caller: &Caller, acc: &Account) -> HandlerResult {
    let secret = acc
        .secret
        .as_deref()
        .ok_or_else(|| Fail::new(Code::BadRequest, "secret required"))?;
    let (old_password, new_password) =
        decode_basic_secret(secret).map_err(|_| Fail::new(Code::BadRequest, "malformed secret"))?;
    if new_password.len() < MIN_PASSWORD_LEN {
        return Err(Fail::new(Code::BadRequest, "password too short"));
    }

    let auth_record = state.db.get_auth_by_user(&caller.user_id)?;
    state
        .auth
        .verify_password(&old_password, &auth_record.secret)
        .map_err(|_| Fail::new(Code::Forbidden, "invalid password"))?;

    let hash = state
        .auth
        .hash_password(&new_password)
        .map_err(|e| Fail::internal(format!("hash: {e}")))?;
    state.db.update_password(&caller.user_id, &hash)?;
    state.db.clear_must_change_password(&caller.user_id)?;
    Ok(Reply::ok(Code::Ok))
}
