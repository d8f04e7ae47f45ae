use crate::protocol::{Code, SearchCall};
use crate::AppState;

use super::{Caller, Fail, HandlerResult, Reply};

/// User directory search: case-insensitive substring on display names,
/// at most 20 results.
pub fn handle(state: &AppState, _caller: &Caller, p: SearchCall) -> HandlerResult {
    let query = p.query.trim();
    if query.is_empty() {
        return Err(Fail::new(Code::BadRequest, "query required"));
    }
    let users = state.db.search_users(query, p.limit.unwrap_or(20))?;
    let results: Vec<serde_json::Value> = users
        .iter()
        .map(|u| {
            serde_json::json!({
                "id": u.id,
                "public": u.public,
                "online": state.hub.is_online(&u.id),
            })
        })
        .collect();
    Ok(Reply::with_params(Code::Ok, serde_json::json!({ "users": results })))
}
