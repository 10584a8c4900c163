use crate::ipc::helpers::{parse_params, respond, to_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, User};
use serde_json::json;

fn session_login(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user: User = parse_params(params, Some("user"))?;
    if user.id.trim().is_empty() {
        return Err(HandlerErr::bad_params("user.id must not be empty"));
    }
    state.identity.login(user);
    Ok(json!({ "user": to_json(&state.identity.current_user())? }))
}

fn session_has_role(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let roles: Vec<Role> = parse_params(params, Some("roles"))?;
    Ok(json!({ "hasRole": state.identity.has_role(&roles) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.login" => session_login(state, &req.params),
        "session.logout" => {
            state.identity.logout();
            Ok(json!({ "user": null }))
        }
        "session.current" => to_json(&state.identity.current_user()).map(|u| json!({ "user": u })),
        "session.hasRole" => session_has_role(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
