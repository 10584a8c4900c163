use crate::ipc::helpers::{parse_params, require_role, respond, to_json, HandlerErr, ADMIN_ROLES};
use crate::ipc::types::{AppState, Request};
use crate::model::SettingsPatch;
use serde_json::json;

fn settings_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, ADMIN_ROLES)?;
    let patch: SettingsPatch = parse_params(params, Some("patch"))?;
    let settings = state.store.update_settings(patch)?;
    Ok(json!({ "settings": to_json(&settings)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "settings.get" => to_json(state.store.settings()).map(|v| json!({ "settings": v })),
        "settings.update" => settings_update(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
