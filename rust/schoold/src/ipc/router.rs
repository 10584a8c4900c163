use super::handlers;
use super::types::{AppState, Request};
use crate::db;
use crate::ipc::error::err;
use tracing::{debug, error, warn};

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let resp = dispatch(state, &req);
    let resp = persist_if_dirty(state, &req, resp);

    match resp.get("error").and_then(|e| e.get("code")).and_then(|c| c.as_str()) {
        Some(code) => warn!(id = %req.id, method = %req.method, code, "request rejected"),
        None => debug!(id = %req.id, method = %req.method, "request handled"),
    }
    resp
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::grades::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::staff::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::timetable::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::settings::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

/// Writes the store through to the open workspace after any mutation. When
/// the save fails the store is reloaded from disk, so an error response
/// leaves no trace of the mutation.
fn persist_if_dirty(state: &mut AppState, req: &Request, resp: serde_json::Value) -> serde_json::Value {
    if !state.dirty.replace(false) {
        return resp;
    }
    let Some(conn) = state.db.as_mut() else {
        return resp;
    };
    let Err(e) = db::save_state(conn, state.store.state()) else {
        return resp;
    };
    error!(id = %req.id, method = %req.method, error = %format!("{e:#}"), "failed to save workspace");

    match db::load_state(conn) {
        Ok(on_disk) => {
            state.store.replace_state(on_disk);
            state.dirty.set(false);
        }
        Err(reload) => {
            error!(error = %format!("{reload:#}"), "failed to reload workspace; closing it");
            state.close_workspace();
        }
    }
    err(&req.id, "db_save_failed", format!("{e:#}"), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, User};
    use crate::store::DeletePolicy;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn request(id: &str, method: &str, params: serde_json::Value) -> Request {
        Request {
            id: id.to_string(),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn failed_save_rolls_the_store_back_to_disk() {
        let workspace = temp_dir("schoold-router-readonly");
        let mut state = AppState::new(DeletePolicy::Restrict);
        state.open_workspace(&workspace).expect("open workspace");
        state.identity.login(User {
            id: "a1".into(),
            name: "Admin".into(),
            email: "a@s.test".into(),
            role: Role::SystemAdmin,
        });

        let ok = handle_request(&mut state, request("1", "grades.create", json!({ "name": "Grade 1" })));
        assert_eq!(ok["ok"], true, "{ok}");

        state
            .db
            .as_ref()
            .expect("open db")
            .execute_batch("PRAGMA query_only = ON")
            .expect("read-only");

        for id in ["2", "3"] {
            let resp = handle_request(&mut state, request(id, "grades.create", json!({ "name": "Grade 2" })));
            assert_eq!(resp["ok"], false);
            assert_eq!(resp["error"]["code"], "db_save_failed");
        }
        let names: Vec<_> = state.store.grades().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Grade 1"]);
        assert!(!state.dirty.get());
        assert!(state.workspace.is_some());

        let _ = std::fs::remove_dir_all(workspace);
    }
}
