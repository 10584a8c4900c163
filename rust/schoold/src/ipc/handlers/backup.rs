use crate::backup;
use crate::db;
use crate::ipc::helpers::{get_required_str, require_role, respond, HandlerErr, ADMIN_ROLES};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn backup_export_workspace_bundle(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, ADMIN_ROLES)?;
    let out_path = get_required_str(params, "outPath")?.trim().to_string();
    if out_path.is_empty() {
        return Err(HandlerErr::bad_params("missing outPath"));
    }
    let Some(workspace_path) = state.workspace.clone() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    if let Some(conn) = state.db.as_mut() {
        db::save_state(conn, state.store.state())
            .map_err(|e| HandlerErr::new("db_save_failed", format!("{e:#}")))?;
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| {
            HandlerErr::new("backup_failed", format!("{e:#}"))
                .with_details(json!({ "path": out_path }))
        })?;
    info!(path = %out_path, sha256 = %export.db_sha256, "workspace bundle exported");

    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "sha256": export.db_sha256,
    }))
}

fn backup_import_workspace_bundle(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, ADMIN_ROLES)?;
    let in_path = get_required_str(params, "inPath")?.trim().to_string();
    let Some(workspace_path) = state.workspace.clone() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = backup::import_workspace_bundle(&src, &workspace_path);
    // A failed import leaves the old database in place; reopen it either way.
    if let Err(e) = state.open_workspace(&workspace_path) {
        state.close_workspace();
        return Err(HandlerErr::new("db_open_failed", format!("{e:#}"))
            .with_details(json!({ "path": workspace_path.to_string_lossy() })));
    }
    let import = import.map_err(|e| {
        HandlerErr::new("backup_failed", format!("{e:#}"))
            .with_details(json!({ "path": in_path }))
    })?;
    info!(path = %in_path, format = %import.bundle_format_detected, "workspace bundle imported");

    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "grades": state.store.grades().len(),
        "students": state.store.students().len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => backup_export_workspace_bundle(state, &req.params),
        "backup.importWorkspaceBundle" => backup_import_workspace_bundle(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
