use crate::ipc::helpers::{
    get_required_str, parse_params, require_role, respond, to_json, HandlerErr, WRITE_ROLES,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{GradePatch, NewGrade, NewSection, SectionPatch};
use crate::views;
use serde_json::json;

fn grades_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "grades": to_json(&state.store.grades())? }))
}

fn grades_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let new: NewGrade = parse_params(params, None)?;
    let grade = state.store.add_grade(new)?;
    Ok(json!({ "grade": to_json(&grade)? }))
}

fn grades_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let grade_id = get_required_str(params, "gradeId")?;
    let patch: GradePatch = parse_params(params, Some("patch"))?;
    let grade = state.store.update_grade(&grade_id, patch)?;
    Ok(json!({ "grade": to_json(&grade)? }))
}

fn grades_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let grade_id = get_required_str(params, "gradeId")?;
    let removed = state.store.delete_grade(&grade_id)?;
    Ok(json!({ "removed": to_json(&removed)? }))
}

/// Unknown grades have no sections.
fn sections_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let sections = views::sections_of(state.store.state(), &grade_id);
    Ok(json!({ "sections": to_json(&sections)? }))
}

fn sections_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let new: NewSection = parse_params(params, None)?;
    let section = state.store.add_section(new)?;
    Ok(json!({ "section": to_json(&section)? }))
}

fn sections_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let section_id = get_required_str(params, "sectionId")?;
    let patch: SectionPatch = parse_params(params, Some("patch"))?;
    let section = state.store.update_section(&section_id, patch)?;
    Ok(json!({ "section": to_json(&section)? }))
}

fn sections_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let section_id = get_required_str(params, "sectionId")?;
    let removed = state.store.delete_section(&section_id)?;
    Ok(json!({ "removed": to_json(&removed)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.list" => grades_list(state),
        "grades.create" => grades_create(state, &req.params),
        "grades.update" => grades_update(state, &req.params),
        "grades.delete" => grades_delete(state, &req.params),
        "sections.list" => sections_list(state, &req.params),
        "sections.create" => sections_create(state, &req.params),
        "sections.update" => sections_update(state, &req.params),
        "sections.delete" => sections_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
