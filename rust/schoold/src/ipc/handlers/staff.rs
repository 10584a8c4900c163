use crate::ipc::helpers::{
    get_required_str, parse_params, require_role, respond, to_json, HandlerErr, WRITE_ROLES,
};
use crate::ipc::types::{AppState, Request};
use crate::error::StoreError;
use crate::model::{EntityKind, NewSubject, NewTeacher, SubjectPatch, TeacherPatch};
use crate::views;
use serde_json::json;

fn subjects_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let new: NewSubject = parse_params(params, None)?;
    let subject = state.store.add_subject(new)?;
    Ok(json!({ "subject": to_json(&subject)? }))
}

fn subjects_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let patch: SubjectPatch = parse_params(params, Some("patch"))?;
    let subject = state.store.update_subject(&subject_id, patch)?;
    Ok(json!({ "subject": to_json(&subject)? }))
}

fn subjects_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let removed = state.store.delete_subject(&subject_id)?;
    Ok(json!({ "removed": to_json(&removed)? }))
}

fn teachers_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let new: NewTeacher = parse_params(params, None)?;
    let teacher = state.store.add_teacher(new)?;
    Ok(json!({ "teacher": to_json(&teacher)? }))
}

fn teachers_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let patch: TeacherPatch = parse_params(params, Some("patch"))?;
    let teacher = state.store.update_teacher(&teacher_id, patch)?;
    Ok(json!({ "teacher": to_json(&teacher)? }))
}

fn teachers_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let removed = state.store.delete_teacher(&teacher_id)?;
    Ok(json!({ "removed": to_json(&removed)? }))
}

fn teachers_schedule(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    if state.store.teacher(&teacher_id).is_none() {
        return Err(StoreError::not_found(EntityKind::Teacher, teacher_id).into());
    }
    let entries = views::teacher_schedule(state.store.state(), &teacher_id);
    Ok(json!({ "entries": to_json(&entries)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.list" => to_json(&state.store.subjects()).map(|v| json!({ "subjects": v })),
        "subjects.create" => subjects_create(state, &req.params),
        "subjects.update" => subjects_update(state, &req.params),
        "subjects.delete" => subjects_delete(state, &req.params),
        "teachers.list" => to_json(&state.store.teachers()).map(|v| json!({ "teachers": v })),
        "teachers.create" => teachers_create(state, &req.params),
        "teachers.update" => teachers_update(state, &req.params),
        "teachers.delete" => teachers_delete(state, &req.params),
        "teachers.schedule" => teachers_schedule(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
