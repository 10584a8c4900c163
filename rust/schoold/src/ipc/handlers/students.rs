use crate::ipc::helpers::{
    get_optional_str, get_required_str, parse_params, require_role, respond, to_json, HandlerErr,
    WRITE_ROLES,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{NewStudent, StudentPatch};
use crate::views;
use serde_json::json;

fn student_json(s: &crate::model::Student) -> Result<serde_json::Value, HandlerErr> {
    let mut v = to_json(s)?;
    v["displayName"] = json!(s.display_name());
    Ok(v)
}

fn students_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let students = match get_optional_str(params, "sectionId") {
        Some(section_id) => views::students_of(state.store.state(), &section_id),
        None => state.store.students().iter().collect(),
    };
    let students = students
        .into_iter()
        .map(student_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let new: NewStudent = parse_params(params, None)?;
    let student = state.store.add_student(new)?;
    Ok(json!({ "student": student_json(&student)? }))
}

fn students_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let student_id = get_required_str(params, "studentId")?;
    let patch: StudentPatch = parse_params(params, Some("patch"))?;
    let student = state.store.update_student(&student_id, patch)?;
    Ok(json!({ "student": student_json(&student)? }))
}

fn students_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let student_id = get_required_str(params, "studentId")?;
    let removed = state.store.delete_student(&student_id)?;
    Ok(json!({ "removed": to_json(&removed)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.create" => students_create(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "students.delete" => students_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
