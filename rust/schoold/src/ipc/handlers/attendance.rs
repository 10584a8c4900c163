use crate::error::StoreError;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, parse_params, require_role, respond, to_json, HandlerErr,
    ATTENDANCE_ROLES,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceStatus, EntityKind, Session, StudentStatus};
use crate::views::{self, AttendanceSelection};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkParam {
    student_id: String,
    status: AttendanceStatus,
}

fn parse_date(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, "date")?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn parse_session(params: &serde_json::Value) -> Result<Session, HandlerErr> {
    let raw = get_required_str(params, "session")?;
    Session::parse(raw.trim())
        .ok_or_else(|| HandlerErr::bad_params("session must be morning or afternoon"))
}

fn require_section(state: &AppState, section_id: &str) -> Result<(), HandlerErr> {
    if state.store.section(section_id).is_none() {
        return Err(StoreError::not_found(EntityKind::Section, section_id).into());
    }
    Ok(())
}

/// The attendance sheet for one section, date and session: the roster in
/// roll order with any marks already recorded.
fn attendance_open(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let date = parse_date(params)?;
    let session = parse_session(params)?;
    require_section(state, &section_id)?;

    let domain = state.store.state();
    let selection = AttendanceSelection::from_records(views::attendance_for_section(
        domain,
        &section_id,
        date,
        session,
    ));
    let rows: Vec<serde_json::Value> = views::roster_of(domain, &section_id)
        .into_iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "displayName": s.display_name(),
                "rollNumber": s.roll_number,
                "status": selection.status(&s.id),
            })
        })
        .collect();

    Ok(json!({
        "sectionId": section_id,
        "date": date.format("%Y-%m-%d").to_string(),
        "session": session,
        "students": rows,
        "tally": to_json(&selection.tally())?,
    }))
}

/// Records marks for one date and session. `selectAll` with a `sectionId`
/// first gives every active student of that section the same status; `marks`
/// then override individual students.
fn attendance_mark(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let marked_by = require_role(state, ATTENDANCE_ROLES)?.id.clone();
    let date = parse_date(params)?;
    let session = parse_session(params)?;
    let marks: Vec<MarkParam> = match params.get("marks") {
        Some(_) => parse_params(params, Some("marks"))?,
        None => Vec::new(),
    };

    let mut selection = AttendanceSelection::new();
    if let Some(raw) = params.get("selectAll").filter(|v| !v.is_null()) {
        let status: AttendanceStatus = serde_json::from_value(raw.clone())
            .map_err(|_| HandlerErr::bad_params("selectAll must be present or absent"))?;
        let section_id = get_optional_str(params, "sectionId")
            .ok_or_else(|| HandlerErr::bad_params("selectAll requires sectionId"))?;
        require_section(state, &section_id)?;
        let active = views::students_of(state.store.state(), &section_id)
            .into_iter()
            .filter(|s| s.status == StudentStatus::Active);
        selection.select_all(active, status);
    }
    for m in marks {
        selection.set(m.student_id, m.status);
    }
    if selection.is_empty() {
        return Err(HandlerErr::bad_params("no marks given"));
    }

    let tally = selection.tally();
    let records = state
        .store
        .mark_attendance(selection.to_records(date, session, &marked_by))?;
    Ok(json!({
        "records": to_json(&records)?,
        "tally": to_json(&tally)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.open" => attendance_open(state, &req.params),
        "attendance.mark" => attendance_mark(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
