use crate::error::StoreError;
use crate::ipc::helpers::{
    get_required_str, parse_params, require_role, respond, to_json, HandlerErr, WRITE_ROLES,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{EntityKind, NewTimetableEntry, TimetableEntryPatch};
use crate::views;
use serde_json::json;

fn timetable_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    if state.store.section(&section_id).is_none() {
        return Err(StoreError::not_found(EntityKind::Section, section_id).into());
    }
    let entries = views::section_timetable(state.store.state(), &section_id);
    Ok(json!({ "entries": to_json(&entries)? }))
}

/// The entry shown in grid column `dayIndex` (0 = first school day, Monday)
/// and row `timeSlotId`, or null.
fn timetable_cell(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let slot_id = get_required_str(params, "timeSlotId")?;
    let day_index = params
        .get("dayIndex")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing dayIndex"))?;
    let entry = usize::try_from(day_index)
        .ok()
        .and_then(|d| views::timetable_entry(state.store.state(), &section_id, d, &slot_id));
    Ok(json!({ "entry": to_json(&entry)? }))
}

fn timetable_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let new: NewTimetableEntry = parse_params(params, None)?;
    let entry = state.store.add_timetable_entry(new)?;
    Ok(json!({ "entry": to_json(&entry)? }))
}

fn timetable_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let entry_id = get_required_str(params, "entryId")?;
    let patch: TimetableEntryPatch = parse_params(params, Some("patch"))?;
    let entry = state.store.update_timetable_entry(&entry_id, patch)?;
    Ok(json!({ "entry": to_json(&entry)? }))
}

fn timetable_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(state, WRITE_ROLES)?;
    let entry_id = get_required_str(params, "entryId")?;
    let removed = state.store.delete_timetable_entry(&entry_id)?;
    Ok(json!({ "removed": to_json(&removed)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "timetable.slots" => {
            to_json(&views::time_slots(state.store.settings())).map(|v| json!({ "slots": v }))
        }
        "timetable.days" => {
            to_json(&views::school_days(state.store.settings())).map(|v| json!({ "days": v }))
        }
        "timetable.list" => timetable_list(state, &req.params),
        "timetable.cell" => timetable_cell(state, &req.params),
        "timetable.create" => timetable_create(state, &req.params),
        "timetable.update" => timetable_update(state, &req.params),
        "timetable.delete" => timetable_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
