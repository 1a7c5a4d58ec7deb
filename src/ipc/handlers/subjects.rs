use crate::ipc::helpers::{
    authorize, current_year, db_conn, get_optional_i64, get_patch, get_required_i64,
    parse_params, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Action, Resource};
use crate::subjects::{self, SubjectFilter, SubjectInput};
use serde_json::json;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Subject, Action::Read)?;
    let conn = db_conn(state)?;
    let filter = SubjectFilter {
        year_id: get_optional_i64(&req.params, "yearId")?,
        track_id: get_optional_i64(&req.params, "trackId")?,
    };
    Ok(json!({ "subjects": to_json(&subjects::list_subjects(conn, &filter)?)? }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Subject, Action::Create)?;
    let conn = db_conn(state)?;
    let input: SubjectInput = parse_params(&req.params)?;
    to_json(&subjects::create_subject(conn, input)?)
}

fn handle_subjects_get(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Subject, Action::Read)?;
    let conn = db_conn(state)?;
    let subject_id = get_required_i64(&req.params, "subjectId")?;
    to_json(&subjects::require_subject(conn, subject_id)?)
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let role = authorize(req, Resource::Subject, Action::Update)?;
    let conn = db_conn(state)?;
    let subject_id = get_required_i64(&req.params, "subjectId")?;
    let patch = get_patch(&req.params, role, Resource::Subject)?;
    let current = current_year(conn)?;
    to_json(&subjects::update_subject(conn, &current, subject_id, &patch)?)
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Subject, Action::Delete)?;
    let conn = db_conn(state)?;
    let subject_id = get_required_i64(&req.params, "subjectId")?;
    let current = current_year(conn)?;
    subjects::delete_subject(conn, &current, subject_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.create" => handle_subjects_create(state, req),
        "subjects.get" => handle_subjects_get(state, req),
        "subjects.update" => handle_subjects_update(state, req),
        "subjects.delete" => handle_subjects_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
