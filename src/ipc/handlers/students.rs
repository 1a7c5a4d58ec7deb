use crate::ipc::helpers::{
    authorize, db_conn, get_optional_i64, get_optional_str, get_patch, get_required_i64,
    parse_params, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Action, Resource};
use crate::students::{self, LookupQuery, StudentFilter, StudentInput};
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Student, Action::Read)?;
    let conn = db_conn(state)?;
    let filter = StudentFilter {
        year_id: get_optional_i64(&req.params, "yearId")?,
        tier_id: get_optional_i64(&req.params, "tierId")?,
        search: get_optional_str(&req.params, "search"),
    };
    Ok(json!({ "students": to_json(&students::list_students(conn, &filter)?)? }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Student, Action::Create)?;
    let conn = db_conn(state)?;
    let input: StudentInput = parse_params(&req.params)?;
    to_json(&students::create_student(conn, input)?)
}

fn handle_students_get(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Student, Action::Read)?;
    let conn = db_conn(state)?;
    let student_id = get_required_i64(&req.params, "studentId")?;
    to_json(&students::require_student(conn, student_id)?)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let role = authorize(req, Resource::Student, Action::Update)?;
    let conn = db_conn(state)?;
    let student_id = get_required_i64(&req.params, "studentId")?;
    let patch = get_patch(&req.params, role, Resource::Student)?;
    to_json(&students::update_student(conn, student_id, &patch)?)
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Student, Action::Delete)?;
    let conn = db_conn(state)?;
    let student_id = get_required_i64(&req.params, "studentId")?;
    students::delete_student(conn, student_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_students_lookup(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::StudentLookup, Action::Read)?;
    let conn = db_conn(state)?;
    let query = LookupQuery {
        year_id: get_required_i64(&req.params, "yearId")?,
        tier_id: get_optional_i64(&req.params, "tierId")?,
        class_id: get_optional_i64(&req.params, "classId")?,
        search: get_optional_str(&req.params, "search"),
    };
    Ok(json!({ "rows": to_json(&students::lookup_students(conn, &query)?)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.get" => handle_students_get(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        "students.lookup" => handle_students_lookup(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
