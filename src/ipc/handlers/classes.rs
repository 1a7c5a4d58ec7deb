use crate::classes::{self, ClassFilter, ClassInput};
use crate::ipc::helpers::{
    authorize, current_year, db_conn, get_id_list, get_optional_i64, get_patch,
    get_required_i64, parse_params, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Action, Resource};
use crate::students;
use serde_json::json;

fn handle_classes_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Class, Action::Read)?;
    let conn = db_conn(state)?;
    let filter = ClassFilter {
        year_id: get_optional_i64(&req.params, "yearId")?,
        tier_id: get_optional_i64(&req.params, "tierId")?,
        track_id: get_optional_i64(&req.params, "trackId")?,
    };
    Ok(json!({ "classes": to_json(&classes::list_classes(conn, &filter)?)? }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Class, Action::Create)?;
    let conn = db_conn(state)?;
    let input: ClassInput = parse_params(&req.params)?;
    to_json(&classes::create_class(conn, input)?)
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Class, Action::Read)?;
    let conn = db_conn(state)?;
    let class_id = get_required_i64(&req.params, "classId")?;
    let current = current_year(conn)?;
    to_json(&classes::class_detail(conn, &current, class_id)?)
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let role = authorize(req, Resource::Class, Action::Update)?;
    let conn = db_conn(state)?;
    let class_id = get_required_i64(&req.params, "classId")?;
    let patch = get_patch(&req.params, role, Resource::Class)?;
    let current = current_year(conn)?;
    to_json(&classes::update_class(conn, &current, class_id, &patch)?)
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Class, Action::Delete)?;
    let conn = db_conn(state)?;
    let class_id = get_required_i64(&req.params, "classId")?;
    let current = current_year(conn)?;
    classes::delete_class(conn, &current, class_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_classes_subjects_set(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Class, Action::Update)?;
    let conn = db_conn(state)?;
    let class_id = get_required_i64(&req.params, "classId")?;
    let subject_ids = get_id_list(&req.params, "subjectIds")?;
    let current = current_year(conn)?;
    let subjects = classes::assign_subjects(conn, &current, class_id, &subject_ids)?;
    Ok(json!({ "subjects": to_json(&subjects)? }))
}

/// Enrolled students plus the candidates that could still be added.
fn handle_classes_students_get(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Class, Action::Read)?;
    let conn = db_conn(state)?;
    let class_id = get_required_i64(&req.params, "classId")?;
    let class = classes::require_class(conn, class_id)?;
    let enrolled = students::students_of_class(conn, class.id)?;
    let eligible = classes::list_eligible_students(conn, class.id)?;
    Ok(json!({
        "classId": class.id,
        "size": class.size,
        "enrolled": to_json(&enrolled)?,
        "eligible": to_json(&eligible)?,
    }))
}

fn handle_classes_students_set(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Class, Action::Update)?;
    let conn = db_conn(state)?;
    let class_id = get_required_i64(&req.params, "classId")?;
    let student_ids = get_id_list(&req.params, "studentIds")?;
    let current = current_year(conn)?;
    let size = classes::assign_students(conn, &current, class_id, &student_ids)?;
    let enrolled = students::students_of_class(conn, class_id)?;
    Ok(json!({ "size": size, "students": to_json(&enrolled)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => handle_classes_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.get" => handle_classes_get(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        "classes.subjects.set" => handle_classes_subjects_set(state, req),
        "classes.students.get" => handle_classes_students_get(state, req),
        "classes.students.set" => handle_classes_students_set(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
