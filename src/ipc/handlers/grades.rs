use crate::grading::{self, GradeInput};
use crate::ipc::helpers::{
    authorize, db_conn, get_required_i64, get_required_str, parse_params, respond, to_json,
    write_text_file, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use crate::roles::{Action, Resource};
use serde_json::json;

fn sheet_for(state: &AppState, req: &Request) -> Result<grading::GradeSheet, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = get_required_i64(&req.params, "classId")?;
    let subject_id = get_required_i64(&req.params, "subjectId")?;
    let semester_id = get_required_i64(&req.params, "semesterId")?;
    Ok(grading::class_grade_sheet(conn, class_id, subject_id, semester_id)?)
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Grade, Action::Read)?;
    to_json(&sheet_for(state, req)?)
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Grade, Action::Update)?;
    let conn = db_conn(state)?;
    let input: GradeInput = parse_params(&req.params)?;
    let record = grading::upsert_grade(conn, &input)?;
    if let Some(actor) = req.actor.as_ref().and_then(|a| a.user.as_deref()) {
        tracing::debug!(grade_id = record.id, actor, "grade written by");
    }
    to_json(&record)
}

fn handle_grades_export_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Grade, Action::Read)?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let sheet = sheet_for(state, req)?;
    write_text_file(&out_path, &reports::grade_sheet_csv(&sheet))?;
    Ok(json!({ "path": out_path, "rowsExported": sheet.rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.list" => handle_grades_list(state, req),
        "grades.upsert" => handle_grades_upsert(state, req),
        "grades.exportCsv" => handle_grades_export_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
