use crate::ipc::helpers::{
    authorize, bad_params, db_conn, get_required_i64, get_required_str, respond, to_json,
    write_text_file, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use crate::roles::{Action, Resource};
use serde_json::json;

fn handle_reports_by_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Report, Action::Read)?;
    let conn = db_conn(state)?;
    let subject_id = get_required_i64(&req.params, "subjectId")?;
    let semester_id = get_required_i64(&req.params, "semesterId")?;
    to_json(&reports::report_by_subject(conn, subject_id, semester_id)?)
}

fn handle_reports_by_semester(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Report, Action::Read)?;
    let conn = db_conn(state)?;
    let year_id = get_required_i64(&req.params, "yearId")?;
    let semester_id = get_required_i64(&req.params, "semesterId")?;
    to_json(&reports::report_by_semester(conn, year_id, semester_id)?)
}

fn handle_reports_export_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Report, Action::Read)?;
    let conn = db_conn(state)?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let kind = get_required_str(&req.params, "kind")?;
    let semester_id = get_required_i64(&req.params, "semesterId")?;
    let rows = match kind.as_str() {
        "bySubject" => {
            let subject_id = get_required_i64(&req.params, "subjectId")?;
            reports::report_by_subject(conn, subject_id, semester_id)?.rows
        }
        "bySemester" => {
            let year_id = get_required_i64(&req.params, "yearId")?;
            reports::report_by_semester(conn, year_id, semester_id)?.rows
        }
        other => {
            return Err(bad_params(format!(
                "params.kind must be bySubject or bySemester (got {})",
                other
            )))
        }
    };
    write_text_file(&out_path, &reports::pass_rate_csv(&rows))?;
    Ok(json!({ "path": out_path, "rowsExported": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.bySubject" => handle_reports_by_subject(state, req),
        "reports.bySemester" => handle_reports_by_semester(state, req),
        "reports.exportCsv" => handle_reports_export_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
