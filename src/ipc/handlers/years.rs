use crate::classes;
use crate::grading;
use crate::ipc::helpers::{authorize, db_conn, get_required_str, respond, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Action, Resource};
use crate::subjects;
use crate::years;
use serde_json::json;

fn handle_years_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Reference, Action::Read)?;
    let conn = db_conn(state)?;
    let current = years::CurrentYear::resolve(conn)?;
    let list = years::list_years(conn)?;
    Ok(json!({
        "years": to_json(&list)?,
        "currentYearId": current.year().map(|y| y.id),
    }))
}

fn handle_tiers_list(_state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Reference, Action::Read)?;
    Ok(json!({ "tiers": classes::list_tiers() }))
}

fn handle_semesters_list(_state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Reference, Action::Read)?;
    Ok(json!({ "semesters": grading::list_semesters() }))
}

fn handle_tracks_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Track, Action::Read)?;
    let conn = db_conn(state)?;
    Ok(json!({ "tracks": to_json(&subjects::list_tracks(conn)?)? }))
}

fn handle_tracks_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Track, Action::Create)?;
    let conn = db_conn(state)?;
    let name = get_required_str(&req.params, "name")?;
    to_json(&subjects::create_track(conn, &name)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "years.list" => handle_years_list(state, req),
        "tiers.list" => handle_tiers_list(state, req),
        "semesters.list" => handle_semesters_list(state, req),
        "tracks.list" => handle_tracks_list(state, req),
        "tracks.create" => handle_tracks_create(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
