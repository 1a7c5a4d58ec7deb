use crate::error::SchoolError;
use crate::ipc::helpers::{
    authorize, bad_params, current_year, db_conn, get_patch, get_required_i64, get_required_str,
    respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, PolicySettings};
use crate::roles::{Action, Resource};
use crate::years;
use serde_json::json;

fn handle_policies_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Policy, Action::Read)?;
    let conn = db_conn(state)?;
    Ok(json!({ "policies": to_json(&policy::list_policies(conn)?)? }))
}

fn handle_policies_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Policy, Action::Create)?;
    let conn = db_conn(state)?;
    let label = get_required_str(&req.params, "label")?;
    let raw = req
        .params
        .get("settings")
        .cloned()
        .ok_or_else(|| bad_params("missing params.settings"))?;
    let settings: PolicySettings =
        serde_json::from_value(raw).map_err(|e| bad_params(e.to_string()))?;
    to_json(&policy::create_year_with_policy(conn, &label, settings)?)
}

fn handle_policies_get(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Policy, Action::Read)?;
    let conn = db_conn(state)?;
    let year_id = get_required_i64(&req.params, "yearId")?;
    let year = years::require_year(conn, year_id)?;
    to_json(&policy::require_policy(conn, &year)?)
}

fn handle_policies_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let role = authorize(req, Resource::Policy, Action::Update)?;
    let conn = db_conn(state)?;
    let year_id = get_required_i64(&req.params, "yearId")?;
    let patch = get_patch(&req.params, role, Resource::Policy)?;
    if patch.is_empty() {
        return Err(SchoolError::validation("patch has no fields").into());
    }
    to_json(&policy::update_policy(conn, year_id, &patch)?)
}

fn handle_policies_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::Policy, Action::Delete)?;
    let conn = db_conn(state)?;
    let year_id = get_required_i64(&req.params, "yearId")?;
    policy::delete_policy(conn, year_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_policies_current(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, Resource::CurrentPolicy, Action::Read)?;
    let conn = db_conn(state)?;
    let current = current_year(conn)?;
    let found = policy::current_policy(conn, &current)?;
    Ok(json!({ "policy": to_json(&found)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "policies.list" => handle_policies_list(state, req),
        "policies.create" => handle_policies_create(state, req),
        "policies.get" => handle_policies_get(state, req),
        "policies.update" => handle_policies_update(state, req),
        "policies.delete" => handle_policies_delete(state, req),
        "policies.current" => handle_policies_current(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
