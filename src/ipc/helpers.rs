use crate::error::SchoolError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::roles::{self, Action, Resource, Role};
use crate::years::CurrentYear;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SchoolError> for HandlerErr {
    fn from(e: SchoolError) -> Self {
        match &e {
            SchoolError::Db(inner) => tracing::error!(error = %inner, "database failure"),
            _ => tracing::debug!(code = e.code(), message = %e, "request rejected"),
        }
        HandlerErr {
            code: e.code(),
            details: Some(e.details()),
            message: e.to_string(),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub fn actor_role(req: &Request) -> Result<Role, HandlerErr> {
    req.actor.as_ref().map(|a| a.role).ok_or_else(|| HandlerErr {
        code: "unauthenticated",
        message: "request carries no actor".to_string(),
        details: None,
    })
}

/// Role of the caller, after checking it may perform `action` on `resource`.
pub fn authorize(req: &Request, resource: Resource, action: Action) -> Result<Role, HandlerErr> {
    let role = actor_role(req)?;
    roles::ensure_allowed(role, resource, action)?;
    Ok(role)
}

pub fn current_year(conn: &Connection) -> Result<CurrentYear, HandlerErr> {
    Ok(CurrentYear::resolve(conn)?)
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params(format!("missing or non-integer params.{}", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| bad_params(format!("params.{} must be an integer", key))),
    }
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    get_optional_str(params, key).ok_or_else(|| bad_params(format!("missing params.{}", key)))
}

pub fn get_id_list(params: &Value, key: &str) -> Result<Vec<i64>, HandlerErr> {
    let arr = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| bad_params(format!("missing params.{} array", key)))?;
    arr.iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| bad_params(format!("params.{} must contain integers", key)))
        })
        .collect()
}

/// Reads `params.patch` and rejects any field the caller's role may not write.
pub fn get_patch(
    params: &Value,
    role: Role,
    resource: Resource,
) -> Result<Map<String, Value>, HandlerErr> {
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .cloned()
        .ok_or_else(|| bad_params("missing params.patch object"))?;
    roles::ensure_patch_fields(role, resource, &patch)?;
    Ok(patch)
}

pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| bad_params(e.to_string()))
}

pub fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "serialize_failed",
        message: e.to_string(),
        details: None,
    })
}

pub fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    let out = PathBuf::from(path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "export_failed",
            message: e.to_string(),
            details: Some(json!({ "path": path })),
        })?;
    }
    std::fs::write(&out, contents).map_err(|e| HandlerErr {
        code: "export_failed",
        message: e.to_string(),
        details: Some(json!({ "path": path })),
    })?;
    tracing::info!(path, bytes = contents.len(), "csv exported");
    Ok(())
}
