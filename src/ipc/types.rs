use std::path::PathBuf;

use crate::roles::Role;
use rusqlite::Connection;
use serde::Deserialize;

/// Who is calling. The host application authenticates users; the daemon only
/// trusts the role it is handed.
#[derive(Debug, Deserialize, Clone)]
pub struct Actor {
    pub role: Role,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub actor: Option<Actor>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
