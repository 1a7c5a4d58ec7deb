mod test_support;

use serde_json::json;
use test_support::{
    error_code, request, request_ok, send_line, spawn_sidecar, temp_dir, Sidecar, ADMIN, TEACHER,
};

#[test]
fn health_needs_no_actor_or_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", None, "health", json!({}));
    assert_eq!(resp["ok"], true);
    assert!(resp["result"]["workspacePath"].is_null());
    assert!(resp["result"]["version"].is_string());
}

#[test]
fn requests_without_actor_are_unauthenticated() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", None, "classes.list", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(error_code(&resp["error"]), "unauthenticated");
}

#[test]
fn store_calls_before_workspace_select_fail_cleanly() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", Some(ADMIN), "years.list", json!({}));
    assert_eq!(error_code(&resp["error"]), "no_workspace");

    let workspace = temp_dir("schoold-smoke");
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        ADMIN,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["workspacePath"].is_string());
    assert!(workspace.join("school.sqlite3").exists());
}

#[test]
fn unknown_methods_and_bad_lines_are_reported() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", Some(ADMIN), "classes.teleport", json!({}));
    assert_eq!(error_code(&resp["error"]), "not_implemented");

    let resp = send_line(&mut stdin, &mut reader, "{not json");
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_json");

    let line = json!({ "id": "2", "method": "health", "actor": { "role": "janitor" } });
    let resp = send_line(&mut stdin, &mut reader, &line.to_string());
    assert_eq!(resp["error"]["code"], "bad_json");
}

#[test]
fn reference_lists_are_seeded() {
    let mut s = Sidecar::open("schoold-reference");
    let tiers = s.ok(TEACHER, "tiers.list", json!({}));
    let names: Vec<&str> = tiers["tiers"]
        .as_array()
        .expect("tiers")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Grade 10", "Grade 11", "Grade 12"]);

    let semesters = s.ok(TEACHER, "semesters.list", json!({}));
    assert_eq!(semesters["semesters"].as_array().map(|a| a.len()), Some(2));

    let years = s.ok(TEACHER, "years.list", json!({}));
    assert!(years["currentYearId"].is_null());
    let y = s.create_year("2024-2025");
    let years = s.ok(TEACHER, "years.list", json!({}));
    assert_eq!(years["currentYearId"], y);

    let e = s.fail(TEACHER, "tracks.create", json!({ "name": "Natural sciences" }));
    assert_eq!(error_code(&e), "permission_denied");
    let track = s.ok(ADMIN, "tracks.create", json!({ "name": "Natural sciences" }));
    assert!(track["id"].is_i64());
    let tracks = s.ok(TEACHER, "tracks.list", json!({}));
    assert_eq!(tracks["tracks"][0]["name"], "Natural sciences");
}
