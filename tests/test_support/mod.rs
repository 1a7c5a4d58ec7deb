#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN: &str = "administrator";
pub const REGISTRAR: &str = "registrar";
pub const TEACHER: &str = "teacher";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    line: &str,
) -> Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    serde_json::from_str(out.trim()).expect("parse response json")
}

/// Sends one request. `role` of `None` omits the actor entirely.
pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    role: Option<&str>,
    method: &str,
    params: Value,
) -> Value {
    let mut payload = json!({ "id": id, "method": method, "params": params });
    if let Some(role) = role {
        payload["actor"] = json!({ "role": role, "user": format!("{}-tester", role) });
    }
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id), "{}", value);
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    role: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, Some(role), method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Expects a failure and returns the `error` object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    role: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, Some(role), method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or_default()
}

/// Settings used across the integration tests: two Grade 10 classes, one
/// Grade 11 class, unlimited Grade 12, class size 3, two subjects per class,
/// ages 15 to 20, threshold 5.0.
pub fn sample_settings() -> Value {
    json!({
        "maxClassesGrade10": 2,
        "maxClassesGrade11": 1,
        "maxClassSize": 3,
        "maxSubjectsPerClass": 2,
        "minAge": 15,
        "maxAge": 20,
        "passingThreshold": 5.0
    })
}

/// A workspace-bound sidecar with an auto-incrementing request id.
pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    pub workspace: PathBuf,
    next_id: u64,
}

impl Sidecar {
    pub fn open(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Sidecar {
            child,
            stdin,
            reader,
            workspace,
            next_id: 0,
        };
        let path = s.workspace.to_string_lossy().to_string();
        s.ok(ADMIN, "workspace.select", json!({ "path": path }));
        s
    }

    fn id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn ok(&mut self, role: &str, method: &str, params: Value) -> Value {
        let id = self.id();
        request_ok(&mut self.stdin, &mut self.reader, &id, role, method, params)
    }

    pub fn fail(&mut self, role: &str, method: &str, params: Value) -> Value {
        let id = self.id();
        request_err(&mut self.stdin, &mut self.reader, &id, role, method, params)
    }

    pub fn create_year(&mut self, label: &str) -> i64 {
        let res = self.ok(
            ADMIN,
            "policies.create",
            json!({ "label": label, "settings": sample_settings() }),
        );
        res["yearId"].as_i64().expect("yearId")
    }

    pub fn create_class(&mut self, year_id: i64, name: &str, tier_id: i64) -> i64 {
        let res = self.ok(
            REGISTRAR,
            "classes.create",
            json!({ "name": name, "yearId": year_id, "tierId": tier_id }),
        );
        res["id"].as_i64().expect("class id")
    }

    pub fn create_subject(&mut self, year_id: i64, name: &str) -> i64 {
        let res = self.ok(
            REGISTRAR,
            "subjects.create",
            json!({ "name": name, "yearId": year_id }),
        );
        res["id"].as_i64().expect("subject id")
    }

    /// Student born March 15, sixteen years before the year's start.
    pub fn create_student(
        &mut self,
        year_id: i64,
        start_year: i32,
        first: &str,
        tier_id: i64,
    ) -> i64 {
        let res = self.ok(
            REGISTRAR,
            "students.create",
            json!({
                "lastName": "Pham",
                "firstName": first,
                "gender": "male",
                "birthDate": format!("{}-03-15", start_year - 16),
                "intakeYearId": year_id,
                "expectedTierId": tier_id
            }),
        );
        res["id"].as_i64().expect("student id")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
