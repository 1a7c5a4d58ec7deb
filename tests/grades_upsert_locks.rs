mod test_support;

use serde_json::{json, Value};
use test_support::{error_code, Sidecar, ADMIN, REGISTRAR, TEACHER};

struct Fixture {
    s: Sidecar,
    year_id: i64,
    class_id: i64,
    subject_id: i64,
    student_id: i64,
}

fn fixture(prefix: &str) -> Fixture {
    let mut s = Sidecar::open(prefix);
    let year_id = s.create_year("2024-2025");
    let class_id = s.create_class(year_id, "10A1", 1);
    let subject_id = s.create_subject(year_id, "Math");
    let student_id = s.create_student(year_id, 2024, "Long", 1);
    s.ok(
        REGISTRAR,
        "classes.subjects.set",
        json!({ "classId": class_id, "subjectIds": [subject_id] }),
    );
    s.ok(
        REGISTRAR,
        "classes.students.set",
        json!({ "classId": class_id, "studentIds": [student_id] }),
    );
    Fixture {
        s,
        year_id,
        class_id,
        subject_id,
        student_id,
    }
}

fn grade(f: &Fixture, semester: i64, a: Value, b: Value) -> Value {
    json!({
        "studentId": f.student_id,
        "classId": f.class_id,
        "subjectId": f.subject_id,
        "semesterId": semester,
        "scoreA": a,
        "scoreB": b
    })
}

#[test]
fn weighted_average_and_idempotent_upsert() {
    let mut f = fixture("schoold-grades-upsert");
    let params = grade(&f, 1, json!(8.0), json!(6.0));
    let first = f.s.ok(TEACHER, "grades.upsert", params.clone());
    assert_eq!(first["average"], 6.67);
    assert_eq!(first["passed"], true);
    let again = f.s.ok(TEACHER, "grades.upsert", params);
    assert_eq!(first, again);

    let params = grade(&f, 1, json!(9.0), Value::Null);
    let partial = f.s.ok(TEACHER, "grades.upsert", params);
    assert_eq!(partial["id"], first["id"]);
    assert!(partial["average"].is_null());

    let sheet = f.s.ok(
        TEACHER,
        "grades.list",
        json!({ "classId": f.class_id, "subjectId": f.subject_id, "semesterId": 1 }),
    );
    assert_eq!(sheet["rows"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(sheet["rows"][0]["scoreA"], 9.0);
}

#[test]
fn out_of_range_scores_and_extra_fields_are_rejected() {
    let mut f = fixture("schoold-grades-range");
    let params = grade(&f, 1, json!(11.0), json!(5.0));
    let e = f.s.fail(TEACHER, "grades.upsert", params);
    assert_eq!(error_code(&e), "validation_failed");
    assert!(e["details"]["fields"]["scoreA"].is_array());

    let mut params = grade(&f, 1, json!(5.0), json!(5.0));
    params["average"] = json!(10.0);
    let e = f.s.fail(TEACHER, "grades.upsert", params);
    assert_eq!(error_code(&e), "bad_params");
}

#[test]
fn locked_semester_rejects_every_role() {
    let mut f = fixture("schoold-grades-lock");
    f.s.ok(
        REGISTRAR,
        "policies.update",
        json!({ "yearId": f.year_id, "patch": { "lockSemester1": true } }),
    );
    for role in [ADMIN, REGISTRAR, TEACHER] {
        let params = grade(&f, 1, json!(5.0), json!(5.0));
        let e = f.s.fail(role, "grades.upsert", params);
        assert_eq!(error_code(&e), "permission_denied");
    }
    let params = grade(&f, 2, json!(5.0), json!(5.0));
    f.s.ok(TEACHER, "grades.upsert", params);

    let e = f.s.fail(
        REGISTRAR,
        "classes.subjects.set",
        json!({ "classId": f.class_id, "subjectIds": [] }),
    );
    assert_eq!(error_code(&e), "permission_denied");
}

#[test]
fn grade_sheet_exports_to_csv() {
    let mut f = fixture("schoold-grades-export");
    let params = grade(&f, 1, json!(4.0), json!(5.0));
    f.s.ok(TEACHER, "grades.upsert", params);
    let out = f.s.workspace.join("exports").join("math.csv");
    let res = f.s.ok(
        TEACHER,
        "grades.exportCsv",
        json!({
            "classId": f.class_id,
            "subjectId": f.subject_id,
            "semesterId": 1,
            "outPath": out.to_string_lossy()
        }),
    );
    assert_eq!(res["rowsExported"], 1);
    let text = std::fs::read_to_string(&out).expect("read csv");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("student_id,name,score_a,score_b,average,passed"));
    let row = lines.next().expect("row");
    assert!(row.ends_with("Pham Long,4.00,5.00,4.67,no"), "{}", row);
}
