mod test_support;

use serde_json::{json, Value};
use test_support::{error_code, Sidecar, REGISTRAR, TEACHER};

fn student(year_id: i64, birth: &str) -> Value {
    json!({
        "lastName": "Vo",
        "firstName": "Mai",
        "gender": "female",
        "birthDate": birth,
        "intakeYearId": year_id,
        "expectedTierId": 1
    })
}

#[test]
fn age_on_september_first_must_fit_the_policy_window() {
    let mut s = Sidecar::open("schoold-student-age");
    let y = s.create_year("2024-2025");

    s.ok(REGISTRAR, "students.create", student(y, "2009-09-01"));
    s.ok(REGISTRAR, "students.create", student(y, "2003-09-02"));

    let e = s.fail(REGISTRAR, "students.create", student(y, "2009-09-02"));
    assert_eq!(error_code(&e), "validation_failed");
    assert!(e["details"]["fields"]["birthDate"].is_array());
    let e = s.fail(REGISTRAR, "students.create", student(y, "2003-09-01"));
    assert!(e["message"].as_str().unwrap_or_default().contains("21"));
}

#[test]
fn malformed_students_are_rejected() {
    let mut s = Sidecar::open("schoold-student-invalid");
    let y = s.create_year("2024-2025");

    let mut future = student(y, "2999-01-01");
    let e = s.fail(REGISTRAR, "students.create", future.clone());
    assert!(e["details"]["fields"]["birthDate"].is_array());

    future["birthDate"] = Value::Null;
    let e = s.fail(REGISTRAR, "students.create", future);
    assert!(e["message"].as_str().unwrap_or_default().contains("required"));

    let mut bad_gender = student(y, "2008-01-01");
    bad_gender["gender"] = json!("robot");
    let e = s.fail(REGISTRAR, "students.create", bad_gender);
    assert!(e["details"]["fields"]["gender"].is_array());

    let mut unknown_field = student(y, "2008-01-01");
    unknown_field["nickname"] = json!("M");
    let e = s.fail(REGISTRAR, "students.create", unknown_field);
    assert_eq!(error_code(&e), "bad_params");

    let e = s.fail(TEACHER, "students.create", student(y, "2008-01-01"));
    assert_eq!(error_code(&e), "permission_denied");
}

#[test]
fn enrolled_students_cannot_be_edited_or_deleted() {
    let mut s = Sidecar::open("schoold-student-lock");
    let old = s.create_year("2023-2024");
    let y = s.create_year("2024-2025");
    let c = s.create_class(y, "10A1", 1);
    let id = s.create_student(y, 2024, "Khoa", 1);

    let updated = s.ok(
        REGISTRAR,
        "students.update",
        json!({ "studentId": id, "patch": { "email": "khoa@school.edu" } }),
    );
    assert_eq!(updated["email"], "khoa@school.edu");

    s.ok(
        REGISTRAR,
        "classes.students.set",
        json!({ "classId": c, "studentIds": [id] }),
    );
    let e = s.fail(
        REGISTRAR,
        "students.update",
        json!({ "studentId": id, "patch": { "intakeYearId": old } }),
    );
    assert_eq!(error_code(&e), "permission_denied");
    assert_eq!(e["message"], "cannot change the intake year of an enrolled student");

    let e = s.fail(
        REGISTRAR,
        "students.update",
        json!({ "studentId": id, "patch": { "address": "1 Hai Ba Trung" } }),
    );
    assert_eq!(e["message"], "cannot edit an enrolled student");

    let e = s.fail(REGISTRAR, "students.delete", json!({ "studentId": id }));
    assert_eq!(error_code(&e), "permission_denied");

    let listed = s.ok(REGISTRAR, "students.list", json!({ "yearId": y }));
    assert_eq!(listed["students"][0]["isDeletable"], false);
}

#[test]
fn lookup_is_open_to_teachers() {
    let mut s = Sidecar::open("schoold-student-lookup");
    let y = s.create_year("2024-2025");
    let c = s.create_class(y, "10A1", 1);
    let id = s.create_student(y, 2024, "Tuan", 1);
    s.create_student(y, 2024, "Unplaced", 1);
    s.ok(
        REGISTRAR,
        "classes.students.set",
        json!({ "classId": c, "studentIds": [id] }),
    );

    let e = s.fail(TEACHER, "students.list", json!({}));
    assert_eq!(error_code(&e), "permission_denied");

    let found = s.ok(TEACHER, "students.lookup", json!({ "yearId": y, "search": "tuan" }));
    let rows = found["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["className"], "10A1");
    assert!(rows[0]["semester1Average"].is_null());
}
