use crate::error::{SchoolError, SchoolResult};
use crate::grading::{round2, Semester};
use crate::policy;
use crate::years::{self, AcademicYear};
use chrono::{Datelike, NaiveDate};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

const GENDERS: &[&str] = &["male", "female", "other"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub gender: String,
    pub birth_date: String,
    pub address: String,
    pub email: Option<String>,
    pub intake_year_id: i64,
    pub intake_year_label: String,
    pub expected_tier_id: Option<i64>,
    pub expected_tier_name: Option<String>,
    pub is_deletable: bool,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StudentInput {
    pub last_name: String,
    pub first_name: String,
    pub gender: String,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub intake_year_id: Option<i64>,
    #[serde(default)]
    pub expected_tier_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub year_id: Option<i64>,
    pub tier_id: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LookupQuery {
    pub year_id: i64,
    pub tier_id: Option<i64>,
    pub class_id: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLookupRow {
    pub student_id: i64,
    pub full_name: String,
    pub class_id: i64,
    pub class_name: String,
    pub semester1_average: Option<f64>,
    pub semester2_average: Option<f64>,
}

const STUDENT_SELECT: &str = "SELECT s.id, s.last_name, s.first_name, s.gender, s.birth_date,
        s.address, s.email, s.intake_year_id, y.label, s.expected_tier_id, g.name,
        NOT EXISTS (SELECT 1 FROM class_students cs WHERE cs.student_id = s.id)
     FROM students s
     JOIN academic_years y ON y.id = s.intake_year_id
     LEFT JOIN grade_tiers g ON g.id = s.expected_tier_id";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        last_name: r.get(1)?,
        first_name: r.get(2)?,
        gender: r.get(3)?,
        birth_date: r.get(4)?,
        address: r.get(5)?,
        email: r.get(6)?,
        intake_year_id: r.get(7)?,
        intake_year_label: r.get(8)?,
        expected_tier_id: r.get(9)?,
        expected_tier_name: r.get(10)?,
        is_deletable: r.get::<_, i64>(11)? != 0,
    })
}

fn query_students(
    conn: &Connection,
    tail: &str,
    args: Vec<SqlValue>,
) -> SchoolResult<Vec<Student>> {
    let sql = format!("{} {}", STUDENT_SELECT, tail);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Age in whole years on September 1 of `start_year`.
pub fn age_at_intake(birth: NaiveDate, start_year: i32) -> i32 {
    let mut age = start_year - birth.year();
    if (9, 1) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

pub fn validate_age(conn: &Connection, birth: NaiveDate, year: &AcademicYear) -> SchoolResult<()> {
    let policy = policy::require_policy(conn, year)?;
    let start = year.start_year()?;
    let age = age_at_intake(birth, start);
    let (min, max) = (policy.settings.min_age, policy.settings.max_age);
    if i64::from(age) < min || i64::from(age) > max {
        return Err(SchoolError::field(
            "birthDate",
            format!(
                "student would be {} on September 1, {}; academic year {} admits ages {} to {}",
                age, start, year.label, min, max
            ),
        ));
    }
    Ok(())
}

fn parse_birth_date(raw: Option<&str>) -> SchoolResult<NaiveDate> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SchoolError::field("birthDate", "birth date is required"))?;
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        SchoolError::field(
            "birthDate",
            format!("birth date '{}' must be formatted YYYY-MM-DD", raw),
        )
    })?;
    if date > chrono::Local::now().date_naive() {
        return Err(SchoolError::field(
            "birthDate",
            "birth date cannot be in the future",
        ));
    }
    Ok(date)
}

fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

/// Checks a create or full-replacement input. Returns the normalized values
/// ready to be written.
fn validate_input(
    conn: &Connection,
    input: &StudentInput,
    exclude_id: Option<i64>,
) -> SchoolResult<ValidStudent> {
    let last_name = input.last_name.trim().to_string();
    if last_name.is_empty() {
        return Err(SchoolError::field("lastName", "last name must not be empty"));
    }
    let first_name = input.first_name.trim().to_string();
    if first_name.is_empty() {
        return Err(SchoolError::field("firstName", "first name must not be empty"));
    }
    let gender = input.gender.trim().to_lowercase();
    if !GENDERS.contains(&gender.as_str()) {
        return Err(SchoolError::field(
            "gender",
            format!("gender must be one of {}", GENDERS.join(", ")),
        ));
    }
    let year_id = input
        .intake_year_id
        .ok_or_else(|| SchoolError::field("intakeYearId", "intake year is required"))?;
    let birth = parse_birth_date(input.birth_date.as_deref())?;
    if let Some(t) = input.expected_tier_id {
        crate::classes::GradeTier::require(t, "expectedTierId")?;
    }

    let email = normalize_email(input.email.as_deref());
    if let Some(email) = &email {
        if !email.contains('@') {
            return Err(SchoolError::field("email", format!("'{}' is not an email address", email)));
        }
        let owner: Option<i64> = conn
            .query_row("SELECT id FROM students WHERE email = ?", [email], |r| r.get(0))
            .optional()?;
        if owner.is_some() && owner != exclude_id {
            return Err(SchoolError::field(
                "email",
                format!("email {} is already used by another student", email),
            ));
        }
    }

    let year = years::require_year(conn, year_id)?;
    validate_age(conn, birth, &year)?;

    Ok(ValidStudent {
        last_name,
        first_name,
        gender,
        birth_date: birth.format("%Y-%m-%d").to_string(),
        address: input.address.trim().to_string(),
        email,
        intake_year_id: year.id,
        expected_tier_id: input.expected_tier_id,
    })
}

struct ValidStudent {
    last_name: String,
    first_name: String,
    gender: String,
    birth_date: String,
    address: String,
    email: Option<String>,
    intake_year_id: i64,
    expected_tier_id: Option<i64>,
}

pub fn find_student(conn: &Connection, student_id: i64) -> SchoolResult<Option<Student>> {
    let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
    Ok(conn.query_row(&sql, [student_id], student_from_row).optional()?)
}

pub fn require_student(conn: &Connection, student_id: i64) -> SchoolResult<Student> {
    find_student(conn, student_id)?
        .ok_or_else(|| SchoolError::not_found(format!("student {} not found", student_id)))
}

pub fn create_student(conn: &Connection, input: StudentInput) -> SchoolResult<Student> {
    let v = validate_input(conn, &input, None)?;
    conn.execute(
        "INSERT INTO students(last_name, first_name, gender, birth_date, address, email,
             intake_year_id, expected_tier_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            v.last_name,
            v.first_name,
            v.gender,
            v.birth_date,
            v.address,
            v.email,
            v.intake_year_id,
            v.expected_tier_id
        ],
    )?;
    let student_id = conn.last_insert_rowid();
    tracing::info!(student_id, intake_year_id = v.intake_year_id, "student created");
    require_student(conn, student_id)
}

fn is_enrolled(conn: &Connection, student_id: i64) -> SchoolResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM class_students WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn update_student(
    conn: &Connection,
    student_id: i64,
    patch: &Map<String, Value>,
) -> SchoolResult<Student> {
    let student = require_student(conn, student_id)?;
    if is_enrolled(conn, student.id)? {
        let moves_year = patch
            .get("intakeYearId")
            .map(|v| v.as_i64() != Some(student.intake_year_id))
            .unwrap_or(false);
        let message = if moves_year {
            "cannot change the intake year of an enrolled student"
        } else {
            "cannot edit an enrolled student"
        };
        tracing::debug!(student_id, "{}", message);
        return Err(SchoolError::permission(message));
    }

    let base = StudentInput {
        last_name: student.last_name.clone(),
        first_name: student.first_name.clone(),
        gender: student.gender.clone(),
        birth_date: Some(student.birth_date.clone()),
        address: student.address.clone(),
        email: student.email.clone(),
        intake_year_id: Some(student.intake_year_id),
        expected_tier_id: student.expected_tier_id,
    };
    let mut merged =
        serde_json::to_value(&base).map_err(|e| SchoolError::validation(e.to_string()))?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
    }
    let next: StudentInput =
        serde_json::from_value(merged).map_err(|e| SchoolError::validation(e.to_string()))?;
    let v = validate_input(conn, &next, Some(student.id))?;

    conn.execute(
        "UPDATE students SET last_name = ?, first_name = ?, gender = ?, birth_date = ?,
             address = ?, email = ?, intake_year_id = ?, expected_tier_id = ?
         WHERE id = ?",
        rusqlite::params![
            v.last_name,
            v.first_name,
            v.gender,
            v.birth_date,
            v.address,
            v.email,
            v.intake_year_id,
            v.expected_tier_id,
            student.id
        ],
    )?;
    tracing::info!(student_id, "student updated");
    require_student(conn, student.id)
}

pub fn delete_student(conn: &Connection, student_id: i64) -> SchoolResult<()> {
    let student = require_student(conn, student_id)?;
    if !student.is_deletable {
        return Err(SchoolError::permission(format!(
            "student {} is enrolled in a class and cannot be deleted",
            student.full_name()
        )));
    }
    conn.execute("DELETE FROM students WHERE id = ?", [student.id])?;
    tracing::info!(student_id, "student deleted");
    Ok(())
}

fn matches_search(needle: &str, haystacks: &[&str]) -> bool {
    haystacks.iter().any(|h| h.to_lowercase().contains(needle))
}

fn search_needle(search: Option<&str>) -> Option<String> {
    search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

pub fn list_students(conn: &Connection, filter: &StudentFilter) -> SchoolResult<Vec<Student>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(y) = filter.year_id {
        clauses.push("s.intake_year_id = ?");
        args.push(SqlValue::Integer(y));
    }
    if let Some(t) = filter.tier_id {
        clauses.push("s.expected_tier_id = ?");
        args.push(SqlValue::Integer(t));
    }
    let mut tail = String::new();
    if !clauses.is_empty() {
        tail.push_str("WHERE ");
        tail.push_str(&clauses.join(" AND "));
    }
    tail.push_str(" ORDER BY s.last_name, s.first_name, s.id");
    let mut rows = query_students(conn, &tail, args)?;

    // Name matching happens here so that accented names fold correctly.
    if let Some(needle) = search_needle(filter.search.as_deref()) {
        rows.retain(|s| {
            let full = s.full_name();
            matches_search(
                &needle,
                &[full.as_str(), s.email.as_deref().unwrap_or_default()],
            )
        });
    }
    Ok(rows)
}

pub fn students_of_class(conn: &Connection, class_id: i64) -> SchoolResult<Vec<Student>> {
    query_students(
        conn,
        "JOIN class_students link ON link.student_id = s.id
         WHERE link.class_id = ? ORDER BY s.last_name, s.first_name, s.id",
        vec![SqlValue::Integer(class_id)],
    )
}

/// Students taken in for `year_id` and expected in `tier_id` who have no
/// class in that year yet.
pub fn unplaced_students(
    conn: &Connection,
    year_id: i64,
    tier_id: i64,
) -> SchoolResult<Vec<Student>> {
    query_students(
        conn,
        "WHERE s.intake_year_id = ?1 AND s.expected_tier_id = ?2
           AND NOT EXISTS (
             SELECT 1 FROM class_students cs WHERE cs.student_id = s.id AND cs.year_id = ?1
           )
         ORDER BY s.last_name, s.first_name, s.id",
        vec![SqlValue::Integer(year_id), SqlValue::Integer(tier_id)],
    )
}

pub fn lookup_students(
    conn: &Connection,
    q: &LookupQuery,
) -> SchoolResult<Vec<StudentLookupRow>> {
    years::require_year(conn, q.year_id)?;

    let mut sql = String::from(
        "SELECT s.id, s.last_name, s.first_name, c.id, c.name
         FROM class_students cs
         JOIN students s ON s.id = cs.student_id
         JOIN classes c ON c.id = cs.class_id
         WHERE cs.year_id = ?",
    );
    let mut args = vec![SqlValue::Integer(q.year_id)];
    if let Some(t) = q.tier_id {
        sql.push_str(" AND c.tier_id = ?");
        args.push(SqlValue::Integer(t));
    }
    if let Some(c) = q.class_id {
        sql.push_str(" AND c.id = ?");
        args.push(SqlValue::Integer(c));
    }
    sql.push_str(" ORDER BY c.name, s.last_name, s.first_name, s.id");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params_from_iter(args), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(StudentLookupRow {
                student_id: r.get(0)?,
                full_name: format!("{} {}", last, first),
                class_id: r.get(3)?,
                class_name: r.get(4)?,
                semester1_average: None,
                semester2_average: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(needle) = search_needle(q.search.as_deref()) {
        rows.retain(|r| matches_search(&needle, &[r.full_name.as_str()]));
    }

    let mut avg_stmt = conn.prepare(
        "SELECT gr.student_id, gr.class_id, gr.semester_id, AVG(gr.average)
         FROM grade_records gr
         JOIN class_students cs ON cs.student_id = gr.student_id AND cs.class_id = gr.class_id
         WHERE cs.year_id = ? AND gr.average IS NOT NULL
         GROUP BY gr.student_id, gr.class_id, gr.semester_id",
    )?;
    let mut averages: HashMap<(i64, i64, i64), f64> = HashMap::new();
    let mut raw = avg_stmt.query([q.year_id])?;
    while let Some(row) = raw.next()? {
        averages.insert((row.get(0)?, row.get(1)?, row.get(2)?), row.get(3)?);
    }

    for r in rows.iter_mut() {
        let (student_id, class_id) = (r.student_id, r.class_id);
        let avg = |s: Semester| {
            averages
                .get(&(student_id, class_id, s.id()))
                .copied()
                .map(round2)
        };
        r.semester1_average = avg(Semester::First);
        r.semester2_average = avg(Semester::Second);
    }
    Ok(rows)
}
