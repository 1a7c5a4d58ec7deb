use crate::classes;
use crate::error::{SchoolError, SchoolResult};
use crate::policy;
use crate::students;
use crate::subjects;
use crate::years;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semester {
    First,
    Second,
}

impl Semester {
    pub const ALL: [Semester; 2] = [Semester::First, Semester::Second];

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::First => "Semester 1",
            Self::Second => "Semester 2",
        }
    }

    pub fn require(id: i64) -> SchoolResult<Self> {
        Self::from_id(id)
            .ok_or_else(|| SchoolError::field("semesterId", format!("unknown semester {}", id)))
    }
}

/// Half-up rounding to two decimals: `Int(100*x + 0.5) / 100`.
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Quiz score weighs 1, period test weighs 2. Incomplete pairs have no average.
pub fn weighted_average(score_a: Option<f64>, score_b: Option<f64>) -> Option<f64> {
    match (score_a, score_b) {
        (Some(a), Some(b)) => Some(round2((a + 2.0 * b) / 3.0)),
        _ => None,
    }
}

pub fn is_passing(average: f64, threshold: f64) -> bool {
    average >= threshold
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GradeInput {
    pub student_id: i64,
    pub class_id: i64,
    pub subject_id: i64,
    pub semester_id: i64,
    #[serde(default)]
    pub score_a: Option<f64>,
    #[serde(default)]
    pub score_b: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub subject_id: i64,
    pub semester_id: i64,
    pub score_a: Option<f64>,
    pub score_b: Option<f64>,
    pub average: Option<f64>,
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSheetRow {
    pub student_id: i64,
    pub full_name: String,
    pub score_a: Option<f64>,
    pub score_b: Option<f64>,
    pub average: Option<f64>,
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSheet {
    pub class_id: i64,
    pub class_name: String,
    pub subject_id: i64,
    pub subject_name: String,
    pub semester_id: i64,
    pub passing_threshold: f64,
    pub locked: bool,
    pub rows: Vec<GradeSheetRow>,
}

fn check_score(field: &'static str, score: Option<f64>) -> SchoolResult<()> {
    match score {
        Some(s) if !s.is_finite() || !(0.0..=10.0).contains(&s) => Err(SchoolError::field(
            field,
            format!("{} must be between 0 and 10 (got {})", field, s),
        )),
        _ => Ok(()),
    }
}

fn subject_assigned(conn: &Connection, class_id: i64, subject_id: i64) -> SchoolResult<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM class_subjects WHERE class_id = ? AND subject_id = ?",
            (class_id, subject_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

fn student_enrolled(conn: &Connection, class_id: i64, student_id: i64) -> SchoolResult<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM class_students WHERE class_id = ? AND student_id = ?",
            (class_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Creates or updates the record keyed by student, class, subject and
/// semester. Re-sending identical scores leaves the record unchanged.
pub fn upsert_grade(conn: &Connection, input: &GradeInput) -> SchoolResult<GradeRecord> {
    let semester = Semester::require(input.semester_id)?;
    let class = classes::require_class(conn, input.class_id)?;
    let subject = subjects::require_subject(conn, input.subject_id)?;
    let student = students::require_student(conn, input.student_id)?;

    if !subject_assigned(conn, class.id, subject.id)? {
        return Err(SchoolError::field(
            "subjectId",
            format!("subject {} is not taught in class {}", subject.name, class.name),
        ));
    }
    if !student_enrolled(conn, class.id, student.id)? {
        return Err(SchoolError::field(
            "studentId",
            format!(
                "student {} is not enrolled in class {}",
                student.full_name(),
                class.name
            ),
        ));
    }
    check_score("scoreA", input.score_a)?;
    check_score("scoreB", input.score_b)?;

    let year = years::require_year(conn, class.year_id)?;
    let policy = policy::require_policy(conn, &year)?;
    if policy.settings.is_locked(semester) {
        tracing::debug!(class_id = class.id, semester = semester.id(), "grade entry locked");
        return Err(SchoolError::permission(format!(
            "grade entry for {} of academic year {} is locked",
            semester.name(),
            year.label
        )));
    }

    let average = weighted_average(input.score_a, input.score_b);
    conn.execute(
        "INSERT INTO grade_records(
            student_id, class_id, subject_id, semester_id, score_a, score_b, average)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, class_id, subject_id, semester_id) DO UPDATE SET
           score_a = excluded.score_a,
           score_b = excluded.score_b,
           average = excluded.average",
        rusqlite::params![
            student.id,
            class.id,
            subject.id,
            semester.id(),
            input.score_a,
            input.score_b,
            average
        ],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM grade_records
         WHERE student_id = ? AND class_id = ? AND subject_id = ? AND semester_id = ?",
        (student.id, class.id, subject.id, semester.id()),
        |r| r.get(0),
    )?;
    tracing::info!(
        grade_id = id,
        student_id = student.id,
        class_id = class.id,
        subject_id = subject.id,
        semester = semester.id(),
        "grade saved"
    );

    let threshold = policy.settings.passing_threshold;
    Ok(GradeRecord {
        id,
        student_id: student.id,
        class_id: class.id,
        subject_id: subject.id,
        semester_id: semester.id(),
        score_a: input.score_a,
        score_b: input.score_b,
        average,
        passed: average.map(|a| is_passing(a, threshold)),
    })
}

/// Every enrolled student of the class with their record for one subject and
/// semester. Students without a record get blank scores.
pub fn class_grade_sheet(
    conn: &Connection,
    class_id: i64,
    subject_id: i64,
    semester_id: i64,
) -> SchoolResult<GradeSheet> {
    let semester = Semester::require(semester_id)?;
    let class = classes::require_class(conn, class_id)?;
    let subject = subjects::require_subject(conn, subject_id)?;
    let (threshold, _) = policy::passing_threshold_or_default(conn, class.year_id)?;
    let locked = policy::get_policy(conn, class.year_id)?
        .map(|p| p.settings.is_locked(semester))
        .unwrap_or(false);

    let mut stmt = conn.prepare(
        "SELECT student_id, score_a, score_b, average FROM grade_records
         WHERE class_id = ? AND subject_id = ? AND semester_id = ?",
    )?;
    let mut recorded: HashMap<i64, (Option<f64>, Option<f64>, Option<f64>)> = HashMap::new();
    let mut rows = stmt.query((class.id, subject.id, semester.id()))?;
    while let Some(row) = rows.next()? {
        recorded.insert(row.get(0)?, (row.get(1)?, row.get(2)?, row.get(3)?));
    }

    let rows = students::students_of_class(conn, class.id)?
        .into_iter()
        .map(|s| {
            let (score_a, score_b, average) = recorded.get(&s.id).copied().unwrap_or_default();
            GradeSheetRow {
                student_id: s.id,
                full_name: s.full_name(),
                score_a,
                score_b,
                average,
                passed: average.map(|a| is_passing(a, threshold)),
            }
        })
        .collect();

    Ok(GradeSheet {
        class_id: class.id,
        class_name: class.name,
        subject_id: subject.id,
        subject_name: subject.name,
        semester_id: semester.id(),
        passing_threshold: threshold,
        locked,
        rows,
    })
}

pub fn list_semesters() -> Vec<Value> {
    Semester::ALL
        .iter()
        .map(|s| json!({ "id": s.id(), "name": s.name() }))
        .collect()
}
