use crate::db;
use crate::error::{SchoolError, SchoolResult};
use crate::policy;
use crate::students::{self, Student};
use crate::subjects::{self, Subject};
use crate::years::{self, AcademicYear, CurrentYear};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GradeTier {
    Grade10,
    Grade11,
    Grade12,
}

impl GradeTier {
    pub const ALL: [GradeTier; 3] = [GradeTier::Grade10, GradeTier::Grade11, GradeTier::Grade12];

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::Grade10),
            2 => Some(Self::Grade11),
            3 => Some(Self::Grade12),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            Self::Grade10 => 1,
            Self::Grade11 => 2,
            Self::Grade12 => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grade10 => "Grade 10",
            Self::Grade11 => "Grade 11",
            Self::Grade12 => "Grade 12",
        }
    }

    pub fn require(id: i64, field: &'static str) -> SchoolResult<Self> {
        Self::from_id(id)
            .ok_or_else(|| SchoolError::field(field, format!("unknown grade tier {}", id)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolClass {
    pub id: i64,
    pub name: String,
    pub year_id: i64,
    pub year_label: String,
    pub tier_id: i64,
    pub tier_name: String,
    pub track_id: Option<i64>,
    pub track_name: Option<String>,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: SchoolClass,
    pub is_editable: bool,
    pub subjects: Vec<Subject>,
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClassInput {
    pub name: String,
    pub year_id: i64,
    pub tier_id: i64,
    #[serde(default)]
    pub track_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    pub year_id: Option<i64>,
    pub tier_id: Option<i64>,
    pub track_id: Option<i64>,
}

const CLASS_SELECT: &str = "SELECT c.id, c.name, c.year_id, y.label, c.tier_id, g.name,
        c.track_id, t.name, c.size
     FROM classes c
     JOIN academic_years y ON y.id = c.year_id
     JOIN grade_tiers g ON g.id = c.tier_id
     LEFT JOIN tracks t ON t.id = c.track_id";

fn class_from_row(r: &Row<'_>) -> rusqlite::Result<SchoolClass> {
    Ok(SchoolClass {
        id: r.get(0)?,
        name: r.get(1)?,
        year_id: r.get(2)?,
        year_label: r.get(3)?,
        tier_id: r.get(4)?,
        tier_name: r.get(5)?,
        track_id: r.get(6)?,
        track_name: r.get(7)?,
        size: r.get(8)?,
    })
}

pub fn find_class(conn: &Connection, class_id: i64) -> SchoolResult<Option<SchoolClass>> {
    let sql = format!("{} WHERE c.id = ?", CLASS_SELECT);
    Ok(conn.query_row(&sql, [class_id], class_from_row).optional()?)
}

pub fn require_class(conn: &Connection, class_id: i64) -> SchoolResult<SchoolClass> {
    find_class(conn, class_id)?
        .ok_or_else(|| SchoolError::not_found(format!("class {} not found", class_id)))
}

pub fn list_classes(conn: &Connection, filter: &ClassFilter) -> SchoolResult<Vec<SchoolClass>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(y) = filter.year_id {
        clauses.push("c.year_id = ?");
        args.push(SqlValue::Integer(y));
    }
    if let Some(t) = filter.tier_id {
        clauses.push("c.tier_id = ?");
        args.push(SqlValue::Integer(t));
    }
    if let Some(t) = filter.track_id {
        clauses.push("c.track_id = ?");
        args.push(SqlValue::Integer(t));
    }
    let mut sql = CLASS_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY y.label DESC, c.tier_id, c.name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn class_detail(
    conn: &Connection,
    current: &CurrentYear,
    class_id: i64,
) -> SchoolResult<ClassDetail> {
    let class = require_class(conn, class_id)?;
    let subjects = subjects::subjects_of_class(conn, class.id)?;
    let students = students::students_of_class(conn, class.id)?;
    Ok(ClassDetail {
        is_editable: current.is_current(class.year_id),
        class,
        subjects,
        students,
    })
}

fn enrolled_count(conn: &Connection, class_id: i64) -> SchoolResult<i64> {
    Ok(db::table_count(
        conn,
        "SELECT COUNT(*) FROM class_students WHERE class_id = ?",
        class_id,
    )?)
}

fn ensure_tier_capacity(
    conn: &Connection,
    year: &AcademicYear,
    tier: GradeTier,
) -> SchoolResult<()> {
    let policy = policy::require_policy(conn, year)?;
    let Some(limit) = policy.settings.class_limit(tier) else {
        return Ok(());
    };
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM classes WHERE year_id = ? AND tier_id = ?",
        (year.id, tier.id()),
        |r| r.get(0),
    )?;
    if count >= limit {
        return Err(SchoolError::field(
            "tierId",
            format!(
                "{} already has the maximum of {} classes in academic year {}",
                tier.name(),
                limit,
                year.label
            ),
        ));
    }
    Ok(())
}

fn ensure_unique_name(
    conn: &Connection,
    year: &AcademicYear,
    name: &str,
    exclude_id: Option<i64>,
) -> SchoolResult<()> {
    if db::name_taken(conn, "classes", year.id, name, exclude_id)? {
        return Err(SchoolError::field(
            "name",
            format!("class '{}' already exists in academic year {}", name, year.label),
        ));
    }
    Ok(())
}

fn clean_name(name: &str) -> SchoolResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SchoolError::field("name", "name must not be empty"));
    }
    Ok(name.to_string())
}

pub fn create_class(conn: &Connection, input: ClassInput) -> SchoolResult<SchoolClass> {
    let name = clean_name(&input.name)?;
    let year = years::require_year(conn, input.year_id)?;
    let tier = GradeTier::require(input.tier_id, "tierId")?;
    if let Some(track_id) = input.track_id {
        subjects::require_track(conn, track_id)?;
    }

    ensure_unique_name(conn, &year, &name, None)?;
    ensure_tier_capacity(conn, &year, tier)?;

    conn.execute(
        "INSERT INTO classes(name, year_id, tier_id, track_id, size) VALUES(?, ?, ?, ?, 0)",
        (&name, year.id, tier.id(), input.track_id),
    )?;
    let class_id = conn.last_insert_rowid();
    tracing::info!(class_id, name = %name, year = %year.label, tier = tier.name(), "class created");
    require_class(conn, class_id)
}

pub fn update_class(
    conn: &Connection,
    current: &CurrentYear,
    class_id: i64,
    patch: &Map<String, Value>,
) -> SchoolResult<SchoolClass> {
    let class = require_class(conn, class_id)?;
    current.ensure_editable(class.year_id, &format!("class {}", class.name))?;
    let year = years::require_year(conn, class.year_id)?;

    let name = match patch.get("name") {
        Some(v) => clean_name(
            v.as_str()
                .ok_or_else(|| SchoolError::field("name", "name must be a string"))?,
        )?,
        None => class.name.clone(),
    };
    let tier_id = match patch.get("tierId") {
        Some(v) => v
            .as_i64()
            .ok_or_else(|| SchoolError::field("tierId", "tierId must be an integer"))?,
        None => class.tier_id,
    };
    let track_id = match patch.get("trackId") {
        Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| SchoolError::field("trackId", "trackId must be an integer"))?,
        ),
        None => class.track_id,
    };

    ensure_unique_name(conn, &year, &name, Some(class.id))?;
    if tier_id != class.tier_id {
        let tier = GradeTier::require(tier_id, "tierId")?;
        if enrolled_count(conn, class.id)? > 0 {
            return Err(SchoolError::field(
                "tierId",
                format!(
                    "class {} has enrolled students; its grade tier cannot change",
                    class.name
                ),
            ));
        }
        ensure_tier_capacity(conn, &year, tier)?;
    }
    if let Some(t) = track_id {
        subjects::require_track(conn, t)?;
    }

    conn.execute(
        "UPDATE classes SET name = ?, tier_id = ?, track_id = ? WHERE id = ?",
        (&name, tier_id, track_id, class.id),
    )?;
    tracing::info!(class_id, "class updated");
    require_class(conn, class.id)
}

pub fn delete_class(conn: &Connection, current: &CurrentYear, class_id: i64) -> SchoolResult<()> {
    let class = require_class(conn, class_id)?;
    current.ensure_editable(class.year_id, &format!("class {}", class.name))?;
    let enrolled = enrolled_count(conn, class.id)?;
    if enrolled > 0 {
        return Err(SchoolError::validation(format!(
            "class {} still has {} enrolled student(s) and cannot be deleted",
            class.name, enrolled
        )));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grade_records WHERE class_id = ?", [class.id])?;
    tx.execute("DELETE FROM class_subjects WHERE class_id = ?", [class.id])?;
    tx.execute("DELETE FROM classes WHERE id = ?", [class.id])?;
    tx.commit()?;
    tracing::info!(class_id, name = %class.name, "class deleted");
    Ok(())
}

fn distinct_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Replaces the subject set of a class. Locked once any grade exists for it.
pub fn assign_subjects(
    conn: &Connection,
    current: &CurrentYear,
    class_id: i64,
    subject_ids: &[i64],
) -> SchoolResult<Vec<Subject>> {
    let class = require_class(conn, class_id)?;
    current.ensure_editable(class.year_id, &format!("class {}", class.name))?;

    let graded = db::table_count(
        conn,
        "SELECT COUNT(*) FROM grade_records WHERE class_id = ?",
        class.id,
    )?;
    if graded > 0 {
        return Err(SchoolError::permission(format!(
            "subjects of class {} are locked: grades have already been entered",
            class.name
        )));
    }

    let year = years::require_year(conn, class.year_id)?;
    let policy = policy::require_policy(conn, &year)?;
    let ids = distinct_ids(subject_ids);
    let max = policy.settings.max_subjects_per_class;
    if ids.len() as i64 > max {
        return Err(SchoolError::field(
            "subjectIds",
            format!(
                "a class may have at most {} subjects in academic year {} ({} given)",
                max,
                year.label,
                ids.len()
            ),
        ));
    }

    for id in &ids {
        let subject = subjects::require_subject(conn, *id)?;
        if subject.year_id != class.year_id {
            return Err(SchoolError::field(
                "subjectIds",
                format!(
                    "subject {} belongs to academic year {}, not {}",
                    subject.name, subject.year_label, year.label
                ),
            ));
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM class_subjects WHERE class_id = ?", [class.id])?;
    for id in &ids {
        tx.execute(
            "INSERT INTO class_subjects(class_id, subject_id) VALUES(?, ?)",
            (class.id, id),
        )?;
    }
    tx.commit()?;
    tracing::info!(class_id, subjects = ids.len(), "class subjects replaced");
    subjects::subjects_of_class(conn, class.id)
}

/// Replaces the student set of a class and recomputes its size in the same
/// transaction. Returns the new size.
pub fn assign_students(
    conn: &Connection,
    current: &CurrentYear,
    class_id: i64,
    student_ids: &[i64],
) -> SchoolResult<i64> {
    let class = require_class(conn, class_id)?;
    current.ensure_editable(class.year_id, &format!("class {}", class.name))?;

    let year = years::require_year(conn, class.year_id)?;
    let policy = policy::require_policy(conn, &year)?;
    let ids = distinct_ids(student_ids);
    let max = policy.settings.max_class_size;
    if ids.len() as i64 > max {
        return Err(SchoolError::field(
            "studentIds",
            format!(
                "class size may not exceed {} in academic year {} ({} given)",
                max,
                year.label,
                ids.len()
            ),
        ));
    }

    for id in &ids {
        let student = students::require_student(conn, *id)?;
        let full_name = student.full_name();
        if student.intake_year_id != class.year_id {
            return Err(SchoolError::field(
                "studentIds",
                format!(
                    "student {} was taken in for academic year {}, not {}",
                    full_name, student.intake_year_label, year.label
                ),
            ));
        }
        if student.expected_tier_id != Some(class.tier_id) {
            return Err(SchoolError::field(
                "studentIds",
                format!("student {} is not expected in {}", full_name, class.tier_name),
            ));
        }
        let elsewhere: Option<String> = conn
            .query_row(
                "SELECT c.name FROM class_students cs
                 JOIN classes c ON c.id = cs.class_id
                 WHERE cs.student_id = ? AND cs.year_id = ? AND cs.class_id != ?",
                (student.id, class.year_id, class.id),
                |r| r.get(0),
            )
            .optional()?;
        if let Some(other) = elsewhere {
            return Err(SchoolError::field(
                "studentIds",
                format!(
                    "student {} is already enrolled in class {} this year",
                    full_name, other
                ),
            ));
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM class_students WHERE class_id = ?", [class.id])?;
    for id in &ids {
        tx.execute(
            "INSERT INTO class_students(class_id, student_id, year_id) VALUES(?, ?, ?)",
            (class.id, id, class.year_id),
        )?;
    }
    tx.execute(
        "UPDATE classes
         SET size = (SELECT COUNT(*) FROM class_students WHERE class_id = ?1)
         WHERE id = ?1",
        [class.id],
    )?;
    let size: i64 = tx.query_row("SELECT size FROM classes WHERE id = ?", [class.id], |r| {
        r.get(0)
    })?;
    tx.commit()?;
    tracing::info!(class_id, size, "class enrollment replaced");
    Ok(size)
}

/// Students of the class's intake year and tier who are not in any class of
/// that year yet.
pub fn list_eligible_students(conn: &Connection, class_id: i64) -> SchoolResult<Vec<Student>> {
    let class = require_class(conn, class_id)?;
    students::unplaced_students(conn, class.year_id, class.tier_id)
}

pub fn list_tiers() -> Vec<Value> {
    GradeTier::ALL
        .iter()
        .map(|t| serde_json::json!({ "id": t.id(), "name": t.name() }))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_names_are_rejected_case_insensitively() {
        let conn = db::open_in_memory().expect("db");
        let y = year(&conn, "2024-2025");
        class(&conn, y, "10A1", 1);
        let e = create_class(
            &conn,
            ClassInput {
                name: "10a1".into(),
                year_id: y,
                tier_id: 1,
                track_id: None,
            },
        )
        .expect_err("duplicate");
        let message = e.details()["fields"]["name"][0].to_string();
        assert!(message.contains("10a1"), "{}", message);
    }

    #[test]
    fn tier_limit_blocks_creation_and_deleting_frees_a_slot() {
        let conn = db::open_in_memory().expect("db");
        let y = year(&conn, "2024-2025");
        let current = CurrentYear::resolve(&conn).expect("current");
        class(&conn, y, "10A1", 1);
        let second = class(&conn, y, "10A2", 1);
        let input = ClassInput {
            name: "10A3".into(),
            year_id: y,
            tier_id: 1,
            track_id: None,
        };
        let e = create_class(&conn, input.clone()).expect_err("limit");
        assert_eq!(e.code(), "validation_failed");

        delete_class(&conn, &current, second).expect("delete");
        create_class(&conn, input).expect("slot freed");

        // Grade 12 carries no limit in the sample policy.
        for i in 0..5 {
            class(&conn, y, &format!("12A{}", i), 3);
        }
    }

    #[test]
    fn creation_without_policy_fails() {
        let conn = db::open_in_memory().expect("db");
        conn.execute("INSERT INTO academic_years(label) VALUES('2030-2031')", [])
            .expect("year");
        let e = create_class(
            &conn,
            ClassInput {
                name: "10A".into(),
                year_id: conn.last_insert_rowid(),
                tier_id: 1,
                track_id: None,
            },
        )
        .expect_err("no policy");
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn enrollment_recomputes_size_and_blocks_delete() {
        let conn = db::open_in_memory().expect("db");
        let y = year(&conn, "2024-2025");
        let current = CurrentYear::resolve(&conn).expect("current");
        let c = class(&conn, y, "10A1", 1);
        let a = student(&conn, y, "An", 1);
        let b = student(&conn, y, "Binh", 1);

        assert_eq!(assign_students(&conn, &current, c, &[a, b, a]).expect("assign"), 2);
        assert_eq!(require_class(&conn, c).expect("class").size, 2);
        assert!(delete_class(&conn, &current, c).is_err());

        assert_eq!(assign_students(&conn, &current, c, &[b]).expect("shrink"), 1);
        assert_eq!(assign_students(&conn, &current, c, &[]).expect("clear"), 0);
        assert_eq!(require_class(&conn, c).expect("class").size, 0);
        delete_class(&conn, &current, c).expect("empty class deletes");
    }

    #[test]
    fn enrollment_enforces_size_tier_and_single_class_per_year() {
        let conn = db::open_in_memory().expect("db");
        let y = year(&conn, "2024-2025");
        let current = CurrentYear::resolve(&conn).expect("current");
        let c1 = class(&conn, y, "10A1", 1);
        let c2 = class(&conn, y, "10A2", 1);
        let ids: Vec<i64> = ["A", "B", "C", "D"]
            .iter()
            .map(|n| student(&conn, y, n, 1))
            .collect();
        let senior = student(&conn, y, "E", 3);

        assert!(assign_students(&conn, &current, c1, &ids).is_err());
        assert!(assign_students(&conn, &current, c1, &[senior]).is_err());
        assign_students(&conn, &current, c1, &ids[..2]).expect("assign");
        let e = assign_students(&conn, &current, c2, &ids[1..3]).expect_err("enrolled elsewhere");
        assert!(e.to_string().contains("10A1"));

        let eligible = list_eligible_students(&conn, c2).expect("eligible");
        let eligible_ids: Vec<i64> = eligible.iter().map(|s| s.id).collect();
        assert_eq!(eligible_ids.len(), 2);
        assert!(eligible_ids.contains(&ids[2]) && eligible_ids.contains(&ids[3]));
    }

    #[test]
    fn subject_assignment_limits_and_year_match() {
        let conn = db::open_in_memory().expect("db");
        let old = year(&conn, "2023-2024");
        let y = year(&conn, "2024-2025");
        let current = CurrentYear::resolve(&conn).expect("current");
        let c = class(&conn, y, "10A1", 1);
        let s1 = subjects::fixtures::subject(&conn, y, "Math");
        let s2 = subjects::fixtures::subject(&conn, y, "Physics");
        let s3 = subjects::fixtures::subject(&conn, y, "Chemistry");
        let stale = subjects::fixtures::subject(&conn, old, "History");

        assert!(assign_subjects(&conn, &current, c, &[s1, s2, s3]).is_err());
        assert!(assign_subjects(&conn, &current, c, &[s1, stale]).is_err());
        let set = assign_subjects(&conn, &current, c, &[s1, s2]).expect("exactly the limit");
        assert_eq!(set.len(), 2);
        let set = assign_subjects(&conn, &current, c, &[s3]).expect("replace");
        assert_eq!(set.iter().map(|s| s.id).collect::<Vec<_>>(), vec![s3]);
    }

    #[test]
    fn past_year_classes_are_read_only_for_everyone() {
        let conn = db::open_in_memory().expect("db");
        let old = year(&conn, "2023-2024");
        let c = class(&conn, old, "10A1", 1);
        let s = subjects::fixtures::subject(&conn, old, "Math");
        year(&conn, "2024-2025");
        let current = CurrentYear::resolve(&conn).expect("current");

        let patch = json!({ "name": "10B1" });
        let e = update_class(&conn, &current, c, patch.as_object().expect("obj"))
            .expect_err("past");
        assert_eq!(e.code(), "permission_denied");
        assert_eq!(
            assign_subjects(&conn, &current, c, &[s]).expect_err("past").code(),
            "permission_denied"
        );
        assert_eq!(
            assign_students(&conn, &current, c, &[]).expect_err("past").code(),
            "permission_denied"
        );
        assert!(delete_class(&conn, &current, c).is_err());
        assert!(!class_detail(&conn, &current, c).expect("detail").is_editable);
    }

    #[test]
    fn update_renames_and_checks_tier_capacity() {
        let conn = db::open_in_memory().expect("db");
        let y = year(&conn, "2024-2025");
        let current = CurrentYear::resolve(&conn).expect("current");
        class(&conn, y, "11A1", 2);
        let c = class(&conn, y, "10A1", 1);

        let patch = json!({ "name": " 10A9 " });
        let renamed = update_class(&conn, &current, c, patch.as_object().expect("obj"))
            .expect("rename");
        assert_eq!(renamed.name, "10A9");
        let patch = json!({ "tierId": 2 });
        let e = update_class(&conn, &current, c, patch.as_object().expect("obj"))
            .expect_err("grade 11 is full");
        assert!(e.details()["fields"]["tierId"].is_array());
    }
}
