use crate::classes::GradeTier;
use crate::error::{SchoolError, SchoolResult};
use crate::grading::Semester;
use crate::years::{self, AcademicYear, CurrentYear};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Threshold used by report paths when a year has no policy at all.
pub const DEFAULT_PASSING_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicySettings {
    #[serde(default)]
    pub max_classes_grade10: Option<i64>,
    #[serde(default)]
    pub max_classes_grade11: Option<i64>,
    #[serde(default)]
    pub max_classes_grade12: Option<i64>,
    pub max_class_size: i64,
    pub max_subjects_per_class: i64,
    pub min_age: i64,
    pub max_age: i64,
    pub passing_threshold: f64,
    #[serde(default)]
    pub lock_semester1: bool,
    #[serde(default)]
    pub lock_semester2: bool,
}

impl PolicySettings {
    /// Class-count limit for a tier; `None` means unlimited.
    pub fn class_limit(&self, tier: GradeTier) -> Option<i64> {
        match tier {
            GradeTier::Grade10 => self.max_classes_grade10,
            GradeTier::Grade11 => self.max_classes_grade11,
            GradeTier::Grade12 => self.max_classes_grade12,
        }
    }

    pub fn is_locked(&self, semester: Semester) -> bool {
        match semester {
            Semester::First => self.lock_semester1,
            Semester::Second => self.lock_semester2,
        }
    }

    fn same_capacity(&self, other: &PolicySettings) -> bool {
        let strip = |p: &PolicySettings| PolicySettings {
            lock_semester1: false,
            lock_semester2: false,
            ..p.clone()
        };
        strip(self) == strip(other)
    }

    pub fn validate(&self) -> SchoolResult<()> {
        for (field, limit) in [
            ("maxClassesGrade10", self.max_classes_grade10),
            ("maxClassesGrade11", self.max_classes_grade11),
            ("maxClassesGrade12", self.max_classes_grade12),
        ] {
            if let Some(n) = limit {
                if n < 0 {
                    return Err(SchoolError::field(field, format!("{} must be >= 0", field)));
                }
            }
        }
        if self.max_class_size < 1 {
            return Err(SchoolError::field("maxClassSize", "maxClassSize must be >= 1"));
        }
        if self.max_subjects_per_class < 1 {
            return Err(SchoolError::field(
                "maxSubjectsPerClass",
                "maxSubjectsPerClass must be >= 1",
            ));
        }
        if self.min_age < 0 {
            return Err(SchoolError::field("minAge", "minAge must be >= 0"));
        }
        if self.min_age > self.max_age {
            return Err(SchoolError::field(
                "maxAge",
                format!(
                    "maxAge ({}) must not be lower than minAge ({})",
                    self.max_age, self.min_age
                ),
            ));
        }
        if !self.passing_threshold.is_finite() || !(0.0..=10.0).contains(&self.passing_threshold) {
            return Err(SchoolError::field(
                "passingThreshold",
                "passingThreshold must be in 0..=10",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub year_id: i64,
    pub year_label: String,
    #[serde(flatten)]
    pub settings: PolicySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSource {
    Policy,
    Default,
}

const POLICY_SELECT: &str = "SELECT p.year_id, y.label,
        p.max_classes_grade10, p.max_classes_grade11, p.max_classes_grade12,
        p.max_class_size, p.max_subjects_per_class, p.min_age, p.max_age,
        p.passing_threshold, p.lock_semester1, p.lock_semester2
     FROM policies p
     JOIN academic_years y ON y.id = p.year_id";

fn policy_from_row(r: &Row<'_>) -> rusqlite::Result<Policy> {
    Ok(Policy {
        year_id: r.get(0)?,
        year_label: r.get(1)?,
        settings: PolicySettings {
            max_classes_grade10: r.get(2)?,
            max_classes_grade11: r.get(3)?,
            max_classes_grade12: r.get(4)?,
            max_class_size: r.get(5)?,
            max_subjects_per_class: r.get(6)?,
            min_age: r.get(7)?,
            max_age: r.get(8)?,
            passing_threshold: r.get(9)?,
            lock_semester1: r.get::<_, i64>(10)? != 0,
            lock_semester2: r.get::<_, i64>(11)? != 0,
        },
    })
}

pub fn get_policy(conn: &Connection, year_id: i64) -> SchoolResult<Option<Policy>> {
    let sql = format!("{} WHERE p.year_id = ?", POLICY_SELECT);
    let policy = conn.query_row(&sql, [year_id], policy_from_row).optional()?;
    Ok(policy)
}

/// Policy of `year`, or a not-found error naming the year. Limit checks
/// never treat a missing policy as "no limit".
pub fn require_policy(conn: &Connection, year: &AcademicYear) -> SchoolResult<Policy> {
    get_policy(conn, year.id)?.ok_or_else(|| {
        SchoolError::not_found(format!(
            "no policy configured for academic year {}",
            year.label
        ))
    })
}

pub fn passing_threshold_or_default(
    conn: &Connection,
    year_id: i64,
) -> SchoolResult<(f64, ThresholdSource)> {
    match get_policy(conn, year_id)? {
        Some(p) => Ok((p.settings.passing_threshold, ThresholdSource::Policy)),
        None => {
            tracing::warn!(
                year_id,
                threshold = DEFAULT_PASSING_THRESHOLD,
                "no policy for year; report falls back to default passing threshold"
            );
            Ok((DEFAULT_PASSING_THRESHOLD, ThresholdSource::Default))
        }
    }
}

pub fn list_policies(conn: &Connection) -> SchoolResult<Vec<Policy>> {
    let sql = format!("{} ORDER BY y.label DESC", POLICY_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], policy_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn current_policy(conn: &Connection, current: &CurrentYear) -> SchoolResult<Option<Policy>> {
    match current.year() {
        Some(y) => get_policy(conn, y.id),
        None => Ok(None),
    }
}

pub fn create_year_with_policy(
    conn: &Connection,
    label: &str,
    settings: PolicySettings,
) -> SchoolResult<Policy> {
    let label = label.trim();
    years::parse_start_year(label)?;
    settings.validate()?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM academic_years WHERE label = ?",
            [label],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(SchoolError::field(
            "label",
            format!("academic year {} already exists", label),
        ));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("INSERT INTO academic_years(label) VALUES(?)", [label])?;
    let year_id = tx.last_insert_rowid();
    write_settings(&tx, year_id, &settings, true)?;
    tx.commit()?;

    tracing::info!(year_id, label, "academic year and policy created");
    Ok(Policy {
        year_id,
        year_label: label.to_string(),
        settings,
    })
}

fn write_settings(
    conn: &Connection,
    year_id: i64,
    s: &PolicySettings,
    insert: bool,
) -> SchoolResult<()> {
    let sql = if insert {
        "INSERT INTO policies(
            max_classes_grade10, max_classes_grade11, max_classes_grade12,
            max_class_size, max_subjects_per_class, min_age, max_age,
            passing_threshold, lock_semester1, lock_semester2, year_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    } else {
        "UPDATE policies SET
            max_classes_grade10 = ?, max_classes_grade11 = ?, max_classes_grade12 = ?,
            max_class_size = ?, max_subjects_per_class = ?, min_age = ?, max_age = ?,
            passing_threshold = ?, lock_semester1 = ?, lock_semester2 = ?
         WHERE year_id = ?"
    };
    conn.execute(
        sql,
        rusqlite::params![
            s.max_classes_grade10,
            s.max_classes_grade11,
            s.max_classes_grade12,
            s.max_class_size,
            s.max_subjects_per_class,
            s.min_age,
            s.max_age,
            s.passing_threshold,
            s.lock_semester1 as i64,
            s.lock_semester2 as i64,
            year_id
        ],
    )?;
    Ok(())
}

/// True once students were taken in or classes were opened for the year.
pub fn year_has_dependents(conn: &Connection, year_id: i64) -> SchoolResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM students WHERE intake_year_id = ?1)
         + (SELECT COUNT(*) FROM classes WHERE year_id = ?1)",
        [year_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Applies a field patch that already passed the role's editable-field check.
/// Capacity fields freeze once the year has students or classes; the grade
/// locks stay editable.
pub fn update_policy(
    conn: &Connection,
    year_id: i64,
    patch: &Map<String, Value>,
) -> SchoolResult<Policy> {
    let year = years::require_year(conn, year_id)?;
    let current = require_policy(conn, &year)?;

    let mut merged = serde_json::to_value(&current.settings)
        .map_err(|e| SchoolError::validation(e.to_string()))?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
    }
    let next: PolicySettings =
        serde_json::from_value(merged).map_err(|e| SchoolError::validation(e.to_string()))?;
    next.validate()?;

    if !next.same_capacity(&current.settings) && year_has_dependents(conn, year_id)? {
        return Err(SchoolError::validation(format!(
            "policy of academic year {} cannot change: it already has students or classes",
            year.label
        )));
    }

    write_settings(conn, year_id, &next, false)?;
    tracing::info!(year_id, "policy updated");
    Ok(Policy {
        year_id,
        year_label: year.label,
        settings: next,
    })
}

/// Deletes the policy together with its academic year.
pub fn delete_policy(conn: &Connection, year_id: i64) -> SchoolResult<()> {
    let year = years::require_year(conn, year_id)?;
    require_policy(conn, &year)?;
    if year_has_dependents(conn, year_id)? {
        return Err(SchoolError::validation(format!(
            "policy of academic year {} cannot be deleted: it already has students or classes",
            year.label
        )));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM subjects WHERE year_id = ?", [year_id])?;
    tx.execute("DELETE FROM policies WHERE year_id = ?", [year_id])?;
    tx.execute("DELETE FROM academic_years WHERE id = ?", [year_id])?;
    tx.commit()?;
    tracing::info!(year_id, label = %year.label, "academic year and policy deleted");
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_settings() -> PolicySettings {
    PolicySettings {
        max_classes_grade10: Some(2),
        max_classes_grade11: Some(1),
        max_classes_grade12: None,
        max_class_size: 3,
        max_subjects_per_class: 2,
        min_age: 15,
        max_age: 20,
        passing_threshold: 5.0,
        lock_semester1: false,
        lock_semester2: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    #[test]
    fn missing_policy_is_a_hard_failure() {
        let conn = db::open_in_memory().expect("db");
        conn.execute("INSERT INTO academic_years(label) VALUES('2024-2025')", [])
            .expect("year");
        let year = years::require_year(&conn, conn.last_insert_rowid()).expect("year");
        assert!(get_policy(&conn, year.id).expect("lookup").is_none());
        let e = require_policy(&conn, &year).expect_err("must fail");
        assert_eq!(e.code(), "not_found");
        assert!(e.to_string().contains("2024-2025"));
    }

    #[test]
    fn reports_fall_back_to_default_threshold() {
        let conn = db::open_in_memory().expect("db");
        let (t, source) = passing_threshold_or_default(&conn, 42).expect("threshold");
        assert_eq!(t, DEFAULT_PASSING_THRESHOLD);
        assert_eq!(source, ThresholdSource::Default);

        let p = create_year_with_policy(&conn, "2024-2025", sample_settings()).expect("create");
        let (t, source) = passing_threshold_or_default(&conn, p.year_id).expect("threshold");
        assert_eq!(t, 5.0);
        assert_eq!(source, ThresholdSource::Policy);
    }

    #[test]
    fn create_rejects_bad_labels_duplicates_and_inverted_ages() {
        let conn = db::open_in_memory().expect("db");
        assert!(create_year_with_policy(&conn, "2024/2025", sample_settings()).is_err());
        create_year_with_policy(&conn, "2024-2025", sample_settings()).expect("create");
        let dup = create_year_with_policy(&conn, "2024-2025", sample_settings())
            .expect_err("duplicate");
        assert_eq!(dup.details()["fields"]["label"][0], "academic year 2024-2025 already exists");

        let mut inverted = sample_settings();
        inverted.min_age = 21;
        assert!(create_year_with_policy(&conn, "2025-2026", inverted).is_err());
    }

    #[test]
    fn capacity_freezes_once_year_has_dependents_but_locks_do_not() {
        let conn = db::open_in_memory().expect("db");
        let p = create_year_with_policy(&conn, "2024-2025", sample_settings()).expect("create");
        conn.execute(
            "INSERT INTO classes(name, year_id, tier_id) VALUES('10A', ?, 1)",
            [p.year_id],
        )
        .expect("class");

        let patch = json!({ "maxClassSize": 45 });
        let e = update_policy(&conn, p.year_id, patch.as_object().expect("obj"))
            .expect_err("frozen");
        assert_eq!(e.code(), "validation_failed");

        let patch = json!({ "lockSemester2": true });
        let updated =
            update_policy(&conn, p.year_id, patch.as_object().expect("obj")).expect("lock");
        assert!(updated.settings.is_locked(Semester::Second));
        assert!(!updated.settings.is_locked(Semester::First));

        assert!(delete_policy(&conn, p.year_id).is_err());
    }

    #[test]
    fn delete_removes_year_with_policy() {
        let conn = db::open_in_memory().expect("db");
        let p = create_year_with_policy(&conn, "2024-2025", sample_settings()).expect("create");
        delete_policy(&conn, p.year_id).expect("delete");
        assert!(years::find_year(&conn, p.year_id).expect("find").is_none());
        assert!(list_policies(&conn).expect("list").is_empty());
    }

    #[test]
    fn class_limit_absent_means_unlimited() {
        let s = sample_settings();
        assert_eq!(s.class_limit(GradeTier::Grade10), Some(2));
        assert_eq!(s.class_limit(GradeTier::Grade12), None);
    }
}
