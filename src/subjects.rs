use crate::db;
use crate::error::{SchoolError, SchoolResult};
use crate::policy;
use crate::years::{self, AcademicYear, CurrentYear};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub year_id: i64,
    pub year_label: String,
    pub track_id: Option<i64>,
    pub track_name: Option<String>,
    pub is_deletable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubjectInput {
    pub name: String,
    pub year_id: i64,
    #[serde(default)]
    pub track_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct SubjectFilter {
    pub year_id: Option<i64>,
    pub track_id: Option<i64>,
}

const SUBJECT_SELECT: &str = "SELECT s.id, s.name, s.year_id, y.label, s.track_id, t.name,
        NOT EXISTS (SELECT 1 FROM class_subjects cs WHERE cs.subject_id = s.id)
     FROM subjects s
     JOIN academic_years y ON y.id = s.year_id
     LEFT JOIN tracks t ON t.id = s.track_id";

fn subject_from_row(r: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: r.get(0)?,
        name: r.get(1)?,
        year_id: r.get(2)?,
        year_label: r.get(3)?,
        track_id: r.get(4)?,
        track_name: r.get(5)?,
        is_deletable: r.get::<_, i64>(6)? != 0,
    })
}

pub fn find_subject(conn: &Connection, subject_id: i64) -> SchoolResult<Option<Subject>> {
    let sql = format!("{} WHERE s.id = ?", SUBJECT_SELECT);
    Ok(conn.query_row(&sql, [subject_id], subject_from_row).optional()?)
}

pub fn require_subject(conn: &Connection, subject_id: i64) -> SchoolResult<Subject> {
    find_subject(conn, subject_id)?
        .ok_or_else(|| SchoolError::not_found(format!("subject {} not found", subject_id)))
}

pub fn subjects_of_class(conn: &Connection, class_id: i64) -> SchoolResult<Vec<Subject>> {
    let sql = format!(
        "{} JOIN class_subjects link ON link.subject_id = s.id
         WHERE link.class_id = ? ORDER BY s.name",
        SUBJECT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([class_id], subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_subjects(conn: &Connection, filter: &SubjectFilter) -> SchoolResult<Vec<Subject>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(y) = filter.year_id {
        clauses.push("s.year_id = ?");
        args.push(SqlValue::Integer(y));
    }
    if let Some(t) = filter.track_id {
        clauses.push("s.track_id = ?");
        args.push(SqlValue::Integer(t));
    }
    let mut sql = SUBJECT_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY y.label DESC, s.name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn clean_name(name: &str) -> SchoolResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SchoolError::field("name", "name must not be empty"));
    }
    Ok(name.to_string())
}

fn ensure_unique_name(
    conn: &Connection,
    year: &AcademicYear,
    name: &str,
    exclude_id: Option<i64>,
) -> SchoolResult<()> {
    if db::name_taken(conn, "subjects", year.id, name, exclude_id)? {
        return Err(SchoolError::field(
            "name",
            format!("subject '{}' already exists in academic year {}", name, year.label),
        ));
    }
    Ok(())
}

pub fn create_subject(conn: &Connection, input: SubjectInput) -> SchoolResult<Subject> {
    let name = clean_name(&input.name)?;
    let year = years::require_year(conn, input.year_id)?;
    policy::require_policy(conn, &year)?;
    if let Some(t) = input.track_id {
        require_track(conn, t)?;
    }
    ensure_unique_name(conn, &year, &name, None)?;

    conn.execute(
        "INSERT INTO subjects(name, year_id, track_id) VALUES(?, ?, ?)",
        (&name, year.id, input.track_id),
    )?;
    let subject_id = conn.last_insert_rowid();
    tracing::info!(subject_id, name = %name, year = %year.label, "subject created");
    require_subject(conn, subject_id)
}

pub fn update_subject(
    conn: &Connection,
    current: &CurrentYear,
    subject_id: i64,
    patch: &Map<String, Value>,
) -> SchoolResult<Subject> {
    let subject = require_subject(conn, subject_id)?;
    current.ensure_editable(subject.year_id, &format!("subject {}", subject.name))?;
    let year = years::require_year(conn, subject.year_id)?;

    let name = match patch.get("name") {
        Some(v) => clean_name(
            v.as_str()
                .ok_or_else(|| SchoolError::field("name", "name must be a string"))?,
        )?,
        None => subject.name.clone(),
    };
    let track_id = match patch.get("trackId") {
        Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| SchoolError::field("trackId", "trackId must be an integer"))?,
        ),
        None => subject.track_id,
    };
    if let Some(t) = track_id {
        require_track(conn, t)?;
    }
    ensure_unique_name(conn, &year, &name, Some(subject.id))?;

    conn.execute(
        "UPDATE subjects SET name = ?, track_id = ? WHERE id = ?",
        (&name, track_id, subject.id),
    )?;
    tracing::info!(subject_id, "subject updated");
    require_subject(conn, subject.id)
}

pub fn delete_subject(
    conn: &Connection,
    current: &CurrentYear,
    subject_id: i64,
) -> SchoolResult<()> {
    let subject = require_subject(conn, subject_id)?;
    current.ensure_editable(subject.year_id, &format!("subject {}", subject.name))?;
    if !subject.is_deletable {
        return Err(SchoolError::validation(format!(
            "subject {} is assigned to a class and cannot be deleted",
            subject.name
        )));
    }
    conn.execute("DELETE FROM subjects WHERE id = ?", [subject.id])?;
    tracing::info!(subject_id, name = %subject.name, "subject deleted");
    Ok(())
}

pub fn list_tracks(conn: &Connection) -> SchoolResult<Vec<Track>> {
    let mut stmt = conn.prepare("SELECT id, name FROM tracks ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Track {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn require_track(conn: &Connection, track_id: i64) -> SchoolResult<Track> {
    conn.query_row(
        "SELECT id, name FROM tracks WHERE id = ?",
        [track_id],
        |r| {
            Ok(Track {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| SchoolError::not_found(format!("track {} not found", track_id)))
}

pub fn create_track(conn: &Connection, name: &str) -> SchoolResult<Track> {
    let name = clean_name(name)?;
    let wanted = name.to_lowercase();
    if list_tracks(conn)?
        .iter()
        .any(|t| t.name.to_lowercase() == wanted)
    {
        return Err(SchoolError::field(
            "name",
            format!("track '{}' already exists", name),
        ));
    }
    conn.execute("INSERT INTO tracks(name) VALUES(?)", [&name])?;
    Ok(Track {
        id: conn.last_insert_rowid(),
        name,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn subject(conn: &Connection, year_id: i64, name: &str) -> i64 {
        create_subject(
            conn,
            SubjectInput {
                name: name.to_string(),
                year_id,
                track_id: None,
            },
        )
        .expect("subject")
        .id
    }
}
