use crate::error::{SchoolError, SchoolResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: i64,
    pub label: String,
}

impl AcademicYear {
    pub fn start_year(&self) -> SchoolResult<i32> {
        parse_start_year(&self.label)
    }
}

/// Parses the start component of a `YYYY-YYYY` label.
pub fn parse_start_year(label: &str) -> SchoolResult<i32> {
    let bad = || {
        SchoolError::field(
            "label",
            format!("academic year label '{}' must look like 2024-2025", label),
        )
    };
    let (start, end) = label.trim().split_once('-').ok_or_else(bad)?;
    let four_digits = |s: &str| s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit());
    if !four_digits(start) || !four_digits(end) {
        return Err(bad());
    }
    let start: i32 = start.parse().map_err(|_| bad())?;
    let end: i32 = end.parse().map_err(|_| bad())?;
    if end != start + 1 {
        return Err(bad());
    }
    Ok(start)
}

pub fn list_years(conn: &Connection) -> SchoolResult<Vec<AcademicYear>> {
    let mut stmt = conn.prepare("SELECT id, label FROM academic_years ORDER BY label DESC")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(AcademicYear {
                id: r.get(0)?,
                label: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_year(conn: &Connection, year_id: i64) -> SchoolResult<Option<AcademicYear>> {
    let year = conn
        .query_row(
            "SELECT id, label FROM academic_years WHERE id = ?",
            [year_id],
            |r| {
                Ok(AcademicYear {
                    id: r.get(0)?,
                    label: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(year)
}

pub fn require_year(conn: &Connection, year_id: i64) -> SchoolResult<AcademicYear> {
    find_year(conn, year_id)?
        .ok_or_else(|| SchoolError::not_found(format!("academic year {} not found", year_id)))
}

/// The academic year that is currently mutable: the one with the greatest
/// label. Resolved once per request and handed to every service that checks
/// editability.
#[derive(Debug, Clone, Default)]
pub struct CurrentYear(Option<AcademicYear>);

impl CurrentYear {
    pub fn resolve(conn: &Connection) -> SchoolResult<Self> {
        let year = conn
            .query_row(
                "SELECT id, label FROM academic_years ORDER BY label DESC LIMIT 1",
                [],
                |r| {
                    Ok(AcademicYear {
                        id: r.get(0)?,
                        label: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(Self(year))
    }

    pub fn year(&self) -> Option<&AcademicYear> {
        self.0.as_ref()
    }

    pub fn is_current(&self, year_id: i64) -> bool {
        self.0.as_ref().map(|y| y.id == year_id).unwrap_or(false)
    }

    /// Fails with a permission error unless `year_id` is the current year.
    pub fn ensure_editable(&self, year_id: i64, what: &str) -> SchoolResult<()> {
        if self.is_current(year_id) {
            return Ok(());
        }
        Err(SchoolError::permission(format!(
            "{} belongs to a past academic year and can no longer be changed",
            what
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn start_year_parses_well_formed_labels() {
        assert_eq!(parse_start_year("2024-2025").expect("parse"), 2024);
        assert_eq!(parse_start_year(" 1999-2000 ").expect("parse"), 1999);
    }

    #[test]
    fn start_year_rejects_malformed_labels() {
        for bad in [
            "2024",
            "2024-2026",
            "24-25",
            "abcd-efgh",
            "2025-2024",
            "+024-0025",
            "2024-+025",
        ] {
            assert!(parse_start_year(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn current_year_is_greatest_label() {
        let conn = db::open_in_memory().expect("db");
        for label in ["2023-2024", "2025-2026", "2024-2025"] {
            conn.execute("INSERT INTO academic_years(label) VALUES(?)", [label])
                .expect("insert");
        }
        let current = CurrentYear::resolve(&conn).expect("resolve");
        assert_eq!(current.year().map(|y| y.label.as_str()), Some("2025-2026"));
        let newest_id = current.year().map(|y| y.id).expect("id");
        assert!(current.is_current(newest_id));
        assert!(current.ensure_editable(newest_id + 100, "class").is_err());
    }

    #[test]
    fn empty_registry_has_no_current_year() {
        let conn = db::open_in_memory().expect("db");
        let current = CurrentYear::resolve(&conn).expect("resolve");
        assert!(current.year().is_none());
        assert!(!current.is_current(1));
    }
}
