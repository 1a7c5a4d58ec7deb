use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("school.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id INTEGER PRIMARY KEY,
            label TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS policies(
            year_id INTEGER PRIMARY KEY,
            max_classes_grade10 INTEGER,
            max_classes_grade11 INTEGER,
            max_classes_grade12 INTEGER,
            max_class_size INTEGER NOT NULL,
            max_subjects_per_class INTEGER NOT NULL,
            min_age INTEGER NOT NULL,
            max_age INTEGER NOT NULL,
            passing_threshold REAL NOT NULL,
            lock_semester1 INTEGER NOT NULL DEFAULT 0,
            lock_semester2 INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(year_id) REFERENCES academic_years(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_tiers(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracks(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            year_id INTEGER NOT NULL,
            track_id INTEGER,
            FOREIGN KEY(year_id) REFERENCES academic_years(id),
            FOREIGN KEY(track_id) REFERENCES tracks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_year ON subjects(year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            year_id INTEGER NOT NULL,
            tier_id INTEGER NOT NULL,
            track_id INTEGER,
            size INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(year_id) REFERENCES academic_years(id),
            FOREIGN KEY(tier_id) REFERENCES grade_tiers(id),
            FOREIGN KEY(track_id) REFERENCES tracks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_year_tier ON classes(year_id, tier_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            birth_date TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            email TEXT UNIQUE,
            intake_year_id INTEGER NOT NULL,
            expected_tier_id INTEGER,
            FOREIGN KEY(intake_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(expected_tier_id) REFERENCES grade_tiers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_intake
         ON students(intake_year_id, expected_tier_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            PRIMARY KEY(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_subjects_subject ON class_subjects(subject_id)",
        [],
    )?;

    // One class per student per year is enforced here as well as in the service.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_students(
            class_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            year_id INTEGER NOT NULL,
            PRIMARY KEY(class_id, student_id),
            UNIQUE(student_id, year_id),
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            semester_id INTEGER NOT NULL,
            score_a REAL,
            score_b REAL,
            average REAL,
            UNIQUE(student_id, class_id, subject_id, semester_id),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_class
         ON grade_records(class_id, semester_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_subject
         ON grade_records(subject_id, semester_id)",
        [],
    )?;

    seed_fixed_rows(conn)?;
    Ok(())
}

fn seed_fixed_rows(conn: &Connection) -> anyhow::Result<()> {
    for (id, name) in [(1, "Grade 10"), (2, "Grade 11"), (3, "Grade 12")] {
        conn.execute(
            "INSERT OR IGNORE INTO grade_tiers(id, name) VALUES(?, ?)",
            (id, name),
        )?;
    }
    for (id, name) in [(1, "Semester 1"), (2, "Semester 2")] {
        conn.execute(
            "INSERT OR IGNORE INTO semesters(id, name) VALUES(?, ?)",
            (id, name),
        )?;
    }
    Ok(())
}

pub fn table_count(conn: &Connection, sql: &str, id: i64) -> rusqlite::Result<i64> {
    conn.query_row(sql, [id], |r| r.get(0))
}

/// Case-insensitive name clash within one academic year. SQLite's NOCASE only
/// folds ASCII, so the comparison happens here.
pub fn name_taken(
    conn: &Connection,
    table: &str,
    year_id: i64,
    name: &str,
    exclude_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let sql = format!("SELECT id, name FROM {} WHERE year_id = ?", table);
    let mut stmt = conn.prepare(&sql)?;
    let wanted = name.trim().to_lowercase();
    let mut rows = stmt.query([year_id])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let existing: String = row.get(1)?;
        if Some(id) != exclude_id && existing.trim().to_lowercase() == wanted {
            return Ok(true);
        }
    }
    Ok(false)
}
