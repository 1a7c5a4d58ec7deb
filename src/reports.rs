use crate::classes;
use crate::error::SchoolResult;
use crate::grading::{is_passing, round2, GradeSheet, Semester};
use crate::policy::{self, ThresholdSource};
use crate::subjects;
use crate::years;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassRateRow {
    pub class_id: i64,
    pub class_name: String,
    pub class_size: i64,
    pub graded: i64,
    pub passed: i64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub subject_id: i64,
    pub subject_name: String,
    pub year_label: String,
    pub semester_id: i64,
    pub passing_threshold: f64,
    pub threshold_source: ThresholdSource,
    pub rows: Vec<PassRateRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterReport {
    pub year_id: i64,
    pub year_label: String,
    pub semester_id: i64,
    pub passing_threshold: f64,
    pub threshold_source: ThresholdSource,
    pub rows: Vec<PassRateRow>,
}

/// Percentage rounded to two decimals; zero graded means zero.
pub fn pass_rate(passed: i64, graded: i64) -> f64 {
    if graded == 0 {
        return 0.0;
    }
    round2(passed as f64 * 100.0 / graded as f64)
}

fn row(class: &classes::SchoolClass, graded: i64, passed: i64) -> PassRateRow {
    PassRateRow {
        class_id: class.id,
        class_name: class.name.clone(),
        class_size: class.size,
        graded,
        passed,
        pass_rate: pass_rate(passed, graded),
    }
}

/// Pass rate of one subject in one semester, per class teaching it. Only
/// records of students still enrolled in the class count. A record without an
/// average counts as graded and not passed.
pub fn report_by_subject(
    conn: &Connection,
    subject_id: i64,
    semester_id: i64,
) -> SchoolResult<SubjectReport> {
    let semester = Semester::require(semester_id)?;
    let subject = subjects::require_subject(conn, subject_id)?;
    let (threshold, source) = policy::passing_threshold_or_default(conn, subject.year_id)?;

    let mut stmt = conn.prepare(
        "SELECT c.id, gr.average
         FROM class_subjects cs
         JOIN classes c ON c.id = cs.class_id
         JOIN grade_records gr
           ON gr.class_id = c.id AND gr.subject_id = cs.subject_id AND gr.semester_id = ?
         JOIN class_students st
           ON st.class_id = gr.class_id AND st.student_id = gr.student_id
         WHERE cs.subject_id = ?",
    )?;
    let mut tally: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
    let mut raw = stmt.query((semester.id(), subject.id))?;
    while let Some(r) = raw.next()? {
        let class_id: i64 = r.get(0)?;
        let average: Option<f64> = r.get(1)?;
        let entry = tally.entry(class_id).or_default();
        entry.0 += 1;
        if average.map(|a| is_passing(a, threshold)).unwrap_or(false) {
            entry.1 += 1;
        }
    }

    let mut rows = Vec::with_capacity(tally.len());
    for (class_id, (graded, passed)) in tally {
        let class = classes::require_class(conn, class_id)?;
        rows.push(row(&class, graded, passed));
    }
    rows.sort_by(|a, b| a.class_name.cmp(&b.class_name));

    Ok(SubjectReport {
        subject_id: subject.id,
        subject_name: subject.name,
        year_label: subject.year_label,
        semester_id: semester.id(),
        passing_threshold: threshold,
        threshold_source: source,
        rows,
    })
}

/// Pass rate of every class of a year in one semester. An enrolled student
/// counts when they have any record in the semester and passes when the mean of their
/// complete subject averages reaches the threshold.
pub fn report_by_semester(
    conn: &Connection,
    year_id: i64,
    semester_id: i64,
) -> SchoolResult<SemesterReport> {
    let semester = Semester::require(semester_id)?;
    let year = years::require_year(conn, year_id)?;
    let (threshold, source) = policy::passing_threshold_or_default(conn, year.id)?;

    let mut stmt = conn.prepare(
        "SELECT gr.class_id, gr.student_id, gr.average
         FROM grade_records gr
         JOIN classes c ON c.id = gr.class_id
         JOIN class_students st
           ON st.class_id = gr.class_id AND st.student_id = gr.student_id
         WHERE c.year_id = ? AND gr.semester_id = ?",
    )?;
    let mut per_student: BTreeMap<(i64, i64), Vec<f64>> = BTreeMap::new();
    let mut raw = stmt.query((year.id, semester.id()))?;
    while let Some(r) = raw.next()? {
        let key: (i64, i64) = (r.get(0)?, r.get(1)?);
        let average: Option<f64> = r.get(2)?;
        let bucket = per_student.entry(key).or_default();
        if let Some(a) = average {
            bucket.push(a);
        }
    }

    let mut tally: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
    for ((class_id, _student_id), averages) in per_student {
        let entry = tally.entry(class_id).or_default();
        entry.0 += 1;
        if !averages.is_empty() {
            let mean = round2(averages.iter().sum::<f64>() / averages.len() as f64);
            if is_passing(mean, threshold) {
                entry.1 += 1;
            }
        }
    }

    let mut rows = Vec::with_capacity(tally.len());
    for (class_id, (graded, passed)) in tally {
        let class = classes::require_class(conn, class_id)?;
        rows.push(row(&class, graded, passed));
    }
    rows.sort_by(|a, b| a.class_name.cmp(&b.class_name));

    Ok(SemesterReport {
        year_id: year.id,
        year_label: year.label,
        semester_id: semester.id(),
        passing_threshold: threshold,
        threshold_source: source,
        rows,
    })
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line(cells: &[String]) -> String {
    let quoted: Vec<String> = cells.iter().map(|c| csv_quote(c)).collect();
    format!("{}\n", quoted.join(","))
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_default()
}

pub fn pass_rate_csv(rows: &[PassRateRow]) -> String {
    let mut out = csv_line(&[
        "class".into(),
        "size".into(),
        "graded".into(),
        "passed".into(),
        "pass_rate".into(),
    ]);
    for r in rows {
        out.push_str(&csv_line(&[
            r.class_name.clone(),
            r.class_size.to_string(),
            r.graded.to_string(),
            r.passed.to_string(),
            format!("{:.2}", r.pass_rate),
        ]));
    }
    out
}

pub fn grade_sheet_csv(sheet: &GradeSheet) -> String {
    let mut out = csv_line(&[
        "student_id".into(),
        "name".into(),
        "score_a".into(),
        "score_b".into(),
        "average".into(),
        "passed".into(),
    ]);
    for r in &sheet.rows {
        out.push_str(&csv_line(&[
            r.student_id.to_string(),
            r.full_name.clone(),
            fmt_opt(r.score_a),
            fmt_opt(r.score_b),
            fmt_opt(r.average),
            r.passed.map(|p| if p { "yes" } else { "no" }).unwrap_or_default().to_string(),
        ]));
    }
    out
}
