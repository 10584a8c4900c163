use crate::model::{
    AttendanceRecord, AttendanceStatus, DomainState, Grade, SchoolSettings, Section, Session,
    Student, StudentStatus, Subject, Teacher, TimetableEntry,
};
use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

pub const DB_FILE: &str = "school.sqlite3";
pub const SCHEMA_VERSION: i64 = 2;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    open_db_file(&workspace.join(DB_FILE))
}

/// Opens a database file directly and brings its schema up to date.
pub fn open_db_file(db_path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(db_path)?;

    // No foreign keys: the orphan delete policy deliberately leaves dangling ids.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            name TEXT NOT NULL,
            room_number TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_grade_sort ON sections(grade_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            section_id TEXT NOT NULL,
            roll_number INTEGER NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_section ON students(section_id)",
        [],
    )?;
    // Version 1 workspaces predate student status.
    ensure_students_status(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(teacher_id, subject_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_entries(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            time_slot_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_section ON timetable_entries(section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            session TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            UNIQUE(student_id, date, session)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance_records(date, session)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    Ok(conn)
}

pub fn schema_version(conn: &Connection) -> anyhow::Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

fn ensure_students_status(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN status TEXT NOT NULL DEFAULT 'active'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Rewrites every table from `state` in a single transaction.
pub fn save_state(conn: &mut Connection, state: &DomainState) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    for table in [
        "grades",
        "sections",
        "students",
        "subjects",
        "teachers",
        "teacher_subjects",
        "timetable_entries",
        "attendance_records",
        "settings",
    ] {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }

    save_grades(&tx, &state.grades)?;
    save_students(&tx, &state.students)?;
    save_subjects(&tx, &state.subjects)?;
    save_teachers(&tx, &state.teachers)?;
    save_timetable(&tx, &state.timetable)?;
    save_attendance(&tx, &state.attendance)?;
    save_settings(&tx, &state.settings)?;

    tx.commit()?;
    Ok(())
}

fn save_grades(tx: &Transaction, grades: &[Grade]) -> anyhow::Result<()> {
    let mut grade_stmt =
        tx.prepare("INSERT INTO grades(id, name, sort_order) VALUES(?, ?, ?)")?;
    let mut section_stmt = tx.prepare(
        "INSERT INTO sections(id, grade_id, name, room_number, sort_order) VALUES(?, ?, ?, ?, ?)",
    )?;
    for (i, g) in grades.iter().enumerate() {
        grade_stmt.execute(params![g.id, g.name, i as i64])?;
        for (j, s) in g.sections.iter().enumerate() {
            section_stmt.execute(params![s.id, g.id, s.name, s.room_number, j as i64])?;
        }
    }
    Ok(())
}

fn save_students(tx: &Transaction, students: &[Student]) -> anyhow::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO students(id, student_code, first_name, last_name, section_id, roll_number, status, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (i, s) in students.iter().enumerate() {
        stmt.execute(params![
            s.id,
            s.student_id,
            s.first_name,
            s.last_name,
            s.section_id,
            s.roll_number,
            s.status.as_str(),
            i as i64
        ])?;
    }
    Ok(())
}

fn save_subjects(tx: &Transaction, subjects: &[Subject]) -> anyhow::Result<()> {
    let mut stmt =
        tx.prepare("INSERT INTO subjects(id, name, code, sort_order) VALUES(?, ?, ?, ?)")?;
    for (i, s) in subjects.iter().enumerate() {
        stmt.execute(params![s.id, s.name, s.code, i as i64])?;
    }
    Ok(())
}

fn save_teachers(tx: &Transaction, teachers: &[Teacher]) -> anyhow::Result<()> {
    let mut stmt =
        tx.prepare("INSERT INTO teachers(id, name, email, sort_order) VALUES(?, ?, ?, ?)")?;
    let mut link_stmt = tx.prepare(
        "INSERT INTO teacher_subjects(teacher_id, subject_id, sort_order) VALUES(?, ?, ?)",
    )?;
    for (i, t) in teachers.iter().enumerate() {
        stmt.execute(params![t.id, t.name, t.email, i as i64])?;
        for (j, sid) in t.subject_ids.iter().enumerate() {
            link_stmt.execute(params![t.id, sid, j as i64])?;
        }
    }
    Ok(())
}

fn save_timetable(tx: &Transaction, entries: &[TimetableEntry]) -> anyhow::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO timetable_entries(id, section_id, subject_id, teacher_id, time_slot_id, day_of_week, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (i, e) in entries.iter().enumerate() {
        stmt.execute(params![
            e.id,
            e.section_id,
            e.subject_id,
            e.teacher_id,
            e.time_slot_id,
            e.day_of_week,
            i as i64
        ])?;
    }
    Ok(())
}

fn save_attendance(tx: &Transaction, records: &[AttendanceRecord]) -> anyhow::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO attendance_records(id, student_id, date, session, status, marked_by, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (i, r) in records.iter().enumerate() {
        stmt.execute(params![
            r.id,
            r.student_id,
            r.date.format(DATE_FORMAT).to_string(),
            r.session.as_str(),
            r.status.as_str(),
            r.marked_by,
            i as i64
        ])?;
    }
    Ok(())
}

fn save_settings(tx: &Transaction, settings: &SchoolSettings) -> anyhow::Result<()> {
    let value = serde_json::to_value(settings).context("failed to serialize settings")?;
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("settings did not serialize to an object"))?;
    let mut stmt = tx.prepare("INSERT INTO settings(key, value_json) VALUES(?, ?)")?;
    for (key, v) in obj {
        stmt.execute(params![key, v.to_string()])?;
    }
    Ok(())
}

/// Reads the full domain state back. Missing settings keys take their
/// defaults.
pub fn load_state(conn: &Connection) -> anyhow::Result<DomainState> {
    let mut grades: Vec<Grade> = {
        let mut stmt = conn.prepare("SELECT id, name FROM grades ORDER BY sort_order")?;
        let rows = stmt.query_map([], |r| {
            Ok(Grade {
                id: r.get(0)?,
                name: r.get(1)?,
                sections: Vec::new(),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    {
        let index: HashMap<String, usize> = grades
            .iter()
            .enumerate()
            .map(|(i, g)| (g.id.clone(), i))
            .collect();
        let mut stmt = conn.prepare(
            "SELECT id, grade_id, name, room_number FROM sections ORDER BY grade_id, sort_order",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(Section {
                id: r.get(0)?,
                grade_id: r.get(1)?,
                name: r.get(2)?,
                room_number: r.get(3)?,
            })
        })?;
        for s in rows {
            let s = s?;
            match index.get(&s.grade_id) {
                Some(&gi) => grades[gi].sections.push(s),
                None => warn!(section_id = %s.id, grade_id = %s.grade_id, "dropping section of missing grade"),
            }
        }
    }

    let students = {
        let mut stmt = conn.prepare(
            "SELECT id, student_code, first_name, last_name, section_id, roll_number, status
             FROM students ORDER BY sort_order",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                Student {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    first_name: r.get(2)?,
                    last_name: r.get(3)?,
                    section_id: r.get(4)?,
                    roll_number: r.get(5)?,
                    status: StudentStatus::Active,
                },
                r.get::<_, String>(6)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (mut s, status) = row?;
            s.status = StudentStatus::parse(&status)
                .ok_or_else(|| anyhow!("student {} has unknown status {status:?}", s.id))?;
            out.push(s);
        }
        out
    };

    let subjects = {
        let mut stmt = conn.prepare("SELECT id, name, code FROM subjects ORDER BY sort_order")?;
        let rows = stmt.query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let teachers = {
        let mut stmt = conn.prepare("SELECT id, name, email FROM teachers ORDER BY sort_order")?;
        let rows = stmt.query_map([], |r| {
            Ok(Teacher {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                subject_ids: Vec::new(),
            })
        })?;
        let mut teachers = rows.collect::<Result<Vec<_>, _>>()?;
        let mut link_stmt = conn.prepare(
            "SELECT subject_id FROM teacher_subjects WHERE teacher_id = ? ORDER BY sort_order",
        )?;
        for t in teachers.iter_mut() {
            t.subject_ids = link_stmt
                .query_map([&t.id], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
        }
        teachers
    };

    let timetable = {
        let mut stmt = conn.prepare(
            "SELECT id, section_id, subject_id, teacher_id, time_slot_id, day_of_week
             FROM timetable_entries ORDER BY sort_order",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(TimetableEntry {
                id: r.get(0)?,
                section_id: r.get(1)?,
                subject_id: r.get(2)?,
                teacher_id: r.get(3)?,
                time_slot_id: r.get(4)?,
                day_of_week: r.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let attendance = {
        let mut stmt = conn.prepare(
            "SELECT id, student_id, date, session, status, marked_by
             FROM attendance_records ORDER BY sort_order",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, student_id, date, session, status, marked_by) = row?;
            let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                .with_context(|| format!("attendance record {id} has bad date {date:?}"))?;
            let session = Session::parse(&session)
                .ok_or_else(|| anyhow!("attendance record {id} has unknown session {session:?}"))?;
            let status = AttendanceStatus::parse(&status)
                .ok_or_else(|| anyhow!("attendance record {id} has unknown status {status:?}"))?;
            out.push(AttendanceRecord {
                id,
                student_id,
                date,
                session,
                status,
                marked_by,
            });
        }
        out
    };

    let settings = load_settings(conn)?;

    Ok(DomainState {
        grades,
        students,
        teachers,
        subjects,
        timetable,
        attendance,
        settings,
    })
}

fn load_settings(conn: &Connection) -> anyhow::Result<SchoolSettings> {
    let mut merged = serde_json::to_value(SchoolSettings::default())
        .context("failed to serialize default settings")?;
    let mut stmt = conn.prepare("SELECT key, value_json FROM settings")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    if let Some(obj) = merged.as_object_mut() {
        for row in rows {
            let (key, raw) = row?;
            let v: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("settings key {key} is not valid JSON"))?;
            obj.insert(key, v);
        }
    }
    serde_json::from_value(merged).context("stored settings are invalid")
}
