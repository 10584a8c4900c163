use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_schoold");
        let mut child = Command::new(exe)
            .env_remove("SCHOOLD_WORKSPACE")
            .env_remove("SCHOOLD_DELETE_POLICY")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn schoold");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value["id"], id);
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let v = self.call(method, params);
        assert_eq!(v["ok"], true, "{} failed: {}", method, v);
        v["result"].clone()
    }

    fn error_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let v = self.call(method, params);
        assert_eq!(v["ok"], false, "{} unexpectedly succeeded: {}", method, v);
        v["error"]["code"].as_str().unwrap_or("").to_string()
    }

    fn login(&mut self, id: &str, role: &str) {
        self.ok(
            "session.login",
            json!({ "user": { "id": id, "name": id, "email": format!("{id}@s.test"), "role": role } }),
        );
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn writes_require_an_admin_or_management_session() {
    let mut sc = Sidecar::spawn();
    assert_eq!(sc.error_code("grades.create", json!({ "name": "Grade 1" })), "unauthenticated");

    sc.login("t1", "teacher");
    assert_eq!(sc.error_code("grades.create", json!({ "name": "Grade 1" })), "forbidden");
    let has = sc.ok("session.hasRole", json!({ "roles": ["system_admin", "management"] }));
    assert_eq!(has["hasRole"], false);
    let has = sc.ok("session.hasRole", json!({ "roles": ["teacher"] }));
    assert_eq!(has["hasRole"], true);
    let has = sc.ok("session.hasRole", json!({ "roles": [] }));
    assert_eq!(has["hasRole"], false);

    sc.login("m1", "management");
    sc.ok("grades.create", json!({ "name": "Grade 1" }));
    assert_eq!(
        sc.error_code("settings.update", json!({ "patch": { "periodDuration": 50 } })),
        "forbidden"
    );

    sc.ok("session.logout", json!({}));
    assert!(sc.ok("session.current", json!({}))["user"].is_null());
    // Reads stay open.
    assert_eq!(sc.ok("grades.list", json!({}))["grades"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn sections_stay_in_insertion_order_within_their_grade() {
    let mut sc = Sidecar::spawn();
    sc.login("a1", "system_admin");
    let g1 = sc.ok("grades.create", json!({ "name": "Grade 1" }))["grade"]["id"].clone();
    let g2 = sc.ok("grades.create", json!({ "name": "Grade 2" }))["grade"]["id"].clone();
    sc.ok("sections.create", json!({ "gradeId": g1, "name": "A", "roomNumber": "101" }));
    sc.ok("sections.create", json!({ "gradeId": g1, "name": "B", "roomNumber": "102" }));

    let listed = sc.ok("sections.list", json!({ "gradeId": g1 }));
    let names: Vec<_> = listed["sections"]
        .as_array()
        .expect("sections")
        .iter()
        .map(|s| (s["name"].clone(), s["roomNumber"].clone()))
        .collect();
    assert_eq!(names, vec![(json!("A"), json!("101")), (json!("B"), json!("102"))]);
    let other = sc.ok("sections.list", json!({ "gradeId": g2 }));
    assert_eq!(other["sections"], json!([]));
    let missing = sc.ok("sections.list", json!({ "gradeId": "nope" }));
    assert_eq!(missing["sections"], json!([]));

    let grades = sc.ok("grades.list", json!({}));
    assert_eq!(grades["grades"][0]["sections"].as_array().map(|a| a.len()), Some(2));

    assert_eq!(sc.error_code("grades.delete", json!({ "gradeId": "nope" })), "not_found");
    sc.ok("grades.delete", json!({ "gradeId": g2 }));
    assert_eq!(sc.error_code("grades.delete", json!({ "gradeId": g2 })), "not_found");
    assert_eq!(
        sc.error_code("grades.update", json!({ "gradeId": g1, "patch": { "title": "x" } })),
        "bad_params"
    );
}

#[test]
fn timetable_cells_use_monday_based_day_index() {
    let mut sc = Sidecar::spawn();
    sc.login("a1", "system_admin");
    let g = sc.ok("grades.create", json!({ "name": "Grade 5" }))["grade"]["id"].clone();
    let s = sc.ok("sections.create", json!({ "gradeId": g, "name": "A" }))["section"]["id"].clone();
    let sub = sc.ok("subjects.create", json!({ "name": "Science", "code": "SCI" }))["subject"]["id"].clone();
    let t = sc.ok(
        "teachers.create",
        json!({ "name": "Marie", "email": "marie@s.test", "subjectIds": [sub] }),
    )["teacher"]["id"]
        .clone();

    let slots = sc.ok("timetable.slots", json!({}));
    assert_eq!(slots["slots"][0]["id"], "p1");
    assert_eq!(slots["slots"][0]["start"], "08:00");
    let days = sc.ok("timetable.days", json!({}));
    assert_eq!(days["days"][0], json!({ "dayIndex": 0, "dayOfWeek": 1, "name": "Monday" }));

    let entry = sc.ok(
        "timetable.create",
        json!({ "sectionId": s, "subjectId": sub, "teacherId": t, "timeSlotId": "p1", "dayOfWeek": 1 }),
    )["entry"]
        .clone();

    let cell = sc.ok("timetable.cell", json!({ "sectionId": s, "dayIndex": 0, "timeSlotId": "p1" }));
    assert_eq!(cell["entry"]["id"], entry["id"]);
    let cell = sc.ok("timetable.cell", json!({ "sectionId": s, "dayIndex": 1, "timeSlotId": "p1" }));
    assert!(cell["entry"].is_null());

    assert_eq!(
        sc.error_code(
            "timetable.create",
            json!({ "sectionId": s, "subjectId": sub, "teacherId": t, "timeSlotId": "p1", "dayOfWeek": 1 }),
        ),
        "conflict"
    );
    assert_eq!(
        sc.error_code(
            "timetable.create",
            json!({ "sectionId": s, "subjectId": sub, "teacherId": t, "timeSlotId": "lunch", "dayOfWeek": 2 }),
        ),
        "invalid"
    );

    let schedule = sc.ok("teachers.schedule", json!({ "teacherId": t }));
    assert_eq!(schedule["entries"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(sc.error_code("subjects.delete", json!({ "subjectId": sub })), "conflict");
}

#[test]
fn attendance_select_all_then_override() {
    let mut sc = Sidecar::spawn();
    sc.login("a1", "system_admin");
    let g = sc.ok("grades.create", json!({ "name": "Grade 2" }))["grade"]["id"].clone();
    let s = sc.ok("sections.create", json!({ "gradeId": g, "name": "A" }))["section"]["id"].clone();
    let mut ids = Vec::new();
    for (code, roll) in [("S-2", 2), ("S-1", 1), ("S-3", 3)] {
        let st = sc.ok(
            "students.create",
            json!({ "studentId": code, "firstName": "Kid", "lastName": code, "sectionId": s, "rollNumber": roll }),
        );
        ids.push(st["student"]["id"].clone());
    }

    sc.login("t1", "teacher");
    let sheet = sc.ok("attendance.open", json!({ "sectionId": s, "date": "2024-02-05", "session": "morning" }));
    let rolls: Vec<_> = sheet["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|r| r["rollNumber"].as_u64().unwrap_or(0))
        .collect();
    assert_eq!(rolls, vec![1, 2, 3]);
    assert!(sheet["students"][0]["status"].is_null());

    let marked = sc.ok(
        "attendance.mark",
        json!({
            "sectionId": s,
            "date": "2024-02-05",
            "session": "morning",
            "selectAll": "present",
            "marks": [{ "studentId": ids[0], "status": "absent" }],
        }),
    );
    assert_eq!(marked["tally"], json!({ "present": 2, "absent": 1, "total": 3 }));
    let record_ids: std::collections::HashSet<_> = marked["records"]
        .as_array()
        .expect("records")
        .iter()
        .map(|r| r["id"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(record_ids.len(), 3);
    assert_eq!(marked["records"][0]["markedBy"], "t1");

    let sheet = sc.ok("attendance.open", json!({ "sectionId": s, "date": "2024-02-05", "session": "morning" }));
    assert_eq!(sheet["tally"]["present"], 2);

    sc.login("p1", "parent");
    assert_eq!(
        sc.error_code(
            "attendance.mark",
            json!({ "date": "2024-02-05", "session": "morning", "marks": [{ "studentId": ids[0], "status": "present" }] }),
        ),
        "forbidden"
    );
}

#[test]
fn select_all_skips_students_who_have_left() {
    let mut sc = Sidecar::spawn();
    sc.login("a1", "system_admin");
    let g = sc.ok("grades.create", json!({ "name": "Grade 12" }))["grade"]["id"].clone();
    let s = sc.ok("sections.create", json!({ "gradeId": g, "name": "A" }))["section"]["id"].clone();
    let mut ids = Vec::new();
    for (code, roll, status) in [
        ("S-1", 1, "active"),
        ("S-2", 2, "graduated"),
        ("S-3", 3, "transferred"),
        ("S-4", 4, "active"),
    ] {
        let st = sc.ok(
            "students.create",
            json!({ "studentId": code, "firstName": "Kid", "lastName": code, "sectionId": s, "rollNumber": roll, "status": status }),
        );
        ids.push(st["student"]["id"].as_str().unwrap_or("").to_string());
    }

    sc.login("t1", "teacher");
    let marked = sc.ok(
        "attendance.mark",
        json!({ "sectionId": s, "date": "2024-06-03", "session": "afternoon", "selectAll": "present" }),
    );
    let marked_students: Vec<_> = marked["records"]
        .as_array()
        .expect("records")
        .iter()
        .map(|r| r["studentId"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(marked_students.len(), 2);
    assert!(marked_students.contains(&ids[0]));
    assert!(marked_students.contains(&ids[3]));
    assert!(!marked_students.contains(&ids[1]));
    assert!(!marked_students.contains(&ids[2]));
}
