use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(workspace_env: Option<&Path>) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut cmd = Command::new(exe);
    cmd.env_remove("SCHOOLD_WORKSPACE")
        .env_remove("SCHOOLD_DELETE_POLICY")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    if let Some(ws) = workspace_env {
        cmd.env("SCHOOLD_WORKSPACE", ws);
    }
    let mut child = cmd.spawn().expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], true, "{} failed: {}", method, value);
    value["result"].clone()
}

fn grade_names(result: &serde_json::Value) -> Vec<String> {
    result["grades"]
        .as_array()
        .expect("grades")
        .iter()
        .map(|g| g["name"].as_str().unwrap_or("").to_string())
        .collect()
}

fn login_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    request_ok(
        stdin,
        reader,
        "login",
        "session.login",
        json!({ "user": { "id": "a1", "name": "Admin", "email": "a@s.test", "role": "system_admin" } }),
    );
}

#[test]
fn mutations_survive_a_restart() {
    let workspace = temp_dir("schoold-persist");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(None);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    login_admin(&mut stdin, &mut reader);
    let g = request_ok(&mut stdin, &mut reader, "2", "grades.create", json!({ "name": "Grade 3" }));
    let grade_id = g["grade"]["id"].clone();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sections.create",
        json!({ "gradeId": grade_id, "name": "A", "roomNumber": "301" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "settings.update",
        json!({ "patch": { "periodDuration": 50 } }),
    );
    drop(stdin);
    let _ = child.wait();

    assert!(workspace.join("school.sqlite3").is_file());

    // Second run opens the workspace from the environment.
    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&workspace));
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_string());
    let grades = request_ok(&mut stdin, &mut reader, "2", "grades.list", json!({}));
    assert_eq!(grades["grades"][0]["name"], "Grade 3");
    assert_eq!(grades["grades"][0]["sections"][0]["roomNumber"], "301");
    let settings = request_ok(&mut stdin, &mut reader, "3", "settings.get", json!({}));
    assert_eq!(settings["settings"]["periodDuration"], 50);
    drop(stdin);
    let _ = child.wait();

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundle_import_restores_an_exported_workspace() {
    let source = temp_dir("schoold-bundle-src");
    let target = temp_dir("schoold-bundle-dst");
    let bundle = source.join("out").join("backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&source));
    login_admin(&mut stdin, &mut reader);
    request_ok(&mut stdin, &mut reader, "1", "grades.create", json!({ "name": "Grade 9" }));
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], "schoold-workspace-v1");
    assert_eq!(export["sha256"].as_str().map(|s| s.len()), Some(64));

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": target.to_string_lossy() }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "4", "grades.list", json!({}));
    assert_eq!(empty["grades"], json!([]));

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(import["bundleFormatDetected"], "schoold-workspace-v1");
    let restored = request_ok(&mut stdin, &mut reader, "6", "grades.list", json!({}));
    assert_eq!(restored["grades"][0]["name"], "Grade 9");
    drop(stdin);
    let _ = child.wait();

    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(target);
}

#[test]
fn failed_select_keeps_writing_to_the_current_workspace() {
    let workspace = temp_dir("schoold-select-keep");
    let blocker = temp_dir("schoold-select-blocker").join("plain-file");
    std::fs::write(&blocker, "not a directory").expect("write blocker file");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&workspace));
    login_admin(&mut stdin, &mut reader);
    request_ok(&mut stdin, &mut reader, "1", "grades.create", json!({ "name": "Grade 1" }));

    let failed = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": blocker.join("nested").to_string_lossy() }),
    );
    assert_eq!(failed["ok"], false, "{failed}");

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(health["workspacePath"], json!(workspace.to_string_lossy()));
    request_ok(&mut stdin, &mut reader, "4", "grades.create", json!({ "name": "Grade 2" }));
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&workspace));
    let grades = request_ok(&mut stdin, &mut reader, "1", "grades.list", json!({}));
    assert_eq!(grade_names(&grades), vec!["Grade 1", "Grade 2"]);
    drop(stdin);
    let _ = child.wait();

    let _ = std::fs::remove_dir_all(workspace);
    if let Some(parent) = blocker.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

#[test]
fn importing_a_non_database_keeps_the_workspace_and_write_through() {
    let workspace = temp_dir("schoold-import-junk");
    let junk = temp_dir("schoold-import-junk-src").join("notes.txt");
    std::fs::write(&junk, "these are lesson notes").expect("write junk");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&workspace));
    login_admin(&mut stdin, &mut reader);
    request_ok(&mut stdin, &mut reader, "1", "grades.create", json!({ "name": "Grade 8" }));

    let failed = request(
        &mut stdin,
        &mut reader,
        "2",
        "backup.importWorkspaceBundle",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(failed["error"]["code"], "backup_failed", "{failed}");

    let grades = request_ok(&mut stdin, &mut reader, "3", "grades.list", json!({}));
    assert_eq!(grade_names(&grades), vec!["Grade 8"]);
    request_ok(&mut stdin, &mut reader, "4", "grades.create", json!({ "name": "Grade 9" }));
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&workspace));
    let grades = request_ok(&mut stdin, &mut reader, "1", "grades.list", json!({}));
    assert_eq!(grade_names(&grades), vec!["Grade 8", "Grade 9"]);
    drop(stdin);
    let _ = child.wait();

    let _ = std::fs::remove_dir_all(workspace);
    if let Some(parent) = junk.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}
