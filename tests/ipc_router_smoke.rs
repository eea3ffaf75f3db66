use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("resultd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin = json!({ "role": "admin", "id": "admin-1" });

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health
        .pointer("/result/workspacePath")
        .map(|v| v.is_null())
        .unwrap_or(false));

    let no_ws = request(
        &mut stdin,
        &mut reader,
        "2",
        "results.list",
        json!({ "actor": admin }),
    );
    assert_eq!(
        no_ws.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "4", "settings.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "settings.update",
        json!({ "actor": admin, "patch": { "homeroomName": "Room 4" } }),
    );
    let result = json!({
        "studentId": "stu-1",
        "studentName": "Smoke",
        "grade": "7",
        "section": "C",
        "subjects": [{ "name": "Math", "marks": 70 }]
    });
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "calc.preview",
        json!({ "actor": admin, "result": result }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "results.submit",
        json!({ "actor": admin, "key": "SMOKE", "result": result }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "results.get",
        json!({ "actor": admin, "key": "SMOKE" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "results.cohort",
        json!({ "actor": admin, "set": "pending", "grade": "7", "section": "C" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "results.publish",
        json!({ "actor": admin, "keys": ["SMOKE"] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "results.list",
        json!({ "actor": admin }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "results.deletePublished",
        json!({ "actor": admin, "keys": ["SMOKE"] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "audit.list",
        json!({ "actor": admin, "limit": 10 }),
    );

    // Unknown methods are reported, not dropped.
    writeln!(
        stdin,
        "{}",
        json!({ "id": "14", "method": "classes.list", "params": {} })
    )
    .expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let unknown: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let garbage: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(
        garbage.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
