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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn non_admin_publish_and_delete_are_forbidden() {
    let workspace = temp_dir("resultd-access");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let result = json!({
        "studentId": "stu-1",
        "studentName": "Abebe",
        "grade": "9",
        "section": "A",
        "subjects": [{ "name": "Math", "marks": 50 }]
    });
    let student_submit = request(
        &mut stdin,
        &mut reader,
        "2",
        "results.submit",
        json!({ "actor": { "role": "student", "id": "stu-1" }, "key": "S1", "result": result }),
    );
    assert_eq!(error_code(&student_submit), Some("forbidden"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.submit",
        json!({ "actor": { "role": "teacher", "id": "t-1" }, "key": "S1", "result": result }),
    );

    for (i, role) in ["teacher", "student"].iter().enumerate() {
        let publish = request(
            &mut stdin,
            &mut reader,
            &format!("p{}", i),
            "results.publish",
            json!({ "actor": { "role": role, "id": "x" }, "keys": ["S1"] }),
        );
        assert_eq!(error_code(&publish), Some("forbidden"), "{} publish", role);

        let delete = request(
            &mut stdin,
            &mut reader,
            &format!("d{}", i),
            "results.deletePublished",
            json!({ "actor": { "role": role, "id": "x" }, "keys": ["S1"] }),
        );
        assert_eq!(error_code(&delete), Some("forbidden"), "{} delete", role);
    }

    let staff = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.list",
        json!({ "actor": { "role": "admin", "id": "admin-1" } }),
    );
    assert_eq!(
        staff.get("pending").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    assert_eq!(
        staff.get("published").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let audit = request(
        &mut stdin,
        &mut reader,
        "5",
        "audit.list",
        json!({ "actor": { "role": "teacher", "id": "t-1" } }),
    );
    assert_eq!(error_code(&audit), Some("forbidden"));

    let missing_actor = request(
        &mut stdin,
        &mut reader,
        "6",
        "results.list",
        json!({}),
    );
    assert_eq!(error_code(&missing_actor), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
