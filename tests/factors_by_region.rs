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

fn spawn_sidecar(args: &[&str]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_carbond");
    let mut child = Command::new(exe)
        .args(args)
        .env_remove("CARBOND_WORKSPACE")
        .env_remove("CARBOND_TOKEN_SECRET")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn carbond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    token: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(t) = token {
        payload["token"] = json!(t);
    }
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
    token: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, token, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        &format!("{}-register", id),
        "auth.register",
        None,
        json!({ "username": username, "password": "pw-12345" }),
    );
    let tokens = request_ok(
        stdin,
        reader,
        &format!("{}-token", id),
        "auth.token",
        None,
        json!({ "username": username, "password": "pw-12345" }),
    );
    tokens
        .get("access")
        .and_then(|v| v.as_str())
        .expect("access token")
        .to_string()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn num(v: &serde_json::Value, key: &str) -> f64 {
    v.get(key)
        .and_then(|x| x.as_f64())
        .unwrap_or_else(|| panic!("missing number {} in {}", key, v))
}

#[test]
fn by_region_prefers_regional_then_falls_back_to_default() {
    let workspace = temp_dir("carbond-factors");
    let ws = workspace.to_string_lossy().to_string();
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--workspace", &ws, "--no-seed"]);
    let staff = login(&mut stdin, &mut reader, "1", "staff");
    let user = login(&mut stdin, &mut reader, "2", "ana");
    let s = Some(staff.as_str());
    let u = Some(user.as_str());

    let factors = [
        ("", 0.31, "2024-01-01"),
        ("MX", 0.45, "2023-01-01"),
        ("MX", 0.42, "2024-06-01"),
    ];
    for (i, (region, value, updated_on)) in factors.into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("f{}", i),
            "factors.create",
            s,
            json!({
                "category": "energy",
                "subcategory": "electricity",
                "description": "grid electricity",
                "value": value,
                "unit": "kg CO2/kWh",
                "region": region,
                "updatedOn": updated_on,
                "source": "test"
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "factors.create",
        s,
        json!({ "category": "waste", "value": 0.58, "unit": "kg CO2/kg" }),
    );

    let denied = request(
        &mut stdin,
        &mut reader,
        "4",
        "factors.create",
        u,
        json!({ "category": "waste", "value": 1.0, "unit": "kg" }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    let mx = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "factors.byRegion",
        u,
        json!({ "category": "energy", "subcategory": "electricity", "region": "MX" }),
    );
    assert!(approx(num(&mx, "value"), 0.42));
    assert_eq!(mx.get("updatedOn").and_then(|v| v.as_str()), Some("2024-06-01"));

    let fr = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "factors.byRegion",
        u,
        json!({ "category": "energy", "subcategory": "electricity", "region": "FR" }),
    );
    assert!(approx(num(&fr, "value"), 0.31));
    assert_eq!(fr.get("region").and_then(|v| v.as_str()), Some(""));

    let any = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "factors.byRegion",
        u,
        json!({ "category": "energy" }),
    );
    assert!(approx(num(&any, "value"), 0.42));

    let none = request(
        &mut stdin,
        &mut reader,
        "8",
        "factors.byRegion",
        u,
        json!({ "category": "transport", "region": "MX" }),
    );
    assert_eq!(error_code(&none), "not_found");

    let missing = request(&mut stdin, &mut reader, "9", "factors.byRegion", u, json!({}));
    assert_eq!(error_code(&missing), "bad_params");

    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "factors.list",
        u,
        json!({ "search": "electricity mx" }),
    );
    assert_eq!(
        searched.get("factors").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "11",
        "factors.create",
        s,
        json!({ "category": "waste", "value": 1.0, "unit": "kg", "updatedOn": "June" }),
    );
    assert_eq!(error_code(&bad_date), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
