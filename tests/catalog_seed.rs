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

fn catalog_counts(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    token: &str,
) -> (usize, usize, usize) {
    let len = |v: &serde_json::Value, key: &str| {
        v.get(key).and_then(|x| x.as_array()).map(|a| a.len()).unwrap_or(0)
    };
    let materials = request_ok(stdin, reader, &format!("{}-m", id), "materials.list", Some(token), json!({}));
    let factors = request_ok(stdin, reader, &format!("{}-f", id), "factors.list", Some(token), json!({}));
    let recs = request_ok(stdin, reader, &format!("{}-r", id), "recommendations.list", Some(token), json!({}));
    (
        len(&materials, "materials"),
        len(&factors, "factors"),
        len(&recs, "recommendations"),
    )
}

#[test]
fn fresh_workspace_is_seeded_once() {
    let workspace = temp_dir("carbond-catalog");
    let ws = workspace.to_string_lossy().to_string();

    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--workspace", &ws]);
    let token = login(&mut stdin, &mut reader, "1", "ana");
    let t = Some(token.as_str());
    let first = catalog_counts(&mut stdin, &mut reader, "2", &token);
    assert!(first.0 > 0 && first.1 > 0 && first.2 > 0, "{:?}", first);

    let by_type = request_ok(&mut stdin, &mut reader, "3", "materials.byType", t, json!({}));
    for kind in ["paper", "glass", "plastic", "metal", "organic", "electronic", "textile", "other"] {
        let items = by_type.get(kind).and_then(|v| v.as_array()).expect(kind);
        assert!(!items.is_empty(), "no seeded {} material", kind);
    }

    let default_car = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "factors.byRegion",
        t,
        json!({ "category": "transport", "subcategory": "gasoline_car", "region": "MX" }),
    );
    assert!(approx(num(&default_car, "value"), 0.192));

    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "materials.list",
        t,
        json!({ "search": "glass" }),
    );
    for m in searched.get("materials").and_then(|v| v.as_array()).expect("materials") {
        let name = m.get("name").and_then(|v| v.as_str()).unwrap_or("").to_lowercase();
        let kind = m.get("materialType").and_then(|v| v.as_str()).unwrap_or("");
        assert!(name.contains("glass") || kind == "glass", "{}", m);
    }

    let heating = request_ok(
        &mut stdin,
        &mut reader,
        "5a",
        "factors.list",
        t,
        json!({ "search": "heating" }),
    );
    let heating = heating.get("factors").and_then(|v| v.as_array()).expect("factors");
    assert_eq!(heating.len(), 5);
    for (code, value) in [
        ("heating_gas", 0.20),
        ("heating_electric", 0.31),
        ("heating_wood", 0.02),
        ("heating_oil", 0.27),
        ("heating_biomass", 0.01),
    ] {
        let factor = request_ok(
            &mut stdin,
            &mut reader,
            &format!("5b-{}", code),
            "factors.byRegion",
            t,
            json!({ "category": "energy", "subcategory": code }),
        );
        assert!(approx(num(&factor, "value"), value), "{}", factor);
    }

    for (i, wildcard) in ["_", "%", "\\"].iter().enumerate() {
        let found = request_ok(
            &mut stdin,
            &mut reader,
            &format!("5c-{}", i),
            "materials.list",
            t,
            json!({ "search": wildcard }),
        );
        assert_eq!(
            found.get("materials").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(0),
            "search {:?} matched literally absent text",
            wildcard
        );
    }
    let pet = request_ok(
        &mut stdin,
        &mut reader,
        "5d",
        "materials.list",
        t,
        json!({ "search": "pet" }),
    );
    assert_eq!(
        pet.get("materials").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--workspace", &ws]);
    let tokens = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.token",
        None,
        json!({ "username": "ana", "password": "pw-12345" }),
    );
    let token = tokens.get("access").and_then(|v| v.as_str()).expect("access").to_string();
    let second = catalog_counts(&mut stdin, &mut reader, "7", &token);
    assert_eq!(first, second);
    drop(stdin);
    let _ = child.wait();

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn no_seed_leaves_catalog_empty() {
    let workspace = temp_dir("carbond-catalog-empty");
    let ws = workspace.to_string_lossy().to_string();
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--workspace", &ws, "--no-seed"]);
    let token = login(&mut stdin, &mut reader, "1", "ana");
    assert_eq!(catalog_counts(&mut stdin, &mut reader, "2", &token), (0, 0, 0));

    let by_type = request_ok(&mut stdin, &mut reader, "3", "materials.byType", Some(token.as_str()), json!({}));
    assert_eq!(by_type.as_object().map(|o| o.len()), Some(8));

    let no_factor = request(
        &mut stdin,
        &mut reader,
        "4",
        "factors.byRegion",
        Some(token.as_str()),
        json!({ "category": "transport", "subcategory": "gasoline_car" }),
    );
    assert_eq!(error_code(&no_factor), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
