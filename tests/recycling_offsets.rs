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
fn recycling_offsets_follow_links() {
    let workspace = temp_dir("carbond-recycling");
    let ws = workspace.to_string_lossy().to_string();
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--workspace", &ws, "--no-seed"]);
    let token = login(&mut stdin, &mut reader, "1", "staff");
    let t = Some(token.as_str());

    let bottles = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "materials.create",
        t,
        json!({
            "name": "PET bottles",
            "materialType": "plastic",
            "valuePerUnit": 2.5,
            "co2ReductionFactor": 1.5
        }),
    );
    let bottles_id = bottles.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    assert_eq!(bottles.get("unit").and_then(|v| v.as_str()), Some("kg"));
    assert_eq!(
        bottles.get("materialTypeDisplay").and_then(|v| v.as_str()),
        Some("Plastic")
    );
    let cans = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "materials.create",
        t,
        json!({
            "name": "Aluminium cans",
            "materialType": "metal",
            "valuePerUnit": 20.0,
            "co2ReductionFactor": 9.0
        }),
    );
    let cans_id = cans.get("id").and_then(|v| v.as_str()).expect("id").to_string();

    let footprint = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "footprints.create",
        t,
        json!({ "recordedAt": "2025-03-01", "transport": { "gasolineCarKm": 500.0 } }),
    );
    let footprint_id = footprint.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    assert!(approx(num(&footprint, "total"), 96.0));

    let recycling = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "recycling.create",
        t,
        json!({
            "recordedAt": "2025-03-02",
            "footprintRecordId": footprint_id,
            "materials": [{ "materialId": bottles_id, "quantity": 4.0 }]
        }),
    );
    let recycling_id = recycling.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    assert!(approx(num(&recycling, "totalKg"), 4.0));
    assert!(approx(num(&recycling, "economicValue"), 10.0));
    assert!(approx(num(&recycling, "co2Reduction"), 6.0));
    let lines = recycling.get("materials").and_then(|v| v.as_array()).expect("lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].get("materialName").and_then(|v| v.as_str()), Some("PET bottles"));

    let linked = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "footprints.get",
        t,
        json!({ "recordId": footprint_id }),
    );
    assert!(approx(num(&linked, "recyclingReduction"), 6.0));
    assert!(approx(num(&linked, "total"), 90.0));

    let line = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "recycling.addMaterial",
        t,
        json!({ "recordId": recycling_id, "materialId": cans_id, "quantity": 0.5, "unit": "kg" }),
    );
    assert!(approx(num(&line, "economicValue"), 10.0));
    assert!(approx(num(&line, "co2Reduction"), 4.5));

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "recycling.get",
        t,
        json!({ "recordId": recycling_id }),
    );
    assert!(approx(num(&detail, "co2Reduction"), 10.5));
    let by_type = detail.get("statsByType").expect("statsByType");
    assert!(approx(num(by_type.get("metal").expect("metal"), "quantity"), 0.5));
    assert!(approx(num(by_type.get("plastic").expect("plastic"), "economicValue"), 10.0));

    let linked = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "footprints.get",
        t,
        json!({ "recordId": footprint_id }),
    );
    assert!(approx(num(&linked, "total"), 85.5));

    let stats = request_ok(&mut stdin, &mut reader, "10", "recycling.stats", t, json!({}));
    let summary = stats.get("summary").expect("summary");
    assert!(approx(num(summary, "totalKg"), 4.5));
    assert!(approx(num(summary, "totalEconomicValue"), 20.0));
    assert_eq!(summary.get("recordCount").and_then(|v| v.as_i64()), Some(1));
    let metal = stats
        .get("byMaterialType")
        .and_then(|v| v.get("metal"))
        .expect("metal stats");
    assert_eq!(metal.get("name").and_then(|v| v.as_str()), Some("Metal"));
    let march = stats
        .get("monthly")
        .and_then(|v| v.get("2025-03"))
        .expect("monthly bucket");
    assert!(approx(num(march, "co2Reduction"), 10.5));

    let unlinked = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "recycling.update",
        t,
        json!({ "recordId": recycling_id, "footprintRecordId": null }),
    );
    assert!(unlinked.get("footprintRecordId").map(|v| v.is_null()).unwrap_or(false));
    let linked = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "footprints.get",
        t,
        json!({ "recordId": footprint_id }),
    );
    assert!(approx(num(&linked, "recyclingReduction"), 0.0));
    assert!(approx(num(&linked, "total"), 96.0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "recycling.update",
        t,
        json!({ "recordId": recycling_id, "footprintRecordId": footprint_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "recycling.delete",
        t,
        json!({ "recordId": recycling_id }),
    );
    let linked = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "footprints.get",
        t,
        json!({ "recordId": footprint_id }),
    );
    assert!(approx(num(&linked, "total"), 96.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_footprint_keeps_its_recycling() {
    let workspace = temp_dir("carbond-recycling-unlink");
    let ws = workspace.to_string_lossy().to_string();
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--workspace", &ws]);
    let token = login(&mut stdin, &mut reader, "1", "ana");
    let t = Some(token.as_str());

    let by_type = request_ok(&mut stdin, &mut reader, "2", "materials.byType", t, json!({}));
    let glass = by_type
        .get("glass")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|m| m.get("id"))
        .and_then(|v| v.as_str())
        .expect("seeded glass material")
        .to_string();

    let footprint = request_ok(&mut stdin, &mut reader, "3", "footprints.create", t, json!({}));
    let footprint_id = footprint.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    let recycling = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "recycling.create",
        t,
        json!({
            "footprintRecordId": footprint_id,
            "materials": [{ "materialId": glass, "quantity": 3.0 }]
        }),
    );
    let recycling_id = recycling.get("id").and_then(|v| v.as_str()).expect("id").to_string();

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "recycling.create",
        t,
        json!({ "materials": [{ "materialId": "nope", "quantity": 1.0 }] }),
    );
    assert_eq!(error_code(&missing), "not_found");
    let negative = request(
        &mut stdin,
        &mut reader,
        "6",
        "recycling.addMaterial",
        t,
        json!({ "recordId": recycling_id, "materialId": glass, "quantity": -1.0 }),
    );
    assert_eq!(error_code(&negative), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "footprints.delete",
        t,
        json!({ "recordId": footprint_id }),
    );
    let kept = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "recycling.get",
        t,
        json!({ "recordId": recycling_id }),
    );
    assert!(kept.get("footprintRecordId").map(|v| v.is_null()).unwrap_or(false));
    let list = request_ok(&mut stdin, &mut reader, "9", "recycling.list", t, json!({}));
    assert_eq!(list.get("records").and_then(|v| v.as_array()).map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
