use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use lap_telemetry_core::{now_utc, timestamp_micros};
use rusqlite::params;
use serde_json::Value;
use ulid::Ulid;

fn lapt_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lapt"))
}

fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("lapt-cli-test-{}.sqlite3", Ulid::new()))
}

fn lapt_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(lapt_binary_path());
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run lapt command {args:?}: {err}"),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn backdate_lap_by_days(db_path: &Path, lap_name: &str, days: i64) {
    let conn = match rusqlite::Connection::open(db_path) {
        Ok(value) => value,
        Err(err) => panic!("failed to open backdate connection: {err}"),
    };
    let now = match timestamp_micros(now_utc()) {
        Ok(value) => value,
        Err(err) => panic!("failed to compute now: {err}"),
    };
    let backdated = now - days * 86_400 * 1_000_000;
    let updated = match conn.execute(
        "UPDATE laps SET created_at = ?1 WHERE name = ?2",
        params![backdated, lap_name],
    ) {
        Ok(value) => value,
        Err(err) => panic!("failed to backdate lap: {err}"),
    };
    assert_eq!(updated, 1);
}

#[test]
fn create_register_and_query_round_trip() {
    let db = temp_db_path();

    let created = lapt_output(&db, &["lap", "create", "--name", "Lap 1"]);
    assert!(created.status.success(), "{}", stderr_text(&created));
    assert_eq!(stdout_json(&created)["name"], Value::from("Lap 1"));

    let registered = lapt_output(
        &db,
        &[
            "register",
            "--lap",
            "Lap 1",
            "--reading",
            "speed=120",
            "--reading",
            "temp=75",
        ],
    );
    assert!(registered.status.success(), "{}", stderr_text(&registered));
    assert_eq!(stdout_json(&registered)["stored"], Value::from(2));

    let speed = lapt_output(&db, &["params", "get", "--lap", "Lap 1", "--key", "speed"]);
    assert!(speed.status.success(), "{}", stderr_text(&speed));
    let speed_values = stdout_json(&speed);
    assert_eq!(speed_values.as_array().map(Vec::len), Some(1));
    assert_eq!(speed_values[0]["value"], Value::from("120"));

    let all = lapt_output(&db, &["params", "all", "--lap", "Lap 1"]);
    assert!(all.status.success(), "{}", stderr_text(&all));
    let all_values = stdout_json(&all);
    assert_eq!(all_values.as_array().map(Vec::len), Some(2));
    assert_eq!(all_values[0]["key"], Value::from("speed"));
    assert_eq!(all_values[1]["key"], Value::from("temp"));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn register_against_an_unknown_lap_maps_to_404() {
    let db = temp_db_path();

    let output = lapt_output(&db, &["register", "--lap", "Unknown", "--reading", "speed=1"]);
    assert!(!output.status.success());
    let stderr = stderr_text(&output);
    assert!(stderr.contains("lap not found"), "stderr={stderr}");
    assert!(stderr.contains("404"), "stderr={stderr}");

    let _ = std::fs::remove_file(&db);
}

#[test]
fn duplicate_create_maps_to_409() {
    let db = temp_db_path();

    let first = lapt_output(&db, &["lap", "create", "--name", "Lap 1"]);
    assert!(first.status.success(), "{}", stderr_text(&first));

    let second = lapt_output(&db, &["lap", "create", "--name", "Lap 1"]);
    assert!(!second.status.success());
    let stderr = stderr_text(&second);
    assert!(stderr.contains("already exists"), "stderr={stderr}");
    assert!(stderr.contains("409"), "stderr={stderr}");

    let _ = std::fs::remove_file(&db);
}

#[test]
fn submit_creates_the_lap_the_register_path_would_reject() {
    let db = temp_db_path();

    let submitted = lapt_output(
        &db,
        &["submit", "--lap", "Streamed Lap", "--reading", "speed=120"],
    );
    assert!(submitted.status.success(), "{}", stderr_text(&submitted));
    assert_eq!(stdout_json(&submitted)["submitted"], Value::from(true));

    let all = lapt_output(&db, &["params", "all", "--lap", "Streamed Lap"]);
    assert!(all.status.success(), "{}", stderr_text(&all));
    assert_eq!(stdout_json(&all).as_array().map(Vec::len), Some(1));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn submit_accepts_the_wire_message_shape() {
    let db = temp_db_path();

    let submitted = lapt_output(
        &db,
        &[
            "submit",
            "--json",
            r#"{"lapName":"Wire Lap","parameters":{"temp":"75"}}"#,
        ],
    );
    assert!(submitted.status.success(), "{}", stderr_text(&submitted));

    let speed = lapt_output(&db, &["params", "get", "--lap", "Wire Lap", "--key", "temp"]);
    assert!(speed.status.success(), "{}", stderr_text(&speed));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn malformed_submissions_are_dropped_not_failed() {
    let db = temp_db_path();

    let submitted = lapt_output(&db, &["submit", "--json", "not json at all"]);
    assert!(submitted.status.success(), "{}", stderr_text(&submitted));
    assert_eq!(stdout_json(&submitted)["submitted"], Value::from(false));

    let incomplete = lapt_output(&db, &["submit", "--json", r#"{"parameters":{"x":"1"}}"#]);
    assert!(incomplete.status.success(), "{}", stderr_text(&incomplete));

    let laps = lapt_output(&db, &["lap", "list"]);
    assert_eq!(stdout_json(&laps).as_array().map(Vec::len), Some(0));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn empty_lap_reports_no_parameters() {
    let db = temp_db_path();

    let created = lapt_output(&db, &["lap", "create", "--name", "Lap 1"]);
    assert!(created.status.success(), "{}", stderr_text(&created));

    let all = lapt_output(&db, &["params", "all", "--lap", "Lap 1"]);
    assert!(!all.status.success());
    let stderr = stderr_text(&all);
    assert!(stderr.contains("no parameters"), "stderr={stderr}");

    let _ = std::fs::remove_file(&db);
}

#[test]
fn sweep_removes_laps_past_the_retention_window() {
    let db = temp_db_path();

    let old = lapt_output(&db, &["lap", "create", "--name", "Old Lap"]);
    assert!(old.status.success(), "{}", stderr_text(&old));
    let fresh = lapt_output(&db, &["lap", "create", "--name", "Fresh Lap"]);
    assert!(fresh.status.success(), "{}", stderr_text(&fresh));

    backdate_lap_by_days(&db, "Old Lap", 11);
    backdate_lap_by_days(&db, "Fresh Lap", 9);

    let swept = lapt_output(&db, &["sweep"]);
    assert!(swept.status.success(), "{}", stderr_text(&swept));
    let report = stdout_json(&swept);
    assert_eq!(report["examined"], Value::from(1));
    assert_eq!(report["swept"], Value::from(1));
    assert_eq!(report["failed"], Value::from(0));

    let laps = lapt_output(&db, &["lap", "list"]);
    let names: Vec<String> = match stdout_json(&laps).as_array() {
        Some(items) => items
            .iter()
            .map(|item| item["name"].as_str().unwrap_or_default().to_string())
            .collect(),
        None => panic!("expected lap list array"),
    };
    assert_eq!(names, vec!["Fresh Lap".to_string()]);

    let _ = std::fs::remove_file(&db);
}
