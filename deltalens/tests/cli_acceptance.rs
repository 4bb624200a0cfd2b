use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// 2024-01-08T00:00:00Z, the later fixture week.
const START: i64 = 1_704_672_000;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    job_path: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        let job_path = base.join("job.json");
        write_job(&job_path);

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
            job_path,
        }
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.xdg_data.join("deltalens/snapshots")
    }
}

fn records_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../deltalens-core/tests/fixtures/records")
}

fn write_job(path: &PathBuf) {
    let job = serde_json::json!({
        "project_id": 7,
        "start": START,
        "end": START + 604_799,
        "k": 10,
        "units": [
            {
                "query_id": 1,
                "kind": "event",
                "query": {
                    "base": {"op": "And", "events": [{"en": "$session"}]},
                    "target": {"op": "And", "events": [{"en": "$form_submitted"}]}
                }
            },
            {
                "query_id": 2,
                "kind": "kpi",
                "query": {"cl": "kpi", "qG": [{"ca": "events", "dc": "website_session", "me": ["total_sessions", "bounce_rate"]}]}
            }
        ]
    });
    let body = serde_json::to_vec_pretty(&job).expect("job json");
    fs::write(path, body).expect("failed to write job");
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "deltalens-analyze" => PathBuf::from(assert_cmd::cargo::cargo_bin!("deltalens-analyze")),
        "deltalens-report" => PathBuf::from(assert_cmd::cargo::cargo_bin!("deltalens-report")),
        _ => panic!("unsupported binary in test harness: {bin_name}"),
    };

    let mut command = Command::new(bin_path);

    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {bin_name}: {e}"))
}

fn assert_success(bin_name: &str, args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "{bin_name} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

#[test]
fn list_metrics_prints_registry() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, "deltalens-analyze", &["--list-metrics"]);
    assert_success("deltalens-analyze", &["--list-metrics"], &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("website_session:"));
    assert!(stdout.contains("bounce_rate"));
    assert!(stdout.contains("all_channels_metrics:"));

    let args = ["--list-metrics", "--category", "linkedin_metrics", "--format", "json"];
    let output = run_bin(&env, "deltalens-analyze", &args);
    assert_success("deltalens-analyze", &args, &output);
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    let listed = listed.as_array().expect("array of metrics");
    assert!(!listed.is_empty());
    assert!(listed.iter().all(|m| m["category"] == "linkedin_metrics"));
}

#[test]
fn analyze_then_report_round_trip() {
    let env = CliTestEnv::new();
    let job = env.job_path.to_string_lossy().into_owned();
    let data_dir = records_root().to_string_lossy().into_owned();

    let args = [
        "--job", job.as_str(), "--data-dir", data_dir.as_str(), "--jobs", "2", "--format", "json",
    ];
    let output = run_bin(&env, "deltalens-analyze", &args);
    assert_success("deltalens-analyze", &args, &output);

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json summary");
    let units = summary["units"].as_array().expect("units");
    assert_eq!(units.len(), 2);
    assert!(units.iter().all(|u| u["status"] == "success"), "{summary}");
    assert!(env.snapshot_dir().join("7/20240108/1-k10.cpi.json").exists());
    assert!(env.snapshot_dir().join("7/20240101/2-k10.wpi.json").exists());

    let args = ["7", "20240108", "1", "-k", "10"];
    let output = run_bin(&env, "deltalens-report", &args);
    assert_success("deltalens-report", &args, &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Base:       4.00 -> 6.00 (+50.0%)"), "{stdout}");

    let args = ["7", "20240108", "2", "-k", "10", "--kpi"];
    let output = run_bin(&env, "deltalens-report", &args);
    assert_success("deltalens-report", &args, &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("website_session/total_sessions: 4.00 -> 6.00"), "{stdout}");
}

#[test]
fn report_fails_without_snapshot() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, "deltalens-report", &["7", "20240108", "42"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("snapshot not found"), "{stderr}");
}

#[test]
fn analyze_rejects_future_window() {
    let env = CliTestEnv::new();
    let path = env.home.join("future.json");
    fs::write(
        &path,
        r#"{"project_id": 7, "start": 4102444800, "end": 4103049599, "units": []}"#,
    )
    .expect("failed to write job");
    let job = path.to_string_lossy().into_owned();

    let output = run_bin(&env, "deltalens-analyze", &["--job", job.as_str()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid job window"), "{stderr}");
}
