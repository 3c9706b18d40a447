#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_smartbin") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "smartbin.exe"
    } else {
        "smartbin"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve smartbin binary path for integration test"),
    }
}

/// Scratch paths for one case: database, activity log and a config file
/// with the actuator disabled.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
    pub config: PathBuf,
    pub database: PathBuf,
    pub activity_log: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create sandbox dir");
        let database = dir.path().join("waste_items.sqlite3");
        let activity_log = dir.path().join("activity.jsonl");
        let config = dir.path().join("config.toml");
        let toml = format!(
            "[actuator]\nenabled = false\nsort_duration_ms = 0\nsettle_ms = 0\n\n\
             [paths]\ndatabase = {:?}\nactivity_log = {:?}\n",
            database.display().to_string(),
            activity_log.display().to_string(),
        );
        fs::write(&config, toml).expect("write sandbox config");
        Self {
            dir,
            config,
            database,
            activity_log,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run the binary against this sandbox's config.
    pub fn run(&self, case_name: &str, args: &[&str]) -> CmdResult {
        self.run_with_input(case_name, args, None)
    }

    pub fn run_with_input(&self, case_name: &str, args: &[&str], stdin: Option<&str>) -> CmdResult {
        let config = self.config.to_string_lossy().to_string();
        let mut full: Vec<&str> = vec!["--config", &config];
        full.extend_from_slice(args);
        run_cli_case_with_input(case_name, &full, stdin)
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_input(case_name, args, None)
}

pub fn run_cli_case_with_input(case_name: &str, args: &[&str], stdin: Option<&str>) -> CmdResult {
    use std::io::Write;
    use std::process::Stdio;

    let root = std::env::temp_dir().join("smartbin-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut child = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("SMARTBIN_OUTPUT_FORMAT")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("execute smartbin command");
    {
        let mut child_stdin = child.stdin.take().expect("child stdin");
        if let Some(input) = stdin {
            child_stdin
                .write_all(input.as_bytes())
                .expect("write child stdin");
        }
    }
    let output = child.wait_with_output().expect("wait for smartbin");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
