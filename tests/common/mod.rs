#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

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
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_vic") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "vic.exe" } else { "vic" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve vic binary path for integration test"),
    }
}

fn cli_command(args: &[&str], env: &[(&str, &str)]) -> Command {
    let mut command = Command::new(resolve_bin_path());
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env("VIC_OUTPUT_FORMAT", "json")
        .env("NO_COLOR", "1");
    for (key, value) in env {
        command.env(key, value);
    }
    command
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run `vic`, capture its output and keep a per-case log in the temp dir.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let output = cli_command(args, env).output().expect("execute vic command");
    record_case(case_name, args, output.status, &output.stdout, &output.stderr)
}

/// Start `vic` without waiting for it.
pub fn spawn_cli(args: &[&str], env: &[(&str, &str)]) -> Child {
    cli_command(args, env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn vic command")
}

pub fn finish_cli_case(case_name: &str, args: &[&str], child: Child) -> CmdResult {
    let output = child.wait_with_output().expect("wait for vic command");
    record_case(case_name, args, output.status, &output.stdout, &output.stderr)
}

fn record_case(
    case_name: &str,
    args: &[&str],
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> CmdResult {
    let root = std::env::temp_dir().join("vic-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");
    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));

    let stdout = String::from_utf8_lossy(stdout).to_string();
    let stderr = String::from_utf8_lossy(stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={status}\n"));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status,
        stdout,
        stderr,
        log_path,
    }
}

/// Stand-in for ffprobe/ffmpeg, keyed on the input file name:
///
/// - `*hang*`  records its pid, then sleeps for 30s
/// - `*fork*`  starts a sleeping grandchild, records both pids, then waits
/// - `*bad*`   prints a decoder error and exits 1
/// - `*noisy*` prints a container error but exits 0
/// - anything else exits 0 silently
///
/// Every invocation appends its input path to `calls_file`.
pub struct FakeTool {
    pub program: PathBuf,
    pub pid_file: PathBuf,
    pub calls_file: PathBuf,
}

impl FakeTool {
    pub fn install(dir: &Path) -> Self {
        let program = dir.join("fake-analyzer.sh");
        let pid_file = dir.join("analyzer.pids");
        let calls_file = dir.join("analyzer.calls");
        let script = format!(
            r#"#!/bin/sh
for input; do :; done
echo "$input" >> '{calls}'
case "$(basename "$input")" in
  *hang*)
    echo $$ >> '{pids}'
    exec sleep 30
    ;;
  *fork*)
    sleep 30 &
    echo $! >> '{pids}'
    echo $$ >> '{pids}'
    wait
    ;;
  *bad*)
    echo "[h264 @ 0x55d1c2] Invalid NAL unit size (41213 > 2231)." >&2
    echo "[h264 @ 0x55d1c2] error while decoding MB 12 30" >&2
    exit 1
    ;;
  *noisy*)
    echo "[mov,mp4,m4a @ 0x7f] moov atom not found" >&2
    exit 0
    ;;
  *)
    exit 0
    ;;
esac
"#,
            pids = pid_file.display(),
            calls = calls_file.display(),
        );
        fs::write(&program, script).expect("write fake analyzer");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&program, fs::Permissions::from_mode(0o755))
                .expect("chmod fake analyzer");
        }
        Self {
            program,
            pid_file,
            calls_file,
        }
    }

    /// Input paths the tool was invoked on, in call order.
    pub fn recorded_calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls_file)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn recorded_pids(&self) -> Vec<u32> {
        fs::read_to_string(&self.pid_file)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    /// Block until at least `count` pids were recorded.
    pub fn wait_for_pids(&self, count: usize, timeout: Duration) -> Vec<u32> {
        let deadline = Instant::now() + timeout;
        loop {
            let pids = self.recorded_pids();
            if pids.len() >= count || Instant::now() >= deadline {
                return pids;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Write a small placeholder file per name under `dir`.
pub fn media_library(dir: &Path, names: &[&str]) {
    for name in names {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create media subdir");
        }
        fs::write(&path, b"\x00\x00\x00\x18ftypmp42").expect("write media file");
    }
}

/// Whether `pid` is a live, non-zombie process.
#[cfg(target_os = "linux")]
pub fn pid_running(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state field follows the parenthesised command name.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state != "Z" && state != "X")
}

/// Wait for every pid to disappear.
#[cfg(target_os = "linux")]
pub fn wait_until_gone(pids: &[u32], timeout: Duration) -> Vec<u32> {
    let deadline = Instant::now() + timeout;
    loop {
        let alive: Vec<u32> = pids.iter().copied().filter(|pid| pid_running(*pid)).collect();
        if alive.is_empty() || Instant::now() >= deadline {
            return alive;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Config file pointing every path and tool at `dir`.
pub fn write_config(dir: &Path, tool: &FakeTool, extra_scan: &str) -> PathBuf {
    let program = tool.program.display();
    let config = format!(
        r#"[scan]
max_workers = 2
quick_timeout_seconds = 2
deep_timeout_seconds = 4
shutdown_grace_seconds = 0
{extra_scan}

[tool]
quick_program = "{program}"
quick_args = ["{{input}}"]
deep_program = "{program}"
deep_args = ["--deep", "{{input}}"]

[paths]
history_db = "{history}"
activity_log = "{activity}"
"#,
        history = dir.join("history.sqlite3").display(),
        activity = dir.join("activity.jsonl").display(),
    );
    let path = dir.join("vic.toml");
    fs::write(&path, config).expect("write config");
    path
}
