//! Analysis tool invocation: one subprocess per call, one outcome per call.
//!
//! Every failure mode of the external tool (missing binary, crash, hang,
//! garbage output) is folded into a [`ScanOutcome`] here. Nothing past this
//! boundary has to know that a subprocess was involved.

#![allow(missing_docs)]

use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use regex::{RegexSet, RegexSetBuilder};

use crate::core::errors::{Result, VicError};
use crate::platform::process::{isolate_process_group, terminate_and_reap};
use crate::scanner::cancel::CancelToken;
use crate::scanner::model::ScanOutcome;

/// Placeholder replaced with the file path in tool arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const READER_GRACE: Duration = Duration::from_secs(2);
/// Lines longer than this are cut before marker matching.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Runs one analysis pass over one file.
///
/// Implementations must return exactly one outcome and must not leave any
/// process running when they return.
pub trait Analyzer: Send + Sync {
    fn run(
        &self,
        path: &Path,
        params: &PassParameters,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> ScanOutcome;
}

/// Program and argument template for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassParameters {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PassParameters {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Arguments with `{input}` replaced by `path`. The path is appended when
    /// no argument mentions the placeholder.
    pub fn arguments_for(&self, path: &Path) -> Vec<OsString> {
        let mut substituted = false;
        let mut argv: Vec<OsString> = self
            .args
            .iter()
            .map(|arg| {
                if arg == INPUT_PLACEHOLDER {
                    substituted = true;
                    path.as_os_str().to_os_string()
                } else if arg.contains(INPUT_PLACEHOLDER) {
                    substituted = true;
                    OsString::from(arg.replace(INPUT_PLACEHOLDER, &path.to_string_lossy()))
                } else {
                    OsString::from(arg)
                }
            })
            .collect();
        if !substituted {
            argv.push(path.as_os_str().to_os_string());
        }
        argv
    }
}

/// Regexes that flag a diagnostic line as evidence of corruption.
#[derive(Debug, Clone)]
pub struct ErrorMarkers {
    set: RegexSet,
}

impl ErrorMarkers {
    /// Markers for ffmpeg/ffprobe output at `-v error`.
    pub const DEFAULT_PATTERNS: &'static [&'static str] = &[
        r"invalid data found when processing input",
        r"moov atom not found",
        r"error while decoding",
        r"decode_slice_header error",
        r"\bcorrupt",
        r"concealing \d+ .*errors",
        r"invalid nal unit",
        r"non-existing pps",
        r"header missing",
        r"missing picture in access unit",
        r"could not find codec parameters",
        r"invalid frame dimensions",
        r"error reading header",
        r"truncat",
        r"partial file",
        r"end of file",
    ];

    /// Compile case-insensitive markers. An empty list matches nothing.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let set = RegexSetBuilder::new(patterns.iter().map(AsRef::as_ref))
            .case_insensitive(true)
            .build()
            .map_err(|error| VicError::InvalidConfig {
                details: format!("tool.error_patterns: {error}"),
            })?;
        Ok(Self { set })
    }

    pub fn ffmpeg_defaults() -> Result<Self> {
        Self::new(Self::DEFAULT_PATTERNS)
    }

    pub fn matches(&self, line: &str) -> bool {
        self.set.is_match(line)
    }
}

/// What the stderr reader collected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DiagnosticCapture {
    lines: Vec<String>,
    stored_bytes: usize,
    marker_hits: usize,
    truncated: bool,
}

impl DiagnosticCapture {
    fn push_line(&mut self, raw: &[u8], markers: &ErrorMarkers, limit: usize) {
        let cut = &raw[..raw.len().min(MAX_LINE_BYTES)];
        let decoded = String::from_utf8_lossy(cut);
        let line = decoded.trim_end();
        if line.trim().is_empty() {
            return;
        }
        if markers.matches(line) {
            self.marker_hits += 1;
        }
        if !self.truncated && self.stored_bytes + line.len() <= limit {
            self.stored_bytes += line.len();
            self.lines.push(line.to_string());
        } else {
            self.truncated = true;
        }
    }
}

/// Drain `reader` to EOF, keeping at most `limit` bytes of lines but checking
/// every line for markers.
fn capture_diagnostics<R: Read>(mut reader: R, markers: &ErrorMarkers, limit: usize) -> DiagnosticCapture {
    let mut capture = DiagnosticCapture::default();
    let mut chunk = [0_u8; 8192];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        pending.extend_from_slice(&chunk[..read]);

        let mut start = 0;
        for newline in memchr::memchr_iter(b'\n', &pending) {
            capture.push_line(&pending[start..newline], markers, limit);
            start = newline + 1;
        }
        pending.drain(..start);

        if pending.len() > MAX_LINE_BYTES {
            capture.push_line(&pending, markers, limit);
            pending.clear();
        }
    }
    if !pending.is_empty() {
        capture.push_line(&pending, markers, limit);
    }
    capture
}

/// Map an exit status plus captured diagnostics onto an outcome.
fn classify(status: ExitStatus, capture: DiagnosticCapture, limit: usize) -> ScanOutcome {
    if status.success() && capture.marker_hits == 0 {
        return ScanOutcome::Healthy;
    }

    let mut diagnostics = capture.lines;
    if diagnostics.is_empty() {
        diagnostics.push(describe_status(status));
    }
    if capture.truncated {
        diagnostics.push(format!("[diagnostics truncated after {limit} bytes]"));
    }
    ScanOutcome::Corrupt { diagnostics }
}

fn describe_status(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("analysis tool terminated by signal {signal}");
        }
    }
    match status.code() {
        Some(code) => format!("analysis tool exited with status {code}"),
        None => "analysis tool exited abnormally".to_string(),
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    Failed(std::io::Error),
}

/// A timeout too large to represent as an `Instant` means no deadline.
fn wait_with_deadline(child: &mut Child, timeout: Duration, cancel: &CancelToken) -> WaitOutcome {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => {}
            Err(error) => return WaitOutcome::Failed(error),
        }
        if cancel.should_kill() {
            return WaitOutcome::Cancelled;
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                WAIT_POLL_INTERVAL.min(deadline - now)
            }
            None => WAIT_POLL_INTERVAL,
        };
        thread::sleep(pause);
    }
}

/// Runs the configured tool as a subprocess.
#[derive(Debug, Clone)]
pub struct ProcessAnalyzer {
    markers: ErrorMarkers,
    max_diagnostic_bytes: usize,
}

impl ProcessAnalyzer {
    pub fn new(markers: ErrorMarkers, max_diagnostic_bytes: usize) -> Self {
        Self {
            markers,
            max_diagnostic_bytes: max_diagnostic_bytes.max(1),
        }
    }

    fn spawn(&self, path: &Path, params: &PassParameters) -> std::io::Result<Child> {
        let mut command = Command::new(&params.program);
        command
            .args(params.arguments_for(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        isolate_process_group(&mut command);
        command.spawn()
    }
}

impl Analyzer for ProcessAnalyzer {
    fn run(
        &self,
        path: &Path,
        params: &PassParameters,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> ScanOutcome {
        let mut child = match self.spawn(path, params) {
            Ok(child) => child,
            Err(error) => {
                let error = VicError::Invocation {
                    path: path.to_path_buf(),
                    details: format!("failed to start {}: {error}", params.program.display()),
                };
                return ScanOutcome::ExecutionError {
                    message: error.to_string(),
                };
            }
        };

        let Some(stderr) = child.stderr.take() else {
            terminate_and_reap(&mut child);
            return ScanOutcome::ExecutionError {
                message: "analysis tool stderr was not captured".to_string(),
            };
        };

        let (capture_tx, capture_rx) = channel::bounded::<DiagnosticCapture>(1);
        let markers = self.markers.clone();
        let limit = self.max_diagnostic_bytes;
        let reader = thread::Builder::new()
            .name("vic-stderr".to_string())
            .spawn(move || {
                let capture = capture_diagnostics(stderr, &markers, limit);
                let _ = capture_tx.send(capture);
            });
        if let Err(error) = reader {
            terminate_and_reap(&mut child);
            return ScanOutcome::ExecutionError {
                message: format!("failed to start diagnostic reader: {error}"),
            };
        }

        tracing::trace!(pid = child.id(), path = %path.display(), "analysis started");

        match wait_with_deadline(&mut child, timeout, cancel) {
            WaitOutcome::Exited(status) => {
                let capture = match capture_rx.recv_timeout(READER_GRACE) {
                    Ok(capture) => capture,
                    Err(_) => {
                        // A descendant still holds stderr open.
                        terminate_and_reap(&mut child);
                        capture_rx.recv_timeout(READER_GRACE).unwrap_or_default()
                    }
                };
                classify(status, capture, limit)
            }
            WaitOutcome::TimedOut => {
                terminate_and_reap(&mut child);
                tracing::debug!(path = %path.display(), ?timeout, "analysis timed out");
                ScanOutcome::TimedOut
            }
            WaitOutcome::Cancelled => {
                terminate_and_reap(&mut child);
                ScanOutcome::ExecutionError {
                    message: "analysis cancelled".to_string(),
                }
            }
            WaitOutcome::Failed(error) => {
                terminate_and_reap(&mut child);
                ScanOutcome::ExecutionError {
                    message: format!("failed waiting for {}: {error}", params.program.display()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> ErrorMarkers {
        ErrorMarkers::ffmpeg_defaults().unwrap()
    }

    #[test]
    fn placeholder_is_substituted() {
        let params = PassParameters::new(
            "ffmpeg",
            vec!["-i".into(), "{input}".into(), "-f".into(), "null".into()],
        );
        let argv = params.arguments_for(Path::new("/media/a b.mkv"));
        assert_eq!(argv[1], OsString::from("/media/a b.mkv"));
        assert_eq!(argv.len(), 4);
    }

    #[test]
    fn embedded_placeholder_is_substituted() {
        let params = PassParameters::new("tool", vec!["file:{input}".into()]);
        let argv = params.arguments_for(Path::new("/m/x.mp4"));
        assert_eq!(argv, vec![OsString::from("file:/m/x.mp4")]);
    }

    #[test]
    fn path_appended_without_placeholder() {
        let params = PassParameters::new("ffprobe", vec!["-v".into(), "error".into()]);
        let argv = params.arguments_for(Path::new("/m/x.mp4"));
        assert_eq!(argv.last(), Some(&OsString::from("/m/x.mp4")));
        assert_eq!(argv.len(), 3);
    }

    #[test]
    fn markers_are_case_insensitive() {
        let markers = markers();
        assert!(markers.matches("[mov,mp4 @ 0x55] moov atom not found"));
        assert!(markers.matches("Invalid data found when processing input"));
        assert!(markers.matches("[h264 @ 0x1] Error while decoding MB 3 4"));
        assert!(!markers.matches("Stream #0:0: Video: h264, yuv420p"));
    }

    #[test]
    fn bad_marker_pattern_is_configuration_error() {
        let err = ErrorMarkers::new(&["[unclosed"]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn capture_counts_markers_beyond_limit() {
        let stream = "first line\nsecond line\nmoov atom not found\n";
        let capture = capture_diagnostics(stream.as_bytes(), &markers(), 12);
        assert_eq!(capture.lines, vec!["first line".to_string()]);
        assert!(capture.truncated);
        assert_eq!(capture.marker_hits, 1);
    }

    #[test]
    fn capture_stops_storing_after_first_overflow() {
        let stream = "ok\nthis line is far too long for the budget\nshort\n";
        let capture = capture_diagnostics(stream.as_bytes(), &markers(), 10);
        assert_eq!(capture.lines, vec!["ok".to_string()]);
        assert_eq!(capture.stored_bytes, 2);
        assert!(capture.truncated);
    }

    #[test]
    fn capture_keeps_unterminated_last_line() {
        let capture = capture_diagnostics("a\r\n\n  \nb".as_bytes(), &markers(), 1024);
        assert_eq!(capture.lines, vec!["a".to_string(), "b".to_string()]);
        assert!(!capture.truncated);
    }

    #[cfg(unix)]
    fn status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_with_informational_output_is_healthy() {
        let capture = DiagnosticCapture {
            lines: vec!["Stream #0:0: Video: h264".to_string()],
            stored_bytes: 24,
            marker_hits: 0,
            truncated: false,
        };
        assert_eq!(classify(status(0), capture, 64), ScanOutcome::Healthy);
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_with_marker_is_corrupt() {
        let capture = DiagnosticCapture {
            lines: vec!["error while decoding MB".to_string()],
            stored_bytes: 23,
            marker_hits: 1,
            truncated: false,
        };
        let outcome = classify(status(0), capture, 64);
        assert_eq!(outcome.diagnostics(), ["error while decoding MB".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn silent_failure_reports_exit_status() {
        let outcome = classify(status(1), DiagnosticCapture::default(), 64);
        assert_eq!(
            outcome.diagnostics(),
            ["analysis tool exited with status 1".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn signal_termination_is_corrupt() {
        use std::os::unix::process::ExitStatusExt;
        let outcome = classify(ExitStatus::from_raw(11), DiagnosticCapture::default(), 64);
        assert_eq!(
            outcome.diagnostics(),
            ["analysis tool terminated by signal 11".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn truncation_note_is_appended() {
        let capture = DiagnosticCapture {
            lines: vec!["x".to_string()],
            stored_bytes: 1,
            marker_hits: 1,
            truncated: true,
        };
        let outcome = classify(status(1), capture, 1);
        assert_eq!(
            outcome.diagnostics().last().map(String::as_str),
            Some("[diagnostics truncated after 1 bytes]")
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn shell(script: &str) -> PassParameters {
            PassParameters::new("sh", vec!["-c".into(), script.into(), "vic-test".into()])
        }

        fn analyzer() -> ProcessAnalyzer {
            ProcessAnalyzer::new(markers(), 4096)
        }

        fn run(params: &PassParameters, timeout: Duration) -> ScanOutcome {
            analyzer().run(Path::new("/dev/null"), params, timeout, &CancelToken::new())
        }

        #[test]
        fn zero_exit_is_healthy() {
            assert_eq!(run(&shell("exit 0"), Duration::from_secs(5)), ScanOutcome::Healthy);
        }

        #[test]
        fn stderr_diagnostics_are_captured() {
            let outcome = run(
                &shell("echo 'moov atom not found' >&2; exit 1"),
                Duration::from_secs(5),
            );
            assert_eq!(outcome.diagnostics(), ["moov atom not found".to_string()]);
        }

        #[test]
        fn input_path_reaches_the_tool() {
            let outcome = run(
                &shell("echo \"checked $1 error while decoding\" >&2"),
                Duration::from_secs(5),
            );
            assert_eq!(
                outcome.diagnostics(),
                ["checked /dev/null error while decoding".to_string()]
            );
        }

        #[test]
        fn unrepresentable_timeout_means_no_deadline() {
            let outcome = run(&shell("exit 0"), Duration::from_secs(u64::MAX));
            assert_eq!(outcome, ScanOutcome::Healthy);
        }

        #[test]
        fn hang_times_out() {
            let started = Instant::now();
            let outcome = run(&shell("exec sleep 30"), Duration::from_millis(200));
            assert_eq!(outcome, ScanOutcome::TimedOut);
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn missing_binary_is_execution_error() {
            let params = PassParameters::new("/nonexistent/vic/ffprobe", Vec::new());
            let outcome = run(&params, Duration::from_secs(5));
            assert!(
                matches!(outcome, ScanOutcome::ExecutionError { ref message } if message.contains("/nonexistent/vic/ffprobe")),
                "unexpected outcome: {outcome:?}"
            );
        }

        #[test]
        fn kill_interrupts_running_tool() {
            let cancel = CancelToken::new();
            cancel.kill();
            let outcome = analyzer().run(
                Path::new("/dev/null"),
                &shell("exec sleep 30"),
                Duration::from_secs(30),
                &cancel,
            );
            assert!(matches!(outcome, ScanOutcome::ExecutionError { .. }));
        }
    }
}
