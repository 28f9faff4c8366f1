//! Scan modes and the per-file pass plan.
//!
//! A mode is a closed set: `Quick` runs the fast probe, `Deep` runs the full
//! decode, and `Hybrid` runs the probe and escalates to a full decode when the
//! probe does not come back healthy.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::VicError;
use crate::scanner::cancel::CancelToken;
use crate::scanner::invoker::{Analyzer, PassParameters};
use crate::scanner::model::{ScanOutcome, ScanTask, VideoFile};

/// How thoroughly a file is analysed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Quick,
    Deep,
    Hybrid,
}

/// One invocation of the analysis tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Quick,
    Deep,
}

impl ScanMode {
    pub const ALL: [Self; 3] = [Self::Quick, Self::Deep, Self::Hybrid];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Deep => "deep",
            Self::Hybrid => "hybrid",
        }
    }

    /// Passes this mode may run, in order. The second hybrid pass only runs
    /// on escalation.
    pub const fn passes(self) -> &'static [Pass] {
        match self {
            Self::Quick => &[Pass::Quick],
            Self::Deep => &[Pass::Deep],
            Self::Hybrid => &[Pass::Quick, Pass::Deep],
        }
    }

    /// Whether the outcome of the first pass sends the file to a deep pass.
    pub const fn needs_escalation(self, outcome: &ScanOutcome) -> bool {
        matches!(self, Self::Hybrid) && !outcome.is_healthy()
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = VicError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VicError::InvalidConfig {
                details: format!("unknown scan mode {raw:?} (expected quick, deep or hybrid)"),
            })
    }
}

/// Default mode plus per-extension overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeSelector {
    default: ScanMode,
    overrides: BTreeMap<String, ScanMode>,
}

impl ModeSelector {
    pub fn new(default: ScanMode) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Keys are extensions without the dot; matched case-insensitively.
    #[must_use]
    pub fn with_overrides(mut self, overrides: BTreeMap<String, ScanMode>) -> Self {
        self.overrides = overrides
            .into_iter()
            .map(|(ext, mode)| (crate::core::config::normalize_extension(&ext), mode))
            .collect();
        self
    }

    pub const fn default_mode(&self) -> ScanMode {
        self.default
    }

    pub fn select(&self, file: &VideoFile) -> ScanMode {
        file.extension()
            .and_then(|ext| self.overrides.get(&ext).copied())
            .unwrap_or(self.default)
    }
}

/// Command lines for the two passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProfile {
    pub quick: PassParameters,
    pub deep: PassParameters,
}

impl ToolProfile {
    pub const fn params(&self, pass: Pass) -> &PassParameters {
        match pass {
            Pass::Quick => &self.quick,
            Pass::Deep => &self.deep,
        }
    }
}

/// Result of running a task's full pass plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    pub outcome: ScanOutcome,
    /// Quick outcome that triggered a deep pass.
    pub preliminary: Option<ScanOutcome>,
    /// Wall time across every pass.
    pub elapsed: Duration,
    pub passes_run: Vec<Pass>,
    /// The last pass was cut short by a kill, so `outcome` is not a verdict.
    pub interrupted: bool,
}

/// Run the task's pass plan against `analyzer`.
///
/// The deep pass of a hybrid scan is skipped when a kill has been requested;
/// the quick outcome then stands as final. An analyzer torn down by a kill
/// reports `ExecutionError`, which marks the strategy as interrupted.
pub fn run_strategy(
    task: &ScanTask,
    profile: &ToolProfile,
    analyzer: &dyn Analyzer,
    cancel: &CancelToken,
) -> StrategyOutcome {
    let started = Instant::now();
    let plan = task.mode.passes();
    let first = plan[0];

    let run_pass = |pass: Pass| {
        analyzer.run(
            &task.file.path,
            profile.params(pass),
            task.timeouts.for_pass(pass),
            cancel,
        )
    };

    let outcome = run_pass(first);
    let mut passes_run = vec![first];

    let escalate = task.mode.needs_escalation(&outcome) && !cancel.should_kill();
    let (outcome, preliminary) = match plan.get(1) {
        Some(&second) if escalate => {
            tracing::debug!(
                path = %task.file.path.display(),
                quick = %outcome.kind(),
                "escalating to deep pass"
            );
            passes_run.push(second);
            (run_pass(second), Some(outcome))
        }
        _ => (outcome, None),
    };
    let interrupted =
        matches!(outcome, ScanOutcome::ExecutionError { .. }) && cancel.should_kill();

    StrategyOutcome {
        outcome,
        preliminary,
        elapsed: started.elapsed(),
        passes_run,
        interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::model::{ModeTimeouts, OutcomeKind};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::time::SystemTime;

    /// Returns scripted outcomes keyed by program name and records each call.
    struct ScriptedAnalyzer {
        quick: ScanOutcome,
        deep: ScanOutcome,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedAnalyzer {
        fn new(quick: ScanOutcome, deep: ScanOutcome) -> Self {
            Self {
                quick,
                deep,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Analyzer for ScriptedAnalyzer {
        fn run(
            &self,
            _path: &Path,
            params: &PassParameters,
            _timeout: Duration,
            _cancel: &CancelToken,
        ) -> ScanOutcome {
            self.calls.lock().push(params.program.clone());
            if params.program == Path::new("probe") {
                self.quick.clone()
            } else {
                self.deep.clone()
            }
        }
    }

    fn profile() -> ToolProfile {
        ToolProfile {
            quick: PassParameters::new("probe", Vec::new()),
            deep: PassParameters::new("decode", Vec::new()),
        }
    }

    fn task(mode: ScanMode) -> ScanTask {
        ScanTask {
            file: VideoFile {
                path: PathBuf::from("/media/clip.mkv"),
                size_bytes: 1,
                modified: SystemTime::UNIX_EPOCH,
            },
            mode,
            timeouts: ModeTimeouts::default(),
            sequence: 0,
        }
    }

    fn corrupt(line: &str) -> ScanOutcome {
        ScanOutcome::Corrupt {
            diagnostics: vec![line.to_string()],
        }
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("HYBRID".parse::<ScanMode>().unwrap(), ScanMode::Hybrid);
        assert_eq!(" deep ".parse::<ScanMode>().unwrap(), ScanMode::Deep);
        assert!("thorough".parse::<ScanMode>().is_err());
    }

    #[test]
    fn only_hybrid_escalates() {
        let bad = corrupt("x");
        assert!(ScanMode::Hybrid.needs_escalation(&bad));
        assert!(ScanMode::Hybrid.needs_escalation(&ScanOutcome::TimedOut));
        assert!(!ScanMode::Hybrid.needs_escalation(&ScanOutcome::Healthy));
        assert!(!ScanMode::Quick.needs_escalation(&bad));
        assert!(!ScanMode::Deep.needs_escalation(&bad));
    }

    #[test]
    fn quick_mode_runs_one_quick_pass() {
        let analyzer = ScriptedAnalyzer::new(corrupt("q"), ScanOutcome::Healthy);
        let result = run_strategy(&task(ScanMode::Quick), &profile(), &analyzer, &CancelToken::new());
        assert_eq!(result.outcome.kind(), OutcomeKind::Corrupt);
        assert_eq!(result.passes_run, vec![Pass::Quick]);
        assert!(result.preliminary.is_none());
    }

    #[test]
    fn deep_mode_runs_one_deep_pass() {
        let analyzer = ScriptedAnalyzer::new(ScanOutcome::Healthy, corrupt("d"));
        let result = run_strategy(&task(ScanMode::Deep), &profile(), &analyzer, &CancelToken::new());
        assert_eq!(result.outcome, corrupt("d"));
        assert_eq!(*analyzer.calls.lock(), vec![PathBuf::from("decode")]);
    }

    #[test]
    fn hybrid_healthy_probe_is_final() {
        let analyzer = ScriptedAnalyzer::new(ScanOutcome::Healthy, corrupt("never"));
        let result = run_strategy(&task(ScanMode::Hybrid), &profile(), &analyzer, &CancelToken::new());
        assert_eq!(result.outcome, ScanOutcome::Healthy);
        assert_eq!(result.passes_run, vec![Pass::Quick]);
    }

    #[test]
    fn hybrid_escalates_every_unhealthy_probe_once() {
        let probes = [
            corrupt("probe says corrupt"),
            ScanOutcome::TimedOut,
            ScanOutcome::ExecutionError {
                message: "crash".to_string(),
            },
        ];
        for probe in probes {
            let analyzer = ScriptedAnalyzer::new(probe.clone(), ScanOutcome::Healthy);
            let result =
                run_strategy(&task(ScanMode::Hybrid), &profile(), &analyzer, &CancelToken::new());
            assert_eq!(result.outcome, ScanOutcome::Healthy, "deep result is final");
            assert_eq!(result.preliminary, Some(probe));
            assert_eq!(result.passes_run, vec![Pass::Quick, Pass::Deep]);
            assert_eq!(analyzer.calls.lock().len(), 2);
        }
    }

    #[test]
    fn hybrid_skips_deep_pass_after_kill() {
        let analyzer = ScriptedAnalyzer::new(ScanOutcome::TimedOut, ScanOutcome::Healthy);
        let cancel = CancelToken::new();
        cancel.kill();
        let result = run_strategy(&task(ScanMode::Hybrid), &profile(), &analyzer, &cancel);
        assert_eq!(result.outcome, ScanOutcome::TimedOut);
        assert_eq!(result.passes_run, vec![Pass::Quick]);
        assert!(!result.interrupted, "a finished quick pass is a verdict");
    }

    #[test]
    fn hybrid_second_timeout_is_final() {
        let analyzer = ScriptedAnalyzer::new(ScanOutcome::TimedOut, ScanOutcome::TimedOut);
        let result = run_strategy(&task(ScanMode::Hybrid), &profile(), &analyzer, &CancelToken::new());
        assert_eq!(result.outcome, ScanOutcome::TimedOut);
        assert_eq!(result.preliminary, Some(ScanOutcome::TimedOut));
        assert_eq!(result.passes_run, vec![Pass::Quick, Pass::Deep]);
        assert_eq!(analyzer.calls.lock().len(), 2);
    }

    #[test]
    fn execution_error_under_kill_is_interrupted() {
        let aborted = ScanOutcome::ExecutionError {
            message: "analysis cancelled".to_string(),
        };
        let analyzer = ScriptedAnalyzer::new(aborted.clone(), ScanOutcome::Healthy);
        let cancel = CancelToken::new();
        cancel.kill();
        let result = run_strategy(&task(ScanMode::Hybrid), &profile(), &analyzer, &cancel);
        assert_eq!(result.outcome, aborted);
        assert!(result.interrupted);
        assert_eq!(analyzer.calls.lock().len(), 1);

        let uncancelled =
            run_strategy(&task(ScanMode::Quick), &profile(), &analyzer, &CancelToken::new());
        assert!(!uncancelled.interrupted);
    }

    #[test]
    fn selector_prefers_extension_override() {
        let mut overrides = BTreeMap::new();
        overrides.insert(".TS".to_string(), ScanMode::Deep);
        let selector = ModeSelector::new(ScanMode::Quick).with_overrides(overrides);

        let mut file = task(ScanMode::Quick).file;
        assert_eq!(selector.select(&file), ScanMode::Quick);
        file.path = PathBuf::from("/media/broadcast.Ts");
        assert_eq!(selector.select(&file), ScanMode::Deep);
    }
}
