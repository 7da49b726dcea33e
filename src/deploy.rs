//! Deployment workflow: pre-flight checks, per-script execution, summary.
//!
//! The orchestration is deliberately sequential. Pre-flight failures abort
//! the run before anything executes; per-script failures are tallied and the
//! remaining scripts still run, so one broken script does not block the rest.

use crate::config::DeployConfig;
use crate::discover;
use crate::exec::{self, CommandOutcome};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub(crate) const SECTION_RULE: &str =
    "================================================================================";

const INSTALL_HINT: &str =
    "install MongoDB Shell: https://www.mongodb.com/docs/mongodb-shell/install/";

/// Wall-clock bound for each kind of external invocation.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub version_check: Duration,
    pub ping: Duration,
    pub script: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            version_check: Duration::from_secs(10),
            ping: Duration::from_secs(30),
            script: Duration::from_secs(300),
        }
    }
}

/// Why one script failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The shell exited non-zero (or was killed by a signal, code `None`).
    NonZeroExit(Option<i32>),
    TimedOut,
    SpawnFailed(String),
}

/// Outcome of one script execution, folded into the run summary.
#[derive(Debug, Serialize)]
pub struct ScriptOutcome {
    pub script: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub duration_ms: u128,
}

/// Run-level tally logged and optionally written as JSON at the end.
#[derive(Debug, Serialize)]
pub struct DeploySummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub scripts: Vec<ScriptOutcome>,
}

impl DeploySummary {
    pub fn all_succeeded(&self) -> bool {
        self.total > 0 && self.failed == 0 && !self.interrupted && self.succeeded == self.total
    }
}

/// Drives the end-to-end deployment for one resolved configuration.
pub struct Deployer<'a> {
    config: &'a DeployConfig,
    timeouts: Timeouts,
    interrupt: Arc<AtomicBool>,
}

impl<'a> Deployer<'a> {
    pub fn new(config: &'a DeployConfig, interrupt: Arc<AtomicBool>) -> Self {
        Self::with_timeouts(config, interrupt, Timeouts::default())
    }

    pub fn with_timeouts(
        config: &'a DeployConfig,
        interrupt: Arc<AtomicBool>,
        timeouts: Timeouts,
    ) -> Self {
        Deployer {
            config,
            timeouts,
            interrupt,
        }
    }

    /// Confirm the shell tool is installed and answers a version query.
    pub fn check_mongosh(&self) -> bool {
        let resolved = match which::which(&self.config.mongosh_bin) {
            Ok(path) => path,
            Err(_) => {
                error!("{} is not installed or not in PATH", self.config.mongosh_bin);
                error!("{INSTALL_HINT}");
                return false;
            }
        };
        debug!("using shell at {}", resolved.display());

        let mut cmd = Command::new(&resolved);
        cmd.arg("--version");
        match exec::run_command(cmd, self.timeouts.version_check) {
            Ok(outcome) if outcome.success() => {
                info!("MongoDB Shell found: {}", outcome.stdout.trim());
                true
            }
            Ok(outcome) if outcome.timed_out => {
                error!(
                    "{} --version timed out after {} seconds",
                    self.config.mongosh_bin,
                    self.timeouts.version_check.as_secs()
                );
                false
            }
            Ok(_) => {
                error!(
                    "{} is installed but returned an error",
                    self.config.mongosh_bin
                );
                false
            }
            Err(err) if exec::is_not_found(&err) => {
                error!("{} is not installed or not in PATH", self.config.mongosh_bin);
                error!("{INSTALL_HINT}");
                false
            }
            Err(err) => {
                error!(
                    "error checking {} installation: {err:#}",
                    self.config.mongosh_bin
                );
                false
            }
        }
    }

    /// Fail-fast connectivity gate: ping the cluster before running anything.
    pub fn test_connection(&self) -> bool {
        info!("testing connection to MongoDB cluster...");
        let mut cmd = self.mongosh_command();
        cmd.arg("--eval").arg("db.adminCommand(\"ping\")");

        match exec::run_command(cmd, self.timeouts.ping) {
            Ok(outcome) if outcome.success() => {
                info!("successfully connected to MongoDB cluster");
                true
            }
            Ok(outcome) if outcome.timed_out => {
                error!(
                    "connection attempt timed out after {} seconds",
                    self.timeouts.ping.as_secs()
                );
                false
            }
            Ok(outcome) => {
                error!("failed to connect to MongoDB: {}", outcome.stderr.trim());
                false
            }
            Err(err) => {
                error!("unexpected error during connection test: {err:#}");
                false
            }
        }
    }

    /// Execute one script through the shell, logging its output.
    ///
    /// Never returns an error: timeouts, non-zero exits, and spawn failures
    /// all become a failed [`ScriptOutcome`] with a reason.
    pub fn execute_script(&self, script: &Path) -> ScriptOutcome {
        let name = discover::file_name(script);
        info!("{SECTION_RULE}");
        info!("executing: {name}");
        info!("{SECTION_RULE}");

        let mut cmd = self.mongosh_command();
        cmd.arg("--file").arg(script);
        debug!(
            "command: {}",
            exec::format_command_line(
                &self.config.mongosh_bin,
                &self.script_argv(script),
                Some(self.config.connection_string.expose()),
            )
        );

        let outcome = match exec::run_command(cmd, self.timeouts.script) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("unexpected error executing {name}: {err:#}");
                return ScriptOutcome {
                    script: name,
                    success: false,
                    failure: Some(FailureReason::SpawnFailed(format!("{err:#}"))),
                    duration_ms: 0,
                };
            }
        };

        log_script_output(&outcome);

        if outcome.timed_out {
            error!(
                "execution of {name} timed out after {} seconds",
                self.timeouts.script.as_secs()
            );
            return ScriptOutcome {
                script: name,
                success: false,
                failure: Some(FailureReason::TimedOut),
                duration_ms: outcome.duration.as_millis(),
            };
        }

        if outcome.success() {
            info!("successfully executed {name}");
            ScriptOutcome {
                script: name,
                success: true,
                failure: None,
                duration_ms: outcome.duration.as_millis(),
            }
        } else {
            error!(
                "failed to execute {name} (exit code: {})",
                match outcome.exit_code {
                    Some(code) => code.to_string(),
                    None => "killed by signal".to_string(),
                }
            );
            ScriptOutcome {
                script: name,
                success: false,
                failure: Some(FailureReason::NonZeroExit(outcome.exit_code)),
                duration_ms: outcome.duration.as_millis(),
            }
        }
    }

    /// Discover and execute every script, in file-name order.
    ///
    /// Individual failures do not stop the sequence; an interrupt does, and
    /// leaves the remaining scripts unattempted.
    pub fn deploy(&self) -> Result<DeploySummary> {
        let scripts = discover::find_js_files(&self.config.scripts_dir)?;
        if scripts.is_empty() {
            error!("no script files found to execute");
            return Ok(DeploySummary {
                total: 0,
                succeeded: 0,
                failed: 0,
                interrupted: false,
                scripts: Vec::new(),
            });
        }

        let mut outcomes = Vec::with_capacity(scripts.len());
        let mut interrupted = false;
        for script in &scripts {
            if self.interrupt.load(Ordering::SeqCst) {
                warn!("deployment interrupted; skipping remaining scripts");
                interrupted = true;
                break;
            }
            outcomes.push(self.execute_script(script));
        }

        let succeeded = outcomes.iter().filter(|outcome| outcome.success).count();
        let failed = outcomes.len() - succeeded;
        let summary = DeploySummary {
            total: scripts.len(),
            succeeded,
            failed,
            interrupted,
            scripts: outcomes,
        };

        info!("{SECTION_RULE}");
        info!("deployment summary:");
        info!("  total scripts: {}", summary.total);
        info!("  successful: {}", summary.succeeded);
        info!("  failed: {}", summary.failed);
        if summary.interrupted {
            warn!("  interrupted before completion");
        }
        info!("{SECTION_RULE}");

        Ok(summary)
    }

    fn mongosh_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.mongosh_bin);
        cmd.arg(self.config.connection_string.expose())
            .arg("--quiet")
            .args(&self.config.extra_args);
        cmd
    }

    fn script_argv(&self, script: &Path) -> Vec<String> {
        let mut argv = vec![
            self.config.connection_string.expose().to_string(),
            "--quiet".to_string(),
        ];
        argv.extend(self.config.extra_args.iter().cloned());
        argv.push("--file".to_string());
        argv.push(script.display().to_string());
        argv
    }
}

/// The shell may emit warnings on stderr even when it succeeds, so both
/// streams are logged regardless of the exit code.
fn log_script_output(outcome: &CommandOutcome) {
    let stdout_lines: Vec<&str> = outcome
        .stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if !stdout_lines.is_empty() {
        info!("script output:");
        for line in stdout_lines {
            info!("  {line}");
        }
    }

    let stderr_lines: Vec<&str> = outcome
        .stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if !stderr_lines.is_empty() {
        warn!("script errors/warnings:");
        for line in stderr_lines {
            warn!("  {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use std::fs;
    use std::path::PathBuf;

    fn test_config(mongosh_bin: String, scripts_dir: PathBuf) -> DeployConfig {
        DeployConfig {
            connection_string: Secret::new("mongodb://localhost:27017/test".to_string()),
            scripts_dir,
            mongosh_bin,
            extra_args: Vec::new(),
        }
    }

    fn no_interrupt() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[cfg(unix)]
    fn fake_mongosh(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-mongosh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake shell");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path.display().to_string()
    }

    fn write_script(dir: &Path, name: &str) {
        fs::write(dir.join(name), "db.test.createIndex({ a: 1 })\n").expect("write script");
    }

    #[test]
    fn check_mongosh_fails_when_tool_is_missing() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = test_config(
            "/nonexistent/definitely-not-mongosh".to_string(),
            temp.path().to_path_buf(),
        );
        let deployer = Deployer::new(&config, no_interrupt());
        assert!(!deployer.check_mongosh());
    }

    #[cfg(unix)]
    #[test]
    fn check_mongosh_reports_the_version_on_success() {
        let temp = tempfile::tempdir().expect("temp dir");
        let bin = fake_mongosh(temp.path(), "echo '2.3.0'; exit 0");
        let config = test_config(bin, temp.path().to_path_buf());
        let deployer = Deployer::new(&config, no_interrupt());
        assert!(deployer.check_mongosh());
    }

    #[cfg(unix)]
    #[test]
    fn check_mongosh_fails_on_nonzero_exit() {
        let temp = tempfile::tempdir().expect("temp dir");
        let bin = fake_mongosh(temp.path(), "exit 2");
        let config = test_config(bin, temp.path().to_path_buf());
        let deployer = Deployer::new(&config, no_interrupt());
        assert!(!deployer.check_mongosh());
    }

    #[cfg(unix)]
    #[test]
    fn test_connection_passes_through_exit_status() {
        let temp = tempfile::tempdir().expect("temp dir");
        let ok = fake_mongosh(temp.path(), "echo '{ ok: 1 }'; exit 0");
        let config = test_config(ok, temp.path().to_path_buf());
        let deployer = Deployer::new(&config, no_interrupt());
        assert!(deployer.test_connection());

        let bad = fake_mongosh(temp.path(), "echo 'MongoServerSelectionError' >&2; exit 1");
        let config = test_config(bad, temp.path().to_path_buf());
        let deployer = Deployer::new(&config, no_interrupt());
        assert!(!deployer.test_connection());
    }

    #[cfg(unix)]
    #[test]
    fn deploy_continues_past_a_failing_script() {
        let temp = tempfile::tempdir().expect("temp dir");
        let scripts = temp.path().join("scripts");
        fs::create_dir(&scripts).expect("create scripts dir");
        write_script(&scripts, "001_fail.js");
        write_script(&scripts, "002_ok.js");

        // Fails only for the script whose name contains "fail".
        let bin = fake_mongosh(
            temp.path(),
            "case \"$*\" in *fail*) echo boom >&2; exit 3;; esac\necho done; exit 0",
        );
        let config = test_config(bin, scripts);
        let deployer = Deployer::new(&config, no_interrupt());

        let summary = deployer.deploy().expect("deploy");
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_succeeded());

        assert_eq!(summary.scripts[0].script, "001_fail.js");
        assert_eq!(
            summary.scripts[0].failure,
            Some(FailureReason::NonZeroExit(Some(3)))
        );
        assert_eq!(summary.scripts[1].script, "002_ok.js");
        assert!(summary.scripts[1].success);
    }

    #[cfg(unix)]
    #[test]
    fn deploy_executes_scripts_in_file_name_order() {
        let temp = tempfile::tempdir().expect("temp dir");
        let scripts = temp.path().join("scripts");
        fs::create_dir(&scripts).expect("create scripts dir");
        write_script(&scripts, "010_c.js");
        write_script(&scripts, "001_a.js");
        write_script(&scripts, "002_b.js");

        let bin = fake_mongosh(temp.path(), "exit 0");
        let config = test_config(bin, scripts);
        let deployer = Deployer::new(&config, no_interrupt());

        let summary = deployer.deploy().expect("deploy");
        let order: Vec<&str> = summary
            .scripts
            .iter()
            .map(|outcome| outcome.script.as_str())
            .collect();
        assert_eq!(order, vec!["001_a.js", "002_b.js", "010_c.js"]);
        assert!(summary.all_succeeded());
    }

    #[test]
    fn deploy_fails_with_zero_executions_for_an_empty_directory() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = test_config("mongosh".to_string(), temp.path().to_path_buf());
        let deployer = Deployer::new(&config, no_interrupt());

        let summary = deployer.deploy().expect("deploy");
        assert_eq!(summary.total, 0);
        assert!(summary.scripts.is_empty());
        assert!(!summary.all_succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn script_timeout_is_a_failure_not_a_crash() {
        let temp = tempfile::tempdir().expect("temp dir");
        let scripts = temp.path().join("scripts");
        fs::create_dir(&scripts).expect("create scripts dir");
        write_script(&scripts, "001_slow.js");

        let bin = fake_mongosh(temp.path(), "sleep 10");
        let config = test_config(bin, scripts);
        let timeouts = Timeouts {
            script: Duration::from_millis(200),
            ..Timeouts::default()
        };
        let deployer = Deployer::with_timeouts(&config, no_interrupt(), timeouts);

        let summary = deployer.deploy().expect("deploy");
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.scripts[0].failure, Some(FailureReason::TimedOut));
    }

    #[test]
    fn spawn_failure_is_recorded_per_script() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = test_config(
            "/nonexistent/definitely-not-mongosh".to_string(),
            temp.path().to_path_buf(),
        );
        let deployer = Deployer::new(&config, no_interrupt());

        let outcome = deployer.execute_script(&temp.path().join("001_a.js"));
        assert!(!outcome.success);
        assert!(matches!(
            outcome.failure,
            Some(FailureReason::SpawnFailed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn an_interrupt_stops_scheduling_further_scripts() {
        let temp = tempfile::tempdir().expect("temp dir");
        let scripts = temp.path().join("scripts");
        fs::create_dir(&scripts).expect("create scripts dir");
        write_script(&scripts, "001_a.js");
        write_script(&scripts, "002_b.js");

        let bin = fake_mongosh(temp.path(), "exit 0");
        let config = test_config(bin, scripts);
        let interrupt = Arc::new(AtomicBool::new(true));
        let deployer = Deployer::new(&config, interrupt);

        let summary = deployer.deploy().expect("deploy");
        assert!(summary.interrupted);
        assert_eq!(summary.succeeded + summary.failed, 0);
        assert!(!summary.all_succeeded());
    }
}
