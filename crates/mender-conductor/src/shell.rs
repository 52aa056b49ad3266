//! Local shell transport: commands run through `sh -c`.

use crate::collab::{CheckOutput, CommandExecutor, CommandOutput, PreflightProbe};
use crate::error::ExecutorError;
use crate::redact::mask_secrets;
use mender_core::risk::RiskClassifier;
use mender_core::types::*;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Shell program and args for the current platform.
#[cfg(windows)]
fn shell_cmd(cmd: &str) -> (String, Vec<String>) {
    ("cmd.exe".into(), vec!["/C".into(), cmd.into()])
}

#[cfg(not(windows))]
fn shell_cmd(cmd: &str) -> (String, Vec<String>) {
    ("sh".into(), vec!["-c".into(), cmd.into()])
}

async fn run_shell(
    cmd: &str,
    cwd: Option<&PathBuf>,
    deadline: Duration,
) -> Result<CommandOutput, ExecutorError> {
    let (shell, args) = shell_cmd(cmd);
    let mut command = Command::new(&shell);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    match tokio::time::timeout(deadline, command.output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&stderr);
            }
            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                output: text,
            })
        }
        Ok(Err(e)) => Err(ExecutorError::Unavailable(format!("spawn {shell}: {e}"))),
        Err(_) => Err(ExecutorError::Timeout(deadline)),
    }
}

/// Runs actions as local shell commands.
pub struct ShellExecutor {
    cwd: Option<PathBuf>,
    classifier: RiskClassifier,
}

impl ShellExecutor {
    pub fn new(classifier: RiskClassifier) -> Self {
        Self {
            cwd: None,
            classifier,
        }
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

#[async_trait::async_trait]
impl CommandExecutor for ShellExecutor {
    /// Never spawns the command; describes what would run.
    async fn dry_run(
        &self,
        incident: &Incident,
        action: &ProposedAction,
    ) -> Result<SimulationReport, ExecutorError> {
        let production = self.classifier.is_production(incident);
        let mutating = self.classifier.assess(&action.command, production) != RiskTier::Safe
            || action.risk_tier != RiskTier::Safe;
        Ok(SimulationReport {
            action_id: action.id.clone(),
            preview: format!(
                "would run on {} ({}): {}",
                incident.host,
                incident.environment,
                mask_secrets(&action.command)
            ),
            mutating,
        })
    }

    async fn run(
        &self,
        _incident: &Incident,
        action: &ProposedAction,
        deadline: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        run_shell(&action.command, self.cwd.as_ref(), deadline).await
    }
}

/// Pre-flight checks against the local shell.
pub struct ShellProbe {
    /// Reachability command template; `{host}` is substituted.
    reachability_cmd: Option<String>,
    timeout: Duration,
}

impl ShellProbe {
    pub fn new(reachability_cmd: Option<String>, timeout: Duration) -> Self {
        Self {
            reachability_cmd,
            timeout,
        }
    }

    async fn check_cmd(&self, cmd: &str, start: Instant) -> CheckOutput {
        match run_shell(cmd, None, self.timeout).await {
            Ok(out) if out.success() => CheckOutput::passed(start.elapsed()),
            Ok(out) => CheckOutput::failed(
                format!(
                    "exit {}: {}",
                    out.exit_code,
                    crate::redact::sanitize_output(&out.output)
                ),
                start.elapsed(),
            ),
            Err(e) => CheckOutput::failed(e.to_string(), start.elapsed()),
        }
    }
}

/// Program names invoked by a command line, skipping env assignments.
fn programs(command: &str) -> Vec<String> {
    command
        .split(['|', ';', '&'])
        .filter_map(|segment| {
            segment
                .split_whitespace()
                .find(|tok| !tok.contains('='))
                .map(|tok| tok.trim_matches(|c| c == '(' || c == ')').to_string())
        })
        .filter(|p| !p.is_empty())
        .collect()
}

#[async_trait::async_trait]
impl PreflightProbe for ShellProbe {
    async fn probe(
        &self,
        check: PreflightCheck,
        incident: &Incident,
        actions: &[ProposedAction],
    ) -> CheckOutput {
        let start = Instant::now();
        match check {
            PreflightCheck::AccessVerification => self.check_cmd("true", start).await,
            PreflightCheck::TargetReachability => match &self.reachability_cmd {
                Some(template) => {
                    let cmd = template.replace("{host}", &incident.host);
                    self.check_cmd(&cmd, start).await
                }
                None => CheckOutput::passed_with_detail(
                    "no reachability command configured".into(),
                    start.elapsed(),
                ),
            },
            PreflightCheck::DependencyCheck => {
                let wanted: BTreeSet<String> =
                    actions.iter().flat_map(|a| programs(&a.command)).collect();
                let mut missing = Vec::new();
                for prog in &wanted {
                    let probe = format!("command -v {prog} >/dev/null 2>&1");
                    match run_shell(&probe, None, self.timeout).await {
                        Ok(out) if out.success() => {}
                        _ => missing.push(prog.clone()),
                    }
                }
                if missing.is_empty() {
                    CheckOutput::passed(start.elapsed())
                } else {
                    CheckOutput::failed(
                        format!("missing programs: {}", missing.join(", ")),
                        start.elapsed(),
                    )
                }
            }
        }
    }
}
