//! Scripted collaborators for tests and offline runs.

use crate::collab::*;
use crate::error::{ExecutorError, StageFailure};
use mender_core::types::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Knowledge base with a fixed article list.
pub struct StaticKnowledge {
    articles: Vec<KnowledgeArticle>,
    error: Option<String>,
    calls: AtomicUsize,
}

impl StaticKnowledge {
    pub fn new(articles: Vec<KnowledgeArticle>) -> Self {
        Self {
            articles,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            articles: Vec::new(),
            error: Some(error.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl KnowledgeSearch for StaticKnowledge {
    async fn find(&self, _tags: &BTreeSet<String>) -> anyhow::Result<Vec<KnowledgeArticle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(e) => anyhow::bail!("{e}"),
            None => Ok(self.articles.clone()),
        }
    }
}

/// History search with fixed matches and an optional delay.
pub struct StaticHistory {
    matches: Vec<PastIncident>,
    error: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticHistory {
    pub fn new(matches: Vec<PastIncident>) -> Self {
        Self {
            matches,
            error: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HistorySearch for StaticHistory {
    async fn find(&self, _incident: &Incident) -> anyhow::Result<Vec<PastIncident>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(e) => anyhow::bail!("{e}"),
            None => Ok(self.matches.clone()),
        }
    }
}

/// Diagnostic engine returning one canned result.
pub struct MockEngine {
    result: Result<DiagnosticReport, StageFailure>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockEngine {
    pub fn new(result: Result<DiagnosticReport, StageFailure>) -> Self {
        Self {
            result,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DiagnosticEngine for MockEngine {
    async fn analyze(
        &self,
        _incident: &Incident,
        _context: &ContextBundle,
        _deadline: Duration,
    ) -> Result<DiagnosticReport, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

/// Executor that pops scripted results per action id. Actions without a
/// script (or with an exhausted one) exit 0 with `ok`.
#[derive(Default)]
pub struct MockExecutor {
    results: Mutex<HashMap<String, Vec<Result<CommandOutput, ExecutorError>>>>,
    runs: Mutex<Vec<String>>,
    dry_runs: AtomicUsize,
    dry_run_error: Option<ExecutorError>,
    delay: Option<Duration>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action_id: &str, result: Result<CommandOutput, ExecutorError>) {
        self.results
            .lock()
            .unwrap()
            .entry(action_id.to_string())
            .or_default()
            .push(result);
    }

    /// Next run of `action_id` exits `code` with `output`.
    pub fn exit(&self, action_id: &str, code: i32, output: &str) {
        self.push(
            action_id,
            Ok(CommandOutput {
                exit_code: code,
                output: output.to_string(),
            }),
        );
    }

    pub fn with_dry_run_error(mut self, error: ExecutorError) -> Self {
        self.dry_run_error = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancel `token` once `action_id` has run, simulating an operator halt.
    pub fn cancel_after(&self, action_id: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((action_id.to_string(), token));
    }

    /// Action ids in the order they ran.
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }

    pub fn dry_runs(&self) -> usize {
        self.dry_runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CommandExecutor for MockExecutor {
    async fn dry_run(
        &self,
        incident: &Incident,
        action: &ProposedAction,
    ) -> Result<SimulationReport, ExecutorError> {
        self.dry_runs.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.dry_run_error {
            return Err(e.clone());
        }
        Ok(SimulationReport {
            action_id: action.id.clone(),
            preview: format!("(mock) would run on {}: {}", incident.host, action.command),
            mutating: action.risk_tier != RiskTier::Safe,
        })
    }

    async fn run(
        &self,
        _incident: &Incident,
        action: &ProposedAction,
        _deadline: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        self.runs.lock().unwrap().push(action.id.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = {
            let mut map = self.results.lock().unwrap();
            map.get_mut(&action.id)
                .filter(|v| !v.is_empty())
                .map(|v| v.remove(0))
        };
        if let Some((id, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if *id == action.id {
                token.cancel();
            }
        }
        scripted.unwrap_or_else(|| {
            Ok(CommandOutput {
                exit_code: 0,
                output: "ok".into(),
            })
        })
    }
}

/// Probe where every check passes unless told otherwise.
#[derive(Default)]
pub struct MockProbe {
    failures: HashMap<PreflightCheck, String>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, check: PreflightCheck, detail: &str) -> Self {
        self.failures.insert(check, detail.to_string());
        self
    }
}

#[async_trait::async_trait]
impl PreflightProbe for MockProbe {
    async fn probe(
        &self,
        check: PreflightCheck,
        _incident: &Incident,
        _actions: &[ProposedAction],
    ) -> CheckOutput {
        match self.failures.get(&check) {
            Some(detail) => CheckOutput::failed(detail.clone(), Duration::from_millis(1)),
            None => CheckOutput::passed(Duration::from_millis(1)),
        }
    }
}

/// Feedback target that keeps what it receives.
#[derive(Default)]
pub struct RecordingFeedback {
    received: Mutex<Vec<ResolutionFeedback>>,
    error: Option<String>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: &str) -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            error: Some(error.to_string()),
        }
    }

    pub fn received(&self) -> Vec<ResolutionFeedback> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl KnowledgeFeedback for RecordingFeedback {
    async fn record(&self, feedback: &ResolutionFeedback) -> anyhow::Result<()> {
        if let Some(e) = &self.error {
            anyhow::bail!("{e}");
        }
        self.received.lock().unwrap().push(feedback.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: &str) -> ProposedAction {
        ProposedAction {
            id: id.into(),
            label: id.into(),
            command: "echo".into(),
            risk_tier: RiskTier::Safe,
            raised_from: None,
        }
    }

    fn incident() -> Incident {
        Incident {
            id: "INC-1".into(),
            title: "t".into(),
            severity: Severity::P4,
            environment: "dev".into(),
            application: "a".into(),
            host: "h".into(),
            description: String::new(),
            logs: String::new(),
            tags: Default::default(),
        }
    }

    #[tokio::test]
    async fn executor_pops_scripted_then_defaults() {
        let exec = MockExecutor::new();
        exec.exit("a", 2, "boom");
        let d = Duration::from_secs(1);
        let first = exec.run(&incident(), &action("a"), d).await.unwrap();
        assert_eq!(first.exit_code, 2);
        let second = exec.run(&incident(), &action("a"), d).await.unwrap();
        assert!(second.success());
        assert_eq!(exec.runs(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn cancel_after_trips_token() {
        let exec = MockExecutor::new();
        let token = CancellationToken::new();
        exec.cancel_after("b", token.clone());
        exec.run(&incident(), &action("a"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!token.is_cancelled());
        exec.run(&incident(), &action("b"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(token.is_cancelled());
    }
}
