//! Progress notices for whoever is watching an incident.

use mender_core::types::{Incident, Severity};
use std::fmt;

/// How much a notice needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    /// Step-by-step execution progress.
    Progress,
    Info,
    /// A human has to act: review, triage or rollback.
    Attention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub incident_id: String,
    pub severity: Severity,
    pub urgency: Urgency,
    pub message: String,
}

impl Notice {
    pub fn new(incident: &Incident, urgency: Urgency, message: impl Into<String>) -> Self {
        Self {
            incident_id: incident.id.clone(),
            severity: incident.severity,
            urgency,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.urgency {
            Urgency::Progress => "  ",
            Urgency::Info => "",
            Urgency::Attention => "! ",
        };
        write!(
            f,
            "[{} {}] {mark}{}",
            self.severity, self.incident_id, self.message
        )
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice);

    async fn send(&self, incident: &Incident, urgency: Urgency, message: String) {
        self.notify(&Notice::new(incident, urgency, message)).await
    }
}

/// Prints notices at or above `min` to stdout.
pub struct StdoutNotifier {
    min: Urgency,
}

impl StdoutNotifier {
    pub fn new(min: Urgency) -> Self {
        Self { min }
    }
}

impl Default for StdoutNotifier {
    fn default() -> Self {
        Self::new(Urgency::Progress)
    }
}

#[async_trait::async_trait]
impl Notifier for StdoutNotifier {
    async fn notify(&self, notice: &Notice) {
        if notice.urgency >= self.min {
            println!("{notice}");
        }
    }
}

/// Keeps notices in memory (for testing).
#[derive(Default)]
pub struct CollectNotifier {
    notices: std::sync::Mutex<Vec<Notice>>,
}

impl CollectNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    /// Message texts, in order.
    pub fn messages(&self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.message).collect()
    }

    /// Notices for one incident that ask for a human.
    pub fn attention(&self, incident_id: &str) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| n.incident_id == incident_id && n.urgency == Urgency::Attention)
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for CollectNotifier {
    async fn notify(&self, notice: &Notice) {
        if let Ok(mut n) = self.notices.lock() {
            n.push(notice.clone());
        }
    }
}
