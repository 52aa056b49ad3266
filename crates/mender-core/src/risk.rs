//! Deterministic risk classification of proposed actions.
//!
//! Upstream tiers are advisory: the effective tier is the maximum of the
//! upstream label and what the command text itself warrants. Only the command
//! text is inspected, never the label.

use crate::types::{Incident, ProposedAction, RiskTier};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Commands that destroy state or reconfigure a live system.
/// `HighRisk` on production, `NeedsApproval` elsewhere.
const DESTRUCTIVE_PATTERNS: &[&str] = &[
    r"(?i)terminate",
    r"(?i)\b(kill|pkill|killall)\b",
    r"(?i)\bdelete\b",
    r"(?i)\bdrop\b",
    r"(?i)\btruncate\b",
    r"(?i)\bflush(all|db)\b",
    r"(?:^|[\s;&|(])(sudo\s+)?rm\s",
    r"(?i)\b(del|unlink|hdel|srem|zrem)\s+\S",
    r"(?i)\b(shutdown|reboot|halt|poweroff)\b",
    r"(?i)\b(docker|podman)\s+(container\s+|image\s+)?(rm|rmi|prune)\b",
    r"(?i)\bkubectl\b.*\s--force\b",
    r"(?i)\bconfig[\s-]+set\b",
    r"(?i)\bset\s+[\w.]+\s*=",
];

/// State-mutating commands. `NeedsApproval` on production.
const MUTATING_PATTERNS: &[&str] = &[
    r"(?i)\bpurge\b",
    r"(?i)\brestart\b",
    r"(?i)\breload\b",
    r"(?i)\bexpire\b",
    r"(?i)\brollout\s+undo\b",
    r"(?i)\bscale\b",
    r"(?i)\bconfig\s+rewrite\b",
    r"(?i)\bsystemctl\s+(stop|start|disable)\b",
];

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("invalid risk pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Tunable part of the risk policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Environment names or tags that mark an incident as production.
    pub production_markers: Vec<String>,
    pub extra_high_risk_patterns: Vec<String>,
    pub extra_mutating_patterns: Vec<String>,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            production_markers: vec!["production".into(), "prod".into()],
            extra_high_risk_patterns: Vec::new(),
            extra_mutating_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskClassifier {
    destructive: Vec<Regex>,
    mutating: Vec<Regex>,
    production_markers: Vec<String>,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self {
            destructive: builtin(DESTRUCTIVE_PATTERNS),
            mutating: builtin(MUTATING_PATTERNS),
            production_markers: RiskPolicy::default().production_markers,
        }
    }
}

fn builtin(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, ClassifierError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| ClassifierError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

impl RiskClassifier {
    pub fn new(policy: &RiskPolicy) -> Result<Self, ClassifierError> {
        let mut destructive = builtin(DESTRUCTIVE_PATTERNS);
        destructive.extend(compile(&policy.extra_high_risk_patterns)?);
        let mut mutating = builtin(MUTATING_PATTERNS);
        mutating.extend(compile(&policy.extra_mutating_patterns)?);
        Ok(Self {
            destructive,
            mutating,
            production_markers: policy.production_markers.clone(),
        })
    }

    pub fn is_production(&self, incident: &Incident) -> bool {
        incident.is_production(&self.production_markers)
    }

    /// Tier warranted by the command text alone.
    pub fn assess(&self, command: &str, production: bool) -> RiskTier {
        let destructive = self.destructive.iter().any(|re| re.is_match(command));
        let mutating = self.mutating.iter().any(|re| re.is_match(command));
        match (production, destructive, mutating) {
            (true, true, _) => RiskTier::HighRisk,
            (true, false, true) => RiskTier::NeedsApproval,
            (false, true, _) => RiskTier::NeedsApproval,
            _ => RiskTier::Safe,
        }
    }

    /// Effective tier: never below the upstream label.
    pub fn classify(&self, action: &ProposedAction, incident: &Incident) -> RiskTier {
        action
            .risk_tier
            .max(self.assess(&action.command, self.is_production(incident)))
    }

    /// Return `action` with its effective tier, recording the upstream label
    /// in `raised_from` when the tier went up.
    pub fn reclassify(&self, mut action: ProposedAction, incident: &Incident) -> ProposedAction {
        let tier = self.classify(&action, incident);
        if tier > action.risk_tier {
            let upstream = action.raised_from.unwrap_or(action.risk_tier);
            action.raised_from = Some(upstream);
            action.risk_tier = tier;
        }
        action
    }
}
