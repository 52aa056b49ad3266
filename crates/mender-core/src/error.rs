use crate::lifecycle::{LifecycleState, TransitionError};

/// An audit entry that cannot be applied to an incident record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{kind} not accepted in {state}")]
    NotAccepted {
        kind: &'static str,
        state: LifecycleState,
    },
    #[error("entry for {found} applied to incident {expected}")]
    WrongIncident { expected: String, found: String },
    #[error("entry seq {found} does not follow head (expected {expected})")]
    OutOfOrder { expected: u64, found: u64 },
    #[error("entry seq {seq} does not link to the chain head")]
    Unlinked { seq: u64 },
    #[error("inconsistent {kind}: {detail}")]
    Inconsistent { kind: &'static str, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("no audit entries")]
    Empty,
    #[error("first entry must open the incident, found {0}")]
    NotOpened(&'static str),
    #[error("chain mixes incidents: expected {expected}, found {found}")]
    MixedIncidents { expected: String, found: String },
    #[error("sequence gap: expected seq {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },
    #[error("broken chain at seq {seq}")]
    BrokenChain { seq: u64 },
    #[error("hash mismatch at seq {seq}")]
    HashMismatch { seq: u64 },
    #[error("entry seq {seq} rejected: {source}")]
    Rejected {
        seq: u64,
        #[source]
        source: EntryError,
    },
}
