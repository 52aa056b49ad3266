pub mod catalog;
pub mod collab;
pub mod config;
pub mod context;
pub mod controller;
pub mod diagnosis;
pub mod error;
pub mod gate;
pub mod journal;
pub mod mock;
pub mod notify;
pub mod orchestrator;
pub mod preflight;
pub mod redact;
pub mod shell;

pub use config::ConductorConfig;
pub use controller::{Collaborators, IncidentController};
pub use error::{ControllerError, ExecutorError, GateError, StageFailure};
pub use gate::Submission;
