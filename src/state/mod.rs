//! Persisted decomposition state and everything that mutates it.
//!
//! | Module         | Concern                                         |
//! |----------------|-------------------------------------------------|
//! | `types`        | Document schema (`DecompositionState` and parts) |
//! | `persist`      | Atomic writes and advisory file locks           |
//! | `store`        | Load, save, query, task/artifact registration   |
//! | `phase`        | Phase gates, `advance`, `replan`                |
//! | `lifecycle`    | Per-task status transitions                     |
//! | `halt`         | Cooperative halt flag                           |
//! | `verification` | Verifier verdicts and calibration               |
//! | `recovery`     | Salvage of a corrupt state document             |

pub mod halt;
pub mod lifecycle;
pub mod persist;
pub mod phase;
pub mod recovery;
pub mod store;
pub mod types;
pub mod verification;

pub use halt::HaltStatus;
pub use lifecycle::Lifecycle;
pub use phase::{AdvanceCheck, Phase, PhaseTransition, exit_blockers};
pub use recovery::StateRecovery;
pub use store::{LoadReport, STATE_FILE, StateStore, StatusSummary, ready_tasks, validate_state};
pub use types::{
    ArtifactKind, ArtifactRef, Calibration, CalibrationOutcome, CriterionCheck,
    DecompositionState, Event, EventKind, FailureCategory, HaltInfo, Recommendation,
    STATE_VERSION, TaskFailure, TaskFiles, TaskRecord, TaskStatus, TaskValidation,
    TaskValidationVerdict, ValidationResults, Verification, VerificationVerdict,
};
pub use verification::{CalibrationData, CalibrationEntry, CalibrationScore};
