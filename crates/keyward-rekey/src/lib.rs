pub mod coordinator;
pub mod gate;
pub mod outcome;

pub use coordinator::RekeyCoordinator;
pub use gate::{CredentialGate, SessionGate};
pub use outcome::{
    RekeyFailure, RekeyOutcome, RekeyRequest, RekeyStep, RekeySuccess, Severity,
};
