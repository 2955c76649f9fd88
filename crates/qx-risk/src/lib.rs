pub mod errors;
pub mod severity;
pub mod supervisor;

pub use errors::RiskError;
pub use severity::{RiskSeverity, RiskViolation, RuleTag};
pub use supervisor::{RiskCheckOutcome, RiskSupervisor};
