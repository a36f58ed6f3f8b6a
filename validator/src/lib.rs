pub mod answer;
pub mod config;
pub mod error;
pub mod exec;
pub mod fixtures;
pub mod outcome;
pub mod pipeline;
pub mod report;

pub use answer::validate_answer;
pub use config::{Credentials, ExecuteConfig};
pub use error::StageError;
pub use exec::{ExecOutput, Sandbox};
pub use fixtures::Fixtures;
pub use outcome::{Outcome, Stage, ValidationResult};
pub use pipeline::Validator;
pub use report::{RunReport, RunSummary, StructuralFailure};
