//! # modeltrain core types
//!
//! Domain types shared by the orchestrator library and the command line
//! front-end: training job identity and state, the results reference, the
//! pipeline command and the process exit codes.

pub mod error;
pub mod exit;
pub mod job;
pub mod types;

pub use error::{CoreError, Result};
pub use exit::ExitCode;
pub use job::{JobState, ResultsReference, TrainingStatus};
pub use types::{Command, JobId};
