pub mod session;

pub use session::{Cancelled, CommitSummary, PipelineController, SessionError, StageKind};
