pub mod dispatcher;
pub mod queue;

pub use dispatcher::{Dispatcher, JudgeCommand, JudgeRegistration};
pub use queue::{Submission, TierQueue};
