mod debug;
mod events;
mod outcome;
pub(crate) mod runner;
mod statebag;
mod step;

pub use debug::{DebugLocation, DebugPause, DebugRunner, StdinPause};
pub use events::RunnerEvent;
pub use outcome::RunOutcome;
pub use runner::{BasicRunner, Runner};
pub use statebag::{
    STATE_ABORTED, STATE_CANCELLED, STATE_ERROR, STATE_HALTED, STATE_UI, StateBag, StateBagError,
};
pub use step::{NullStep, Step, StepAction, halt_with_error, when};
