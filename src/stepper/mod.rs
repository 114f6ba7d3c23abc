//! The perceive-decide-act loop and its run artifacts.

mod engine;
mod overlay;
mod record;

pub use engine::{RunOutcome, Stepper, StepperConfig};
pub use overlay::ClickMarker;
pub use record::{create_run_dir, save_step_image, RunLog, StepRecord, StepSink};
