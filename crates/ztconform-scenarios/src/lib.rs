//! Scenario runner for ZeroTier One API conformance.
//!
//! Scenarios are declarative groups of API steps. The sequencer issues each
//! step against the instance under test, validates the response against the
//! schema bundle and threads extracted identifiers into later steps.

pub mod catalog;
pub mod error;
pub mod instance;
pub mod report;
pub mod runtime;
pub mod sequencer;
pub mod state;
pub mod step;

pub use error::StepFailure;
pub use instance::{wait_ready, Provisioner, RunningInstance};
pub use report::{render_markdown, GroupReport, Outcome, RunReport, StepRecord, Summary};
pub use runtime::ConformanceSession;
pub use sequencer::Sequencer;
pub use state::ScenarioState;
pub use step::{Expectation, Extraction, Node, ParamValue, ScenarioGroup, Step};
