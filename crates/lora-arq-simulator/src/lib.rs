pub mod engine;
pub mod scenario_runner;
pub mod trace;

pub use engine::{LinkEventSummary, Simulator};
pub use scenario_runner::{AssertionResult, ScenarioRun};
pub use trace::{DeliveryRecord, FrameRecord, SendOutcome, SimulationReport};
