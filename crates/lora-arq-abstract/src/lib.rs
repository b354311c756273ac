pub mod config;
pub mod event;
pub mod frame;
pub mod interface;
pub mod scenario;

pub use config::{ArqConfig, ConfigError, RadioConfig, SimConfig};
pub use event::{EVENT_CSV_HEADER, EventKind, EventRecord, Role};
pub use frame::{
    AckFrame, BROADCAST_ID, DataFrame, FragmentAckFrame, FragmentFrame, Frame, FrameKind, NodeId,
};
pub use interface::{Delivery, Notice, Received, SendReport, SystemContext};
pub use scenario::{
    ArqConfigOverride, DropRule, SimConfigOverride, TestAction, TestAssertion, TestScenario,
    generated_text,
};
