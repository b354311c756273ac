pub mod airtime;
pub mod codec;
pub mod dispatcher;
pub mod event_log;
pub mod node;
pub mod reassembly;
pub mod session;
pub mod window;

#[cfg(test)]
mod testing;

pub use airtime::time_on_air_ms;
pub use codec::{DecodeError, decode, encode, sanitize};
pub use dispatcher::{Awaiting, Dispatch, Dispatcher};
pub use event_log::{CsvEventWriter, EventDetail, EventLog};
pub use node::ArqNode;
pub use reassembly::{Accepted, FragmentOutcome, ReassemblyBuffer};
pub use session::{SendError, Session};
pub use window::{AckOutcome, IgnoreReason, OutboundFragment, TransmitWindow};
