pub mod connection;
pub mod messages;
mod observer;
mod relay;
mod sampler;
mod scheduler;
mod server;
mod session;
mod signaling;
mod state;

pub use connection::{ConnectionHandle, ConnectionId, EventSink};
pub use messages::{ClientEvent, ServerEvent};
pub use observer::BroadcastReport;
pub use relay::{RelayOutcome, RelayStats};
pub use sampler::{Sampler, SamplingPolicy};
pub use scheduler::{RotationOutcome, RotationTrigger};
pub use server::{ProctoringServer, ProctoringSnapshot};
pub use session::SessionId;
pub use signaling::{ConnectionRole, ProctoringSignalingHandler};
