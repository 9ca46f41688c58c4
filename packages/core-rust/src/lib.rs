//! `intelgate` core: operation model, identifier generation, clock, and the
//! messages exchanged with clients and the downstream analysis service.

pub mod clock;
pub mod id;
pub mod messages;
pub mod operation;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use id::IdGenerator;
pub use messages::{CreateOperationRequest, DownstreamRequest, IntelRequest};
pub use operation::{
    Operation, OperationStatus, ParseEnumError, Priority, TransitionError, CANCELLED_BY_CALLER,
};
