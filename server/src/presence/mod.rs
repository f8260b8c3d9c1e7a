pub mod broadcast;
pub mod record;
pub mod registry;
mod room;

pub use record::{ConnectionId, PresenceRecord, RoomId};
pub use registry::{PresenceError, PresenceRegistry};
