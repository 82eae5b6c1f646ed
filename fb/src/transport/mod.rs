//! Bus transport
//!
//! Two unidirectional broadcast channels in a star topology. The broker's [`Hub`] binds both
//! endpoints; each worker's [`Link`] connects to them in the mirrored roles. Every subscriber
//! receives every envelope on its direction, so addressing is filtered by the application.

mod frame;
mod hub;
mod link;
mod memory;

pub use frame::{read_frame, write_frame};
pub use hub::Hub;
pub use link::Link;
pub use memory::MemoryBus;
