//! Data model shared by the calltrace engine and its drivers.
//!
//! Everything here is plain data: identifiers, method metadata, exception and
//! transition tags, and the event records a tracer streams out of a process.

mod events;
mod exception;
mod method;
mod primitives;
mod transition;

pub use events::*;
pub use exception::*;
pub use method::*;
pub use primitives::*;
pub use transition::*;
