//! Shadow call-stack reconstruction.
//!
//! A [`Session`] receives an already-deserialized event stream and rebuilds,
//! per traced thread, the tree of every call that was entered. Each thread is
//! advanced by its own [`ThreadStack`] state machine, which enforces strict
//! sequence contiguity and treats any desynchronization as fatal for that
//! thread.

mod config;
mod error;
mod exception;
mod frame;
mod methods;
mod session;
mod stack;
mod value;
mod walk;

pub use config::SessionConfig;
pub use error::TraceError;
pub use exception::{CompletionOutcome, ExceptionInfo, ExceptionTable};
pub use frame::{
    DetailedMethodFrame, Frame, FrameArena, FrameId, FrameKind, MethodFrame, RootFrame,
    TransitionFrame,
};
pub use methods::{MethodResolver, MethodTable};
pub use session::{Session, SharedThreadStack};
pub use stack::{Notice, ThreadStack};
pub use value::{DecodedValues, ValueDecoder};
pub use walk::{FrameRef, Walk, filter_tree};
