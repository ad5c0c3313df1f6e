use facet::Facet;

use crate::{
    CompletionReason, FunctionId, SeqNo, StatusCode, ThreadId, TransitionDirection,
    TransitionReason,
};

/// One already-deserialized record from the tracer's event stream.
#[derive(Facet, Clone, Debug, PartialEq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum TraceEvent {
    /// Metadata for a function id. Session-wide, not tied to a thread.
    MethodInfo(MethodInfoEvent),
    ThreadName(ThreadNameEvent),
    CallEnter(CallEvent),
    CallLeave(CallEvent),
    Tailcall(CallEvent),
    CallEnterDetailed(DetailedCallEvent),
    CallLeaveDetailed(DetailedCallEvent),
    TailcallDetailed(DetailedCallEvent),
    ExceptionThrown(ExceptionThrownEvent),
    ExceptionFrameUnwind(CallEvent),
    ExceptionFrameUnwindDetailed(DetailedCallEvent),
    ExceptionCatcherEnter(CatcherEnterEvent),
    ExceptionCompleted(ExceptionCompletedEvent),
    UnmanagedTransition(TransitionEvent),
}

impl TraceEvent {
    /// Thread the event belongs to; `None` for session-wide metadata.
    pub fn thread_id(&self) -> Option<ThreadId> {
        match self {
            Self::MethodInfo(_) => None,
            Self::ThreadName(e) => Some(e.thread_id),
            Self::CallEnter(e)
            | Self::CallLeave(e)
            | Self::Tailcall(e)
            | Self::ExceptionFrameUnwind(e) => Some(e.thread_id),
            Self::CallEnterDetailed(e)
            | Self::CallLeaveDetailed(e)
            | Self::TailcallDetailed(e)
            | Self::ExceptionFrameUnwindDetailed(e) => Some(e.thread_id),
            Self::ExceptionThrown(e) => Some(e.thread_id),
            Self::ExceptionCatcherEnter(e) => Some(e.thread_id),
            Self::ExceptionCompleted(e) => Some(e.thread_id),
            Self::UnmanagedTransition(e) => Some(e.thread_id),
        }
    }

    /// Sequence number this event consumes on its thread.
    ///
    /// Completions reference an earlier throw and catcher events are not
    /// numbered, so neither consumes one.
    pub fn sequence(&self) -> Option<SeqNo> {
        match self {
            Self::MethodInfo(_)
            | Self::ThreadName(_)
            | Self::ExceptionCatcherEnter(_)
            | Self::ExceptionCompleted(_) => None,
            Self::CallEnter(e)
            | Self::CallLeave(e)
            | Self::Tailcall(e)
            | Self::ExceptionFrameUnwind(e) => Some(e.sequence),
            Self::CallEnterDetailed(e)
            | Self::CallLeaveDetailed(e)
            | Self::TailcallDetailed(e)
            | Self::ExceptionFrameUnwindDetailed(e) => Some(e.sequence),
            Self::ExceptionThrown(e) => Some(e.sequence),
            Self::UnmanagedTransition(e) => Some(e.sequence),
        }
    }
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct MethodInfoEvent {
    pub function_id: FunctionId,
    pub module_path: String,
    pub type_name: String,
    pub method_name: String,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct ThreadNameEvent {
    pub thread_id: ThreadId,
    pub name: String,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct CallEvent {
    pub sequence: SeqNo,
    pub thread_id: ThreadId,
    pub function_id: FunctionId,
    #[facet(default)]
    pub status: StatusCode,
}

/// Call event carrying a captured value blob: parameters on enter, the return
/// value on leave.
#[derive(Facet, Clone, Debug, PartialEq)]
pub struct DetailedCallEvent {
    pub sequence: SeqNo,
    pub thread_id: ThreadId,
    pub function_id: FunctionId,
    #[facet(default)]
    pub status: StatusCode,
    #[facet(default)]
    pub value: Vec<u8>,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct ExceptionThrownEvent {
    pub sequence: SeqNo,
    pub thread_id: ThreadId,
    pub type_name: String,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct CatcherEnterEvent {
    pub thread_id: ThreadId,
    pub function_id: FunctionId,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct ExceptionCompletedEvent {
    /// Sequence of the throw this completion resolves.
    pub sequence: SeqNo,
    pub thread_id: ThreadId,
    pub reason: CompletionReason,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct TransitionEvent {
    pub sequence: SeqNo,
    pub thread_id: ThreadId,
    pub function_id: FunctionId,
    pub direction: TransitionDirection,
    pub reason: TransitionReason,
}
