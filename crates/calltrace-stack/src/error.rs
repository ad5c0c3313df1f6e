use calltrace_types::{FunctionId, SeqNo, ThreadId};
use std::fmt;

/// Fatal failures of the shadow stack.
///
/// Any of these leaves the affected thread stack faulted: its tree can no
/// longer be trusted, so later events for that thread are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    SequenceGap {
        thread_id: ThreadId,
        expected: SeqNo,
        actual: SeqNo,
    },
    FrameMismatch {
        thread_id: ThreadId,
        sequence: Option<SeqNo>,
        on_stack: FunctionId,
        event: FunctionId,
    },
    RootUnderflow {
        thread_id: ThreadId,
        sequence: SeqNo,
        function_id: FunctionId,
    },
    DuplicateException {
        sequence: SeqNo,
    },
    StackFaulted {
        thread_id: ThreadId,
    },
    InternalInvariant {
        message: String,
    },
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SequenceGap {
                thread_id,
                expected,
                actual,
            } => write!(
                f,
                "thread {thread_id}: sequence gap, expected {expected} but got {actual}"
            ),
            Self::FrameMismatch {
                thread_id,
                sequence,
                on_stack,
                event,
            } => {
                write!(
                    f,
                    "thread {thread_id}: event for function {event} does not match frame {on_stack} on top of the stack"
                )?;
                if let Some(sequence) = sequence {
                    write!(f, " (sequence {sequence})")?;
                }
                Ok(())
            }
            Self::RootUnderflow {
                thread_id,
                sequence,
                function_id,
            } => write!(
                f,
                "thread {thread_id}: leave of {function_id} at sequence {sequence} would pop the root frame"
            ),
            Self::DuplicateException { sequence } => {
                write!(f, "exception with sequence {sequence} already recorded")
            }
            Self::StackFaulted { thread_id } => write!(
                f,
                "thread {thread_id}: stack is faulted by an earlier error and accepts no more events"
            ),
            Self::InternalInvariant { message } => write!(f, "internal invariant violated: {message}"),
        }
    }
}

impl std::error::Error for TraceError {}

impl TraceError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        match self {
            Self::SequenceGap { thread_id, .. }
            | Self::FrameMismatch { thread_id, .. }
            | Self::RootUnderflow { thread_id, .. }
            | Self::StackFaulted { thread_id } => Some(*thread_id),
            Self::DuplicateException { .. } | Self::InternalInvariant { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TraceError::SequenceGap {
            thread_id: ThreadId(3),
            expected: SeqNo(3),
            actual: SeqNo(4),
        };
        assert_eq!(
            err.to_string(),
            "thread 3: sequence gap, expected 3 but got 4"
        );

        let err = TraceError::FrameMismatch {
            thread_id: ThreadId(1),
            sequence: Some(SeqNo(9)),
            on_stack: FunctionId(16),
            event: FunctionId(17),
        };
        assert!(err.to_string().ends_with("(sequence 9)"));
        assert_eq!(err.thread_id(), Some(ThreadId(1)));
    }
}
