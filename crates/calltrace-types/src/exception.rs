use facet::Facet;
use std::fmt;

use crate::InvariantError;

/// Resolution state of one observed exception instance.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ExceptionStatus {
    /// No completion seen yet: still in flight, or the trace ended first.
    Unresolved,
    /// Handled by a managed handler inside the traced scope.
    Caught,
    /// Propagated into unmanaged code and handled there.
    UnmanagedCaught,
    /// A newer exception escaped while this one was being handled, so this
    /// one can never resume.
    Superseded,
    /// Thrown inside a filter expression; unhandled at the filter.
    UnhandledInFilter,
}

impl ExceptionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Caught => "caught",
            Self::UnmanagedCaught => "unmanaged_caught",
            Self::Superseded => "superseded",
            Self::UnhandledInFilter => "unhandled_in_filter",
        }
    }
}

impl fmt::Display for ExceptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason carried by an exception-completed event. Always terminal.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum CompletionReason {
    Caught,
    UnmanagedCaught,
    Superseded,
    UnhandledInFilter,
}

impl CompletionReason {
    pub fn status(self) -> ExceptionStatus {
        match self {
            Self::Caught => ExceptionStatus::Caught,
            Self::UnmanagedCaught => ExceptionStatus::UnmanagedCaught,
            Self::Superseded => ExceptionStatus::Superseded,
            Self::UnhandledInFilter => ExceptionStatus::UnhandledInFilter,
        }
    }
}

impl From<CompletionReason> for ExceptionStatus {
    fn from(reason: CompletionReason) -> Self {
        reason.status()
    }
}

/// Raw reason codes as emitted by the profiler.
impl TryFrom<u32> for CompletionReason {
    type Error = InvariantError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Caught),
            2 => Ok(Self::UnmanagedCaught),
            3 => Ok(Self::Superseded),
            4 => Ok(Self::UnhandledInFilter),
            code => Err(InvariantError::UnknownCode {
                field: "completion_reason",
                code,
            }),
        }
    }
}
