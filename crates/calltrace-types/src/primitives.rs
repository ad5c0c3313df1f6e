use facet::Facet;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    EmptyField(&'static str),
    UnknownCode { field: &'static str, code: u32 },
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "{field} must be non-empty"),
            Self::UnknownCode { field, code } => write!(f, "unknown {field} code {code}"),
        }
    }
}

impl Error for InvariantError {}

/// Per-thread event sequence number assigned by the tracer.
///
/// Every sequenced event on a thread must carry exactly `previous + 1`.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct SeqNo(pub i64);

impl SeqNo {
    pub const ZERO: Self = Self(0);

    /// `None` once the sequence space is exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS thread id of the traced thread.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct ThreadId(pub i32);

impl ThreadId {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique handle the runtime assigns to a method.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct FunctionId(pub i64);

impl FunctionId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// HRESULT-style status of the managed call an event describes.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[facet(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: Self = Self(0);

    /// Negative codes are failures; anything else succeeded.
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}
