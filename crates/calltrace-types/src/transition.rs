use facet::Facet;
use std::fmt;

use crate::InvariantError;

#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum TransitionDirection {
    ToUnmanaged,
    ToManaged,
}

#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum TransitionReason {
    Call,
    Return,
}

/// Profiler transition reasons: 0 is a call, 1 is a return.
impl TryFrom<u32> for TransitionReason {
    type Error = InvariantError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Call),
            1 => Ok(Self::Return),
            code => Err(InvariantError::UnknownCode {
                field: "transition_reason",
                code,
            }),
        }
    }
}

/// Tag stored on an unmanaged transition frame.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransitionKind {
    pub direction: TransitionDirection,
    pub reason: TransitionReason,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            TransitionDirection::ToUnmanaged => "to-unmanaged",
            TransitionDirection::ToManaged => "to-managed",
        };
        let reason = match self.reason {
            TransitionReason::Call => "call",
            TransitionReason::Return => "return",
        };
        write!(f, "{direction} {reason}")
    }
}
