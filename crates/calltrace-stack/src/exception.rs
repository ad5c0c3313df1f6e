use calltrace_types::{CompletionReason, ExceptionStatus, SeqNo};
use std::collections::BTreeMap;

use crate::{FrameId, TraceError};

/// One observed exception instance, keyed by the sequence of its throw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub sequence: SeqNo,
    pub type_name: String,
    pub status: ExceptionStatus,
    /// Frame that was current when the exception was thrown; `None` at root.
    pub thrown_in: Option<FrameId>,
    /// Frame whose catcher ran for this exception, if one was observed.
    pub handled_in: Option<FrameId>,
}

/// What [`ExceptionTable::complete`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Resolved,
    /// No throw with that sequence was recorded (partial trace).
    UnknownSequence,
    /// Already terminal; the stored status is kept.
    AlreadyResolved(ExceptionStatus),
}

#[derive(Debug, Clone, Default)]
pub struct ExceptionTable {
    records: BTreeMap<SeqNo, ExceptionInfo>,
}

impl ExceptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        sequence: SeqNo,
        type_name: impl Into<String>,
        thrown_in: Option<FrameId>,
    ) -> Result<&ExceptionInfo, TraceError> {
        if self.records.contains_key(&sequence) {
            return Err(TraceError::DuplicateException { sequence });
        }
        let info = self.records.entry(sequence).or_insert(ExceptionInfo {
            sequence,
            type_name: type_name.into(),
            status: ExceptionStatus::Unresolved,
            thrown_in,
            handled_in: None,
        });
        Ok(info)
    }

    pub fn complete(&mut self, sequence: SeqNo, reason: CompletionReason) -> CompletionOutcome {
        let Some(info) = self.records.get_mut(&sequence) else {
            return CompletionOutcome::UnknownSequence;
        };
        if info.status.is_terminal() {
            return CompletionOutcome::AlreadyResolved(info.status);
        }
        info.status = reason.status();
        CompletionOutcome::Resolved
    }

    /// Marks an unresolved exception superseded. Returns false if the
    /// sequence is unknown or already terminal.
    pub fn supersede(&mut self, sequence: SeqNo) -> bool {
        matches!(
            self.complete(sequence, CompletionReason::Superseded),
            CompletionOutcome::Resolved
        )
    }

    /// Supersedes every unresolved exception, returning their sequences.
    pub fn supersede_unresolved(&mut self) -> Vec<SeqNo> {
        let mut superseded = Vec::new();
        for info in self.records.values_mut() {
            if !info.status.is_terminal() {
                info.status = ExceptionStatus::Superseded;
                superseded.push(info.sequence);
            }
        }
        superseded
    }

    /// Most recently thrown exception that has not been resolved yet.
    pub fn innermost_unresolved_mut(&mut self) -> Option<&mut ExceptionInfo> {
        self.records
            .values_mut()
            .rev()
            .find(|info| !info.status.is_terminal())
    }

    pub fn get(&self, sequence: SeqNo) -> Option<&ExceptionInfo> {
        self.records.get(&sequence)
    }

    /// Records in throw order.
    pub fn iter(&self) -> impl Iterator<Item = &ExceptionInfo> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
