//! Per-thread shadow stack.
//!
//! The state is the current-frame pointer plus the last accepted sequence
//! number. Every sequenced event must carry `last + 1`; the first one a thread
//! sees is exempt because tracing may attach mid-stack. Any fatal error
//! faults the stack and later events are refused.

use calltrace_types::{
    CompletionReason, ExceptionStatus, FunctionId, MethodInfo, SeqNo, StatusCode, ThreadId,
    TraceEvent, TransitionKind,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    CompletionOutcome, DetailedMethodFrame, ExceptionInfo, ExceptionTable, Frame, FrameArena,
    FrameId, FrameKind, MethodFrame, MethodResolver, MethodTable, SessionConfig, TraceError,
    TransitionFrame,
};

/// Non-fatal conditions absorbed while ingesting events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Completion for a throw that was never observed.
    UnknownExceptionCompletion { sequence: SeqNo },
    /// Call referenced a function id with no metadata; a placeholder was used.
    UnknownFunctionId {
        function_id: FunctionId,
        sequence: SeqNo,
    },
    /// Completion for an exception that was already resolved.
    RepeatedCompletion {
        sequence: SeqNo,
        status: ExceptionStatus,
    },
    CatcherWithoutException { function_id: FunctionId },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownExceptionCompletion { sequence } => {
                write!(f, "completion for unknown exception {sequence}")
            }
            Self::UnknownFunctionId {
                function_id,
                sequence,
            } => write!(
                f,
                "no metadata for function {function_id} at sequence {sequence}"
            ),
            Self::RepeatedCompletion { sequence, status } => write!(
                f,
                "exception {sequence} completed again, keeping status {status}"
            ),
            Self::CatcherWithoutException { function_id } => write!(
                f,
                "catcher entered in {function_id} with no outstanding exception"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadStack {
    thread_id: ThreadId,
    frames: FrameArena,
    current: FrameId,
    exceptions: ExceptionTable,
    last_sequence: Option<SeqNo>,
    config: SessionConfig,
    fault: Option<TraceError>,
    notices: VecDeque<Notice>,
}

impl ThreadStack {
    pub fn new(thread_id: ThreadId, thread_name: Option<String>, config: SessionConfig) -> Self {
        Self {
            thread_id,
            frames: FrameArena::new(thread_id, thread_name),
            current: FrameId::ROOT,
            exceptions: ExceptionTable::new(),
            last_sequence: None,
            config,
            fault: None,
            notices: VecDeque::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.frames.root().thread_name.as_deref()
    }

    pub fn set_thread_name(&mut self, name: impl Into<String>) {
        self.frames.set_thread_name(name);
    }

    pub fn frames(&self) -> &FrameArena {
        &self.frames
    }

    pub fn root(&self) -> FrameId {
        FrameId::ROOT
    }

    pub fn current(&self) -> FrameId {
        self.current
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.get(self.current)
    }

    pub fn exceptions(&self) -> &ExceptionTable {
        &self.exceptions
    }

    pub fn exception(&self, sequence: SeqNo) -> Option<&ExceptionInfo> {
        self.exceptions.get(sequence)
    }

    pub fn last_sequence(&self) -> Option<SeqNo> {
        self.last_sequence
    }

    /// Number of frames currently on the stack, root excluded.
    pub fn depth(&self) -> usize {
        self.frames.depth(self.current)
    }

    pub fn notices(&self) -> impl ExactSizeIterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn fault(&self) -> Option<&TraceError> {
        self.fault.as_ref()
    }

    // ── Event entry point ───────────────────────────────────────

    /// Applies one event. `MethodInfo` events are session-wide and ignored here.
    pub fn ingest(
        &mut self,
        event: &TraceEvent,
        methods: &impl MethodResolver,
    ) -> Result<(), TraceError> {
        if let Some(thread_id) = event.thread_id()
            && thread_id != self.thread_id
        {
            return Err(TraceError::internal(format!(
                "event for thread {thread_id} routed to thread {}",
                self.thread_id
            )));
        }

        match event {
            TraceEvent::MethodInfo(_) => Ok(()),
            TraceEvent::ThreadName(e) => {
                self.set_thread_name(e.name.as_str());
                Ok(())
            }
            TraceEvent::CallEnter(e) => self
                .call_enter(e.sequence, e.function_id, methods)
                .map(drop),
            TraceEvent::CallEnterDetailed(e) => self
                .call_enter_detailed(e.sequence, e.function_id, e.value.clone(), methods)
                .map(drop),
            TraceEvent::CallLeave(e) => self.call_leave(e.sequence, e.function_id).map(drop),
            TraceEvent::Tailcall(e) => self.tailcall(e.sequence, e.function_id).map(drop),
            TraceEvent::ExceptionFrameUnwind(e) => {
                self.frame_unwind(e.sequence, e.function_id).map(drop)
            }
            TraceEvent::CallLeaveDetailed(e)
            | TraceEvent::TailcallDetailed(e)
            | TraceEvent::ExceptionFrameUnwindDetailed(e) => self
                .leave_detailed(e.sequence, e.function_id, e.status, &e.value)
                .map(drop),
            TraceEvent::ExceptionThrown(e) => self.exception_thrown(e.sequence, &e.type_name),
            TraceEvent::ExceptionCatcherEnter(e) => self.exception_catcher_enter(e.function_id),
            TraceEvent::ExceptionCompleted(e) => self.exception_completed(e.sequence, e.reason),
            TraceEvent::UnmanagedTransition(e) => self
                .transition(
                    e.sequence,
                    e.function_id,
                    TransitionKind {
                        direction: e.direction,
                        reason: e.reason,
                    },
                    methods,
                )
                .map(drop),
        }
    }

    // ── Transitions ─────────────────────────────────────────────

    /// Pushes a new method frame under the current one and makes it current.
    pub fn call_enter(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
        methods: &impl MethodResolver,
    ) -> Result<FrameId, TraceError> {
        self.guarded(|stack| {
            stack.accept_sequence(sequence)?;
            let method = stack.resolve(function_id, sequence, methods);
            stack.push(FrameKind::Method(MethodFrame { method }), sequence)
        })
    }

    /// Like [`Self::call_enter`], keeping the captured parameter blob.
    pub fn call_enter_detailed(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
        parameters: Vec<u8>,
        methods: &impl MethodResolver,
    ) -> Result<FrameId, TraceError> {
        self.guarded(|stack| {
            stack.accept_sequence(sequence)?;
            let method = stack.resolve(function_id, sequence, methods);
            stack.push(
                FrameKind::MethodDetailed(DetailedMethodFrame {
                    method,
                    parameters,
                    return_value: None,
                }),
                sequence,
            )
        })
    }

    /// Pops the current frame. Returns the frame that left.
    pub fn call_leave(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
    ) -> Result<FrameId, TraceError> {
        self.guarded(|stack| stack.pop(sequence, function_id, None))
    }

    /// The calling frame simply ends: same as a leave.
    pub fn tailcall(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
    ) -> Result<FrameId, TraceError> {
        self.guarded(|stack| stack.pop(sequence, function_id, None))
    }

    /// A frame unwound by exception propagation pops like a normal return.
    pub fn frame_unwind(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
    ) -> Result<FrameId, TraceError> {
        self.guarded(|stack| stack.pop(sequence, function_id, None))
    }

    /// Detailed leave, tailcall or unwind. The return value is stored only
    /// when `status` is a success code and the frame was entered detailed.
    pub fn leave_detailed(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
        status: StatusCode,
        return_value: &[u8],
    ) -> Result<FrameId, TraceError> {
        self.guarded(|stack| stack.pop(sequence, function_id, Some((status, return_value))))
    }

    pub fn exception_thrown(&mut self, sequence: SeqNo, type_name: &str) -> Result<(), TraceError> {
        self.guarded(|stack| {
            stack.accept_sequence(sequence)?;
            let thrown_in = (stack.current != FrameId::ROOT).then_some(stack.current);
            stack.exceptions.record(sequence, type_name, thrown_in)?;
            debug!(
                thread_id = %stack.thread_id,
                sequence = %sequence,
                type_name,
                "exception thrown"
            );
            Ok(())
        })
    }

    /// Marks the current frame as handler of the innermost unresolved exception.
    pub fn exception_catcher_enter(&mut self, function_id: FunctionId) -> Result<(), TraceError> {
        self.guarded(|stack| {
            stack.verify_top(None, function_id)?;
            let handler = (stack.current != FrameId::ROOT).then_some(stack.current);
            match stack.exceptions.innermost_unresolved_mut() {
                Some(info) => {
                    info.handled_in = handler;
                    Ok(())
                }
                None => {
                    stack.notice(Notice::CatcherWithoutException { function_id });
                    Ok(())
                }
            }
        })
    }

    /// Resolves the exception thrown at `sequence`. Never moves the current frame.
    pub fn exception_completed(
        &mut self,
        sequence: SeqNo,
        reason: CompletionReason,
    ) -> Result<(), TraceError> {
        self.guarded(|stack| {
            match stack.exceptions.complete(sequence, reason) {
                CompletionOutcome::Resolved => {
                    debug!(
                        thread_id = %stack.thread_id,
                        sequence = %sequence,
                        status = %reason.status(),
                        "exception completed"
                    );
                }
                CompletionOutcome::UnknownSequence => {
                    stack.notice(Notice::UnknownExceptionCompletion { sequence });
                }
                CompletionOutcome::AlreadyResolved(status) => {
                    stack.notice(Notice::RepeatedCompletion { sequence, status });
                }
            }
            Ok(())
        })
    }

    /// Appends a transition leaf under the current frame without moving it.
    pub fn transition(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
        kind: TransitionKind,
        methods: &impl MethodResolver,
    ) -> Result<FrameId, TraceError> {
        self.guarded(|stack| {
            stack.accept_sequence(sequence)?;
            let method = stack.resolve(function_id, sequence, methods);
            let leaf = FrameKind::UnmanagedTransition(TransitionFrame { method, kind });
            let id = stack.frames.new_frame(leaf, sequence)?;
            stack.frames.attach(id, stack.current)?;
            Ok(id)
        })
    }

    /// Marks one unresolved exception superseded. False if unknown or terminal.
    pub fn supersede(&mut self, sequence: SeqNo) -> bool {
        self.exceptions.supersede(sequence)
    }

    /// Marks every unresolved exception superseded and returns their sequences.
    pub fn supersede_outstanding(&mut self) -> Vec<SeqNo> {
        let superseded = self.exceptions.supersede_unresolved();
        if !superseded.is_empty() {
            debug!(
                thread_id = %self.thread_id,
                count = superseded.len(),
                "superseded outstanding exceptions"
            );
        }
        superseded
    }

    /// Points frames still holding placeholders at real metadata from `methods`.
    pub fn refresh_methods(&mut self, methods: &MethodTable) -> usize {
        let mut refreshed = 0;
        let ids: Vec<FrameId> = self.frames.iter().map(|(id, _)| id).collect();
        for id in ids {
            let Some(slot) = self.frames.kind_mut(id).and_then(FrameKind::method_mut) else {
                continue;
            };
            if !slot.is_placeholder() {
                continue;
            }
            if let Some(real) = methods.get(slot.function_id)
                && !real.is_placeholder()
            {
                *slot = real;
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Starts a new trace window on this thread.
    ///
    /// Only the open call chain (root to current) is carried over, with its
    /// original sequences; finished frames, exceptions and notices are
    /// dropped. `last_sequence` is kept so contiguity still holds across the
    /// window boundary and pending leaves pop the carried frames.
    pub fn restart_window(&mut self) -> Result<(), TraceError> {
        let mut chain = Vec::new();
        let mut cursor = self.current;
        while cursor != FrameId::ROOT {
            chain.push(cursor);
            let Some(parent) = self.frames.get(cursor).and_then(Frame::parent) else {
                return Err(TraceError::internal(format!(
                    "open frame {cursor:?} is detached from the root"
                )));
            };
            cursor = parent;
        }

        let mut frames = FrameArena::with_root(self.frames.root().clone());
        let mut current = FrameId::ROOT;
        for &frame in chain.iter().rev() {
            current = self.frames.clone_with_new_parent(frame, &mut frames, current)?;
        }

        debug!(
            thread_id = %self.thread_id,
            carried = chain.len(),
            dropped = self.frames.len() - chain.len() - 1,
            "window restarted"
        );
        self.frames = frames;
        self.current = current;
        self.exceptions = ExceptionTable::new();
        self.notices.clear();
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────

    fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, TraceError>,
    ) -> Result<T, TraceError> {
        if self.fault.is_some() {
            return Err(TraceError::StackFaulted {
                thread_id: self.thread_id,
            });
        }
        let result = op(self);
        if let Err(err) = &result {
            warn!(thread_id = %self.thread_id, %err, "thread stack faulted");
            self.fault = Some(err.clone());
        }
        result
    }

    fn accept_sequence(&mut self, sequence: SeqNo) -> Result<(), TraceError> {
        if let Some(last) = self.last_sequence {
            let Some(expected) = last.next() else {
                return Err(TraceError::internal(format!(
                    "thread {}: sequence space exhausted after {last}",
                    self.thread_id
                )));
            };
            if sequence != expected {
                return Err(TraceError::SequenceGap {
                    thread_id: self.thread_id,
                    expected,
                    actual: sequence,
                });
            }
        }
        self.last_sequence = Some(sequence);
        Ok(())
    }

    fn resolve(
        &mut self,
        function_id: FunctionId,
        sequence: SeqNo,
        methods: &impl MethodResolver,
    ) -> Arc<MethodInfo> {
        let method = methods.resolve(function_id);
        if method.is_placeholder() {
            self.notice(Notice::UnknownFunctionId {
                function_id,
                sequence,
            });
        }
        method
    }

    fn push(&mut self, kind: FrameKind, sequence: SeqNo) -> Result<FrameId, TraceError> {
        let id = self.frames.new_frame(kind, sequence)?;
        self.frames.attach(id, self.current)?;
        self.current = id;
        Ok(id)
    }

    fn pop(
        &mut self,
        sequence: SeqNo,
        function_id: FunctionId,
        returned: Option<(StatusCode, &[u8])>,
    ) -> Result<FrameId, TraceError> {
        self.accept_sequence(sequence)?;
        let top = self.current;
        let Some(parent) = self.frames.get(top).and_then(Frame::parent) else {
            return Err(TraceError::RootUnderflow {
                thread_id: self.thread_id,
                sequence,
                function_id,
            });
        };
        self.verify_top(Some(sequence), function_id)?;

        if let Some((status, value)) = returned
            && status.is_success()
            && let Some(FrameKind::MethodDetailed(frame)) = self.frames.kind_mut(top)
        {
            frame.return_value = Some(value.to_vec());
        }

        self.current = parent;
        Ok(top)
    }

    fn verify_top(&self, sequence: Option<SeqNo>, function_id: FunctionId) -> Result<(), TraceError> {
        if !self.config.verify_leaves {
            return Ok(());
        }
        let Some(method) = self.frames.get(self.current).and_then(Frame::method) else {
            return Ok(());
        };
        if method.function_id != function_id {
            return Err(TraceError::FrameMismatch {
                thread_id: self.thread_id,
                sequence,
                on_stack: method.function_id,
                event: function_id,
            });
        }
        Ok(())
    }

    fn notice(&mut self, notice: Notice) {
        debug!(thread_id = %self.thread_id, %notice, "non-fatal trace condition");
        if self.config.max_notices == 0 {
            return;
        }
        if self.notices.len() == self.config.max_notices {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }
}
