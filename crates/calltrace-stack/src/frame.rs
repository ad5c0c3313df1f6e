//! Arena-backed call tree for one thread.
//!
//! Frames live in a growable vector and refer to each other by [`FrameId`].
//! The parent's `children` list is the only ownership edge; `parent` is a
//! plain back-reference. Nothing is ever removed from the arena, so the tree
//! is a permanent record of every frame that was entered.

use calltrace_types::{MethodInfo, SeqNo, ThreadId, TransitionKind};
use std::sync::Arc;

use crate::TraceError;

/// Stable index of a frame inside its [`FrameArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(u32);

impl FrameId {
    /// Every arena stores its thread's root frame at index zero.
    pub const ROOT: Self = Self(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn try_from_index(index: usize) -> Result<Self, TraceError> {
        u32::try_from(index)
            .map(Self)
            .map_err(|_| TraceError::internal(format!("frame index {index} exceeds u32::MAX")))
    }
}

/// Synthetic top-of-stack sentinel for one thread. Never popped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootFrame {
    pub thread_id: ThreadId,
    pub thread_name: Option<String>,
}

/// One call activation.
#[derive(Clone, Debug)]
pub struct MethodFrame {
    pub method: Arc<MethodInfo>,
}

/// Call activation from a detailed trace, with raw captured value blobs.
#[derive(Clone, Debug)]
pub struct DetailedMethodFrame {
    pub method: Arc<MethodInfo>,
    pub parameters: Vec<u8>,
    /// Only present when the leave reported success.
    pub return_value: Option<Vec<u8>>,
}

/// Boundary crossing between managed and unmanaged code.
#[derive(Clone, Debug)]
pub struct TransitionFrame {
    pub method: Arc<MethodInfo>,
    pub kind: TransitionKind,
}

#[derive(Clone, Debug)]
pub enum FrameKind {
    Root(RootFrame),
    Method(MethodFrame),
    MethodDetailed(DetailedMethodFrame),
    UnmanagedTransition(TransitionFrame),
}

impl FrameKind {
    /// Method of any method-shaped frame; `None` for the root.
    pub fn method(&self) -> Option<&Arc<MethodInfo>> {
        match self {
            Self::Root(_) => None,
            Self::Method(frame) => Some(&frame.method),
            Self::MethodDetailed(frame) => Some(&frame.method),
            Self::UnmanagedTransition(frame) => Some(&frame.method),
        }
    }

    pub(crate) fn method_mut(&mut self) -> Option<&mut Arc<MethodInfo>> {
        match self {
            Self::Root(_) => None,
            Self::Method(frame) => Some(&mut frame.method),
            Self::MethodDetailed(frame) => Some(&mut frame.method),
            Self::UnmanagedTransition(frame) => Some(&mut frame.method),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root(_))
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    parent: Option<FrameId>,
    children: Vec<FrameId>,
    sequence: Option<SeqNo>,
    kind: FrameKind,
}

impl Frame {
    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    /// Children in the order they were attached.
    pub fn children(&self) -> &[FrameId] {
        &self.children
    }

    /// Sequence of the event that created this frame. `None` for roots.
    pub fn sequence(&self) -> Option<SeqNo> {
        self.sequence
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn method(&self) -> Option<&Arc<MethodInfo>> {
        self.kind.method()
    }
}

#[derive(Clone, Debug)]
pub struct FrameArena {
    frames: Vec<Frame>,
}

impl FrameArena {
    pub fn new(thread_id: ThreadId, thread_name: Option<String>) -> Self {
        Self::with_root(RootFrame {
            thread_id,
            thread_name,
        })
    }

    pub fn with_root(root: RootFrame) -> Self {
        Self {
            frames: vec![Frame {
                parent: None,
                children: Vec::new(),
                sequence: None,
                kind: FrameKind::Root(root),
            }],
        }
    }

    pub fn root(&self) -> &RootFrame {
        match &self.frames[FrameId::ROOT.index()].kind {
            FrameKind::Root(root) => root,
            _ => unreachable!("frame arena invariant violated: index 0 must be the root"),
        }
    }

    pub fn set_thread_name(&mut self, name: impl Into<String>) {
        if let FrameKind::Root(root) = &mut self.frames[FrameId::ROOT.index()].kind {
            root.thread_name = Some(name.into());
        }
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id.index())
    }

    pub(crate) fn kind_mut(&mut self, id: FrameId) -> Option<&mut FrameKind> {
        self.frames.get_mut(id.index()).map(|frame| &mut frame.kind)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false: the root is allocated up front.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &Frame)> {
        self.frames
            .iter()
            .enumerate()
            // alloc range-checks every stored index
            .map(|(index, frame)| (FrameId(index as u32), frame))
    }

    /// Allocates a detached method frame (no parent, no children).
    pub fn new_method_frame(
        &mut self,
        method: Arc<MethodInfo>,
        sequence: SeqNo,
    ) -> Result<FrameId, TraceError> {
        self.alloc(FrameKind::Method(MethodFrame { method }), Some(sequence))
    }

    /// Allocates a detached frame of any non-root kind.
    pub fn new_frame(&mut self, kind: FrameKind, sequence: SeqNo) -> Result<FrameId, TraceError> {
        if kind.is_root() {
            return Err(TraceError::internal("an arena holds exactly one root frame"));
        }
        self.alloc(kind, Some(sequence))
    }

    fn alloc(&mut self, kind: FrameKind, sequence: Option<SeqNo>) -> Result<FrameId, TraceError> {
        let id = FrameId::try_from_index(self.frames.len())?;
        self.frames.push(Frame {
            parent: None,
            children: Vec::new(),
            sequence,
            kind,
        });
        Ok(id)
    }

    /// Sets `frame.parent = parent` and appends `frame` to the parent's children.
    pub fn attach(&mut self, frame: FrameId, parent: FrameId) -> Result<(), TraceError> {
        let Some(node) = self.get(frame) else {
            return Err(TraceError::internal(format!("attach of unknown frame {frame:?}")));
        };
        if node.kind.is_root() {
            return Err(TraceError::internal("the root frame cannot be attached"));
        }
        if let Some(existing) = node.parent {
            return Err(TraceError::internal(format!(
                "frame {frame:?} is already attached to {existing:?}"
            )));
        }
        if self.get(parent).is_none() {
            return Err(TraceError::internal(format!("attach to unknown parent {parent:?}")));
        }

        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if ancestor == frame {
                return Err(TraceError::internal(format!(
                    "attaching {frame:?} under {parent:?} would create a cycle"
                )));
            }
            cursor = self.frames[ancestor.index()].parent;
        }

        self.frames[frame.index()].parent = Some(parent);
        self.frames[parent.index()].children.push(frame);
        Ok(())
    }

    /// Walks parent links up to the thread's root frame.
    pub fn get_root(&self, frame: FrameId) -> Result<FrameId, TraceError> {
        let mut cursor = frame;
        for _ in 0..=self.frames.len() {
            let Some(node) = self.get(cursor) else {
                return Err(TraceError::internal(format!(
                    "parent chain of {frame:?} reaches unknown frame {cursor:?}"
                )));
            };
            match node.parent {
                Some(parent) => cursor = parent,
                None if node.kind.is_root() => return Ok(cursor),
                None => {
                    return Err(TraceError::internal(format!(
                        "parent chain of {frame:?} ends at detached frame {cursor:?}"
                    )));
                }
            }
        }
        Err(TraceError::internal(format!(
            "parent chain of {frame:?} contains a cycle"
        )))
    }

    /// Number of method frames between `frame` and its root.
    pub fn depth(&self, frame: FrameId) -> usize {
        let mut depth = 0;
        let mut cursor = self.get(frame).and_then(|node| node.parent);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.frames[parent.index()].parent;
        }
        depth
    }

    /// Copies one frame's value fields into `dest`, attached under `new_parent`.
    ///
    /// Children are not copied; the original tree is left untouched.
    pub fn clone_with_new_parent(
        &self,
        frame: FrameId,
        dest: &mut FrameArena,
        new_parent: FrameId,
    ) -> Result<FrameId, TraceError> {
        let Some(node) = self.get(frame) else {
            return Err(TraceError::internal(format!("clone of unknown frame {frame:?}")));
        };
        let Some(sequence) = node.sequence else {
            return Err(TraceError::internal("root frames cannot be re-parented"));
        };
        let copy = dest.new_frame(node.kind.clone(), sequence)?;
        dest.attach(copy, new_parent)?;
        Ok(copy)
    }
}
