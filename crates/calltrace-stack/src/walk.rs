//! Frame identity and tree traversal helpers for consumers of the trace.

use calltrace_types::MethodInfo;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::Arc;

use crate::{Frame, FrameArena, FrameId, TraceError};

/// A frame viewed through its arena, compared by method identity.
///
/// Method-shaped frames are equal when their methods share a function id,
/// regardless of sequence. Roots compare by arena and index.
#[derive(Clone, Copy, Debug)]
pub struct FrameRef<'a> {
    arena: &'a FrameArena,
    id: FrameId,
}

impl<'a> FrameRef<'a> {
    pub fn new(arena: &'a FrameArena, id: FrameId) -> Self {
        Self { arena, id }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn frame(&self) -> Option<&'a Frame> {
        self.arena.get(self.id)
    }

    pub fn method(&self) -> Option<&'a Arc<MethodInfo>> {
        self.frame().and_then(Frame::method)
    }
}

impl PartialEq for FrameRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self.method(), other.method()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => ptr::eq(self.arena, other.arena) && self.id == other.id,
            _ => false,
        }
    }
}

impl Eq for FrameRef<'_> {}

impl Hash for FrameRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.method() {
            Some(method) => {
                1u8.hash(state);
                method.hash(state);
            }
            None => {
                0u8.hash(state);
                ptr::hash(self.arena, state);
                self.id.hash(state);
            }
        }
    }
}

/// Lazy depth-first pre-order walk yielding `(frame, depth)`.
///
/// Depth is relative to the starting frame. Clone it, or call
/// [`Walk::restart`], to run the walk again.
#[derive(Clone, Debug)]
pub struct Walk<'a> {
    arena: &'a FrameArena,
    start: FrameId,
    pending: Vec<(FrameId, usize)>,
}

impl<'a> Walk<'a> {
    pub fn new(arena: &'a FrameArena, start: FrameId) -> Self {
        Self {
            arena,
            start,
            pending: vec![(start, 0)],
        }
    }

    pub fn restart(&mut self) {
        self.pending.clear();
        self.pending.push((self.start, 0));
    }
}

impl Iterator for Walk<'_> {
    type Item = (FrameId, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (id, depth) = self.pending.pop()?;
            let Some(frame) = self.arena.get(id) else {
                continue;
            };
            self.pending
                .extend(frame.children().iter().rev().map(|&child| (child, depth + 1)));
            return Some((id, depth));
        }
    }
}

impl FrameArena {
    pub fn walk(&self, start: FrameId) -> Walk<'_> {
        Walk::new(self, start)
    }
}

/// Builds a new tree holding every frame matching `keep` plus its ancestors.
///
/// Frames are copied with [`FrameArena::clone_with_new_parent`]; `arena` is
/// not modified. With `unique`, siblings that are equal as [`FrameRef`]s are
/// merged into the first one.
pub fn filter_tree(
    arena: &FrameArena,
    mut keep: impl FnMut(FrameRef<'_>) -> bool,
    unique: bool,
) -> Result<FrameArena, TraceError> {
    let mut kept = BTreeSet::new();
    for (id, _) in arena.walk(FrameId::ROOT) {
        if id == FrameId::ROOT || !keep(FrameRef::new(arena, id)) {
            continue;
        }
        let mut cursor = Some(id);
        while let Some(ancestor) = cursor {
            if !kept.insert(ancestor) {
                break;
            }
            cursor = arena.get(ancestor).and_then(Frame::parent);
        }
    }

    let mut filtered = FrameArena::with_root(arena.root().clone());
    let mut mapped = BTreeMap::from([(FrameId::ROOT, FrameId::ROOT)]);
    for (id, _) in arena.walk(FrameId::ROOT) {
        if id == FrameId::ROOT || !kept.contains(&id) {
            continue;
        }
        let parent = arena.get(id).and_then(Frame::parent);
        let Some(&new_parent) = parent.and_then(|parent| mapped.get(&parent)) else {
            return Err(TraceError::internal(format!(
                "filtered frame {id:?} has no copied parent"
            )));
        };

        if unique {
            let original = FrameRef::new(arena, id);
            let existing = filtered.get(new_parent).and_then(|parent| {
                parent
                    .children()
                    .iter()
                    .copied()
                    .find(|&sibling| FrameRef::new(&filtered, sibling) == original)
            });
            if let Some(existing) = existing {
                mapped.insert(id, existing);
                continue;
            }
        }

        let copy = arena.clone_with_new_parent(id, &mut filtered, new_parent)?;
        mapped.insert(id, copy);
    }
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MethodTable, SessionConfig, ThreadStack};
    use calltrace_types::{FunctionId, SeqNo, ThreadId};
    use std::collections::HashSet;

    const MAIN: FunctionId = FunctionId(1);
    const LOAD: FunctionId = FunctionId(2);
    const PARSE: FunctionId = FunctionId(3);
    const LOG: FunctionId = FunctionId(4);

    fn methods() -> MethodTable {
        let methods = MethodTable::new();
        for (id, name) in [(MAIN, "Main"), (LOAD, "Load"), (PARSE, "Parse"), (LOG, "Log")] {
            methods.insert(MethodInfo::new(id, "/app/App.dll", "App.Program", name).unwrap());
        }
        methods
    }

    /// Main { Load { Parse, Log }, Load { Parse }, Log }
    fn sample() -> ThreadStack {
        let methods = methods();
        let mut stack = ThreadStack::new(ThreadId(1), None, SessionConfig::default());
        let mut seq = 0;
        let mut next = || {
            seq += 1;
            SeqNo(seq)
        };
        stack.call_enter(next(), MAIN, &methods).unwrap();
        stack.call_enter(next(), LOAD, &methods).unwrap();
        stack.call_enter(next(), PARSE, &methods).unwrap();
        stack.call_leave(next(), PARSE).unwrap();
        stack.call_enter(next(), LOG, &methods).unwrap();
        stack.call_leave(next(), LOG).unwrap();
        stack.call_leave(next(), LOAD).unwrap();
        stack.call_enter(next(), LOAD, &methods).unwrap();
        stack.call_enter(next(), PARSE, &methods).unwrap();
        stack.call_leave(next(), PARSE).unwrap();
        stack.call_leave(next(), LOAD).unwrap();
        stack.call_enter(next(), LOG, &methods).unwrap();
        stack.call_leave(next(), LOG).unwrap();
        stack.call_leave(next(), MAIN).unwrap();
        stack
    }

    fn outline(arena: &FrameArena) -> Vec<(String, usize)> {
        arena
            .walk(FrameId::ROOT)
            .skip(1)
            .map(|(id, depth)| {
                let method = arena.get(id).unwrap().method().unwrap();
                (method.method_name.clone(), depth)
            })
            .collect()
    }

    #[test]
    fn frames_equal_by_method_not_sequence() {
        let methods = methods();
        let mut stack = ThreadStack::new(ThreadId(1), None, SessionConfig::default());
        let a = stack.call_enter(SeqNo(1), MAIN, &methods).unwrap();
        stack.call_leave(SeqNo(2), MAIN).unwrap();
        let b = stack.call_enter(SeqNo(3), MAIN, &methods).unwrap();
        let c = stack.call_enter(SeqNo(4), LOAD, &methods).unwrap();

        let arena = stack.frames();
        assert_eq!(FrameRef::new(arena, a), FrameRef::new(arena, b));
        assert_ne!(FrameRef::new(arena, a), FrameRef::new(arena, c));

        let set: HashSet<_> = [a, b, c].map(|id| FrameRef::new(arena, id)).into();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn roots_compare_by_identity() {
        let one = FrameArena::new(ThreadId(1), None);
        let two = FrameArena::new(ThreadId(1), None);
        assert_eq!(FrameRef::new(&one, FrameId::ROOT), FrameRef::new(&one, FrameId::ROOT));
        assert_ne!(FrameRef::new(&one, FrameId::ROOT), FrameRef::new(&two, FrameId::ROOT));
    }

    #[test]
    fn walk_is_preorder_and_restartable() {
        let stack = sample();
        let expected = vec![
            ("Main".to_owned(), 1),
            ("Load".to_owned(), 2),
            ("Parse".to_owned(), 3),
            ("Log".to_owned(), 3),
            ("Load".to_owned(), 2),
            ("Parse".to_owned(), 3),
            ("Log".to_owned(), 2),
        ];
        assert_eq!(outline(stack.frames()), expected);

        let mut walk = stack.frames().walk(FrameId::ROOT);
        let first: Vec<_> = walk.by_ref().collect();
        assert!(walk.next().is_none());
        walk.restart();
        assert_eq!(walk.collect::<Vec<_>>(), first);
    }

    #[test]
    fn filter_keeps_matches_and_ancestors() {
        let stack = sample();
        let filtered = filter_tree(
            stack.frames(),
            |frame| frame.method().is_some_and(|m| m.function_id == PARSE),
            false,
        )
        .unwrap();

        assert_eq!(
            outline(&filtered),
            vec![
                ("Main".to_owned(), 1),
                ("Load".to_owned(), 2),
                ("Parse".to_owned(), 3),
                ("Load".to_owned(), 2),
                ("Parse".to_owned(), 3),
            ]
        );
        // the source tree is untouched
        assert_eq!(stack.frames().len(), 8);
    }

    #[test]
    fn unique_filter_merges_equal_siblings() {
        let stack = sample();
        let filtered = filter_tree(stack.frames(), |_| true, true).unwrap();
        assert_eq!(
            outline(&filtered),
            vec![
                ("Main".to_owned(), 1),
                ("Load".to_owned(), 2),
                ("Parse".to_owned(), 3),
                ("Log".to_owned(), 3),
                ("Log".to_owned(), 2),
            ]
        );
    }
}
