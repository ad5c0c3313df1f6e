use calltrace_types::{FunctionId, MethodInfo};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Maps function ids to method metadata while events are being ingested.
pub trait MethodResolver {
    /// Never fails: unknown ids resolve to a placeholder.
    fn resolve(&self, function_id: FunctionId) -> Arc<MethodInfo>;
}

/// Session-wide function id -> metadata table.
///
/// Records are immutable once shared. Late metadata replaces a placeholder
/// with a new `Arc`; frames holding the placeholder keep it until refreshed.
#[derive(Debug, Default)]
pub struct MethodTable {
    methods: DashMap<FunctionId, Arc<MethodInfo>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces metadata for `info.function_id`.
    pub fn insert(&self, mut info: MethodInfo) -> Arc<MethodInfo> {
        match self.methods.entry(info.function_id) {
            Entry::Occupied(mut slot) => {
                let previous = slot.get();
                info.was_unknown = previous.is_placeholder() || previous.was_unknown;
                let info = Arc::new(info);
                slot.insert(Arc::clone(&info));
                info
            }
            Entry::Vacant(slot) => {
                let info = Arc::new(info);
                slot.insert(Arc::clone(&info));
                info
            }
        }
    }

    pub fn get(&self, function_id: FunctionId) -> Option<Arc<MethodInfo>> {
        self.methods
            .get(&function_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Every known method, ordered by function id.
    pub fn all(&self) -> Vec<Arc<MethodInfo>> {
        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        methods.sort_by_key(|info| info.function_id);
        methods
    }
}

impl MethodResolver for MethodTable {
    fn resolve(&self, function_id: FunctionId) -> Arc<MethodInfo> {
        let entry = self
            .methods
            .entry(function_id)
            .or_insert_with(|| Arc::new(MethodInfo::placeholder(function_id)));
        Arc::clone(entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: i64, name: &str) -> MethodInfo {
        MethodInfo::new(FunctionId(id), "/app/App.dll", "App.Program", name).unwrap()
    }

    #[test]
    fn resolve_synthesizes_placeholder_once() {
        let table = MethodTable::new();
        let first = table.resolve(FunctionId(999));
        let second = table.resolve(FunctionId(999));
        assert!(first.is_placeholder());
        assert_eq!(first.module_name(), "Unknown");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn late_metadata_replaces_placeholder() {
        let table = MethodTable::new();
        let placeholder = table.resolve(FunctionId(5));
        let real = table.insert(info(5, "Run"));

        assert!(real.was_unknown);
        assert!(!real.is_placeholder());
        assert!(placeholder.is_placeholder());
        assert!(Arc::ptr_eq(&table.resolve(FunctionId(5)), &real));
    }

    #[test]
    fn metadata_before_use_is_not_marked_unknown() {
        let table = MethodTable::new();
        let real = table.insert(info(1, "Main"));
        assert!(!real.was_unknown);

        let replaced = table.insert(info(1, "Main2"));
        assert!(!replaced.was_unknown);
        assert_eq!(table.get(FunctionId(1)).unwrap().method_name, "Main2");
    }

    #[test]
    fn all_is_sorted() {
        let table = MethodTable::new();
        table.insert(info(3, "C"));
        table.insert(info(1, "A"));
        table.resolve(FunctionId(2));
        let ids: Vec<_> = table.all().iter().map(|m| m.function_id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
