//! Routes the event stream to per-thread stacks.
//!
//! The session never checks ordering across threads: each thread has its own
//! sequence space and all consistency failures come from [`ThreadStack`].
//!
//! Thread events hold `window` shared; [`Session::reset`] and
//! [`Session::next_window`] hold it exclusively, so a window boundary never
//! lands between routing an event and applying it.

use calltrace_types::{MethodInfo, MethodInfoEvent, ThreadId, ThreadNameEvent, TraceEvent};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{MethodTable, SessionConfig, ThreadStack, TraceError};

pub type SharedThreadStack = Arc<Mutex<ThreadStack>>;

#[derive(Debug, Default)]
pub struct Session {
    config: SessionConfig,
    methods: MethodTable,
    threads: DashMap<ThreadId, SharedThreadStack>,
    /// Names seen so far; outlives resets and stacks created later.
    thread_names: DashMap<ThreadId, String>,
    window: RwLock<()>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// Applies one event. Safe to call from several pump threads at once, as
    /// long as each thread id is fed from one place in order.
    pub fn on_event(&self, event: &TraceEvent) -> Result<(), TraceError> {
        match event {
            TraceEvent::MethodInfo(e) => {
                self.on_method_info(e);
                Ok(())
            }
            TraceEvent::ThreadName(e) => {
                self.on_thread_name(e);
                Ok(())
            }
            _ => {
                let Some(thread_id) = event.thread_id() else {
                    return Err(TraceError::internal("thread event without a thread id"));
                };
                let _window = self.window.read();
                let stack = self.thread_or_create(thread_id);
                let mut stack = stack.lock();
                stack.ingest(event, &self.methods)
            }
        }
    }

    fn on_method_info(&self, e: &MethodInfoEvent) {
        match MethodInfo::new(
            e.function_id,
            e.module_path.as_str(),
            e.type_name.as_str(),
            e.method_name.as_str(),
        ) {
            Ok(info) => {
                let info = self.methods.insert(info);
                debug!(
                    function_id = %info.function_id,
                    method = %info,
                    was_unknown = info.was_unknown,
                    "method metadata"
                );
            }
            Err(err) => {
                warn!(function_id = %e.function_id, %err, "ignoring malformed method metadata");
            }
        }
    }

    fn on_thread_name(&self, e: &ThreadNameEvent) {
        self.thread_names.insert(e.thread_id, e.name.clone());
        if let Some(stack) = self.thread(e.thread_id) {
            stack.lock().set_thread_name(e.name.as_str());
        }
    }

    fn thread_or_create(&self, thread_id: ThreadId) -> SharedThreadStack {
        let entry = self.threads.entry(thread_id).or_insert_with(|| {
            let name = self
                .thread_names
                .get(&thread_id)
                .map(|name| name.value().clone());
            debug!(thread_id = %thread_id, ?name, "new thread stack");
            Arc::new(Mutex::new(ThreadStack::new(thread_id, name, self.config)))
        });
        Arc::clone(entry.value())
    }

    pub fn thread(&self, thread_id: ThreadId) -> Option<SharedThreadStack> {
        self.threads
            .get(&thread_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn thread_name(&self, thread_id: ThreadId) -> Option<String> {
        self.thread_names
            .get(&thread_id)
            .map(|name| name.value().clone())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn shared_stacks(&self) -> Vec<SharedThreadStack> {
        let mut stacks: Vec<_> = self
            .threads
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        stacks.sort_by_key(|(thread_id, _)| *thread_id);
        stacks.into_iter().map(|(_, stack)| stack).collect()
    }

    /// Copies of every thread stack, ordered by thread id.
    pub fn snapshot(&self) -> Vec<ThreadStack> {
        self.shared_stacks()
            .iter()
            .map(|stack| stack.lock().clone())
            .collect()
    }

    /// Drops all thread stacks and their exception tables. Method metadata and
    /// thread names are kept. Waits for in-flight thread events to finish.
    pub fn reset(&self) {
        let _window = self.window.write();
        let dropped = self.threads.len();
        self.threads.clear();
        debug!(dropped, "session reset");
    }

    /// Starts a new observation window without losing calls still in flight.
    ///
    /// Threads with open frames keep only their root..current chain and their
    /// last sequence number, so later leaves still match. Idle and faulted
    /// threads are dropped and start over on their next event. Returns the
    /// number of threads carried into the new window.
    pub fn next_window(&self) -> usize {
        let _window = self.window.write();
        let before = self.threads.len();
        self.threads.retain(|thread_id, stack| {
            let mut stack = stack.lock();
            if stack.is_faulted() || stack.depth() == 0 {
                return false;
            }
            match stack.restart_window() {
                Ok(()) => true,
                Err(err) => {
                    warn!(thread_id = %thread_id, %err, "dropping thread at window boundary");
                    false
                }
            }
        });
        let carried = self.threads.len();
        debug!(carried, dropped = before - carried, "next window");
        carried
    }

    /// Re-points frames holding placeholders at metadata that arrived later.
    pub fn refresh_placeholders(&self) -> usize {
        self.shared_stacks()
            .iter()
            .map(|stack| stack.lock().refresh_methods(&self.methods))
            .sum()
    }
}
