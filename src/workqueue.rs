//! # Work queue
//!
//! Pending and active invocations for one process controller (§4.5),
//! grounded in `original_source/process/controller/include/praas/process/controller/workers.hpp`'s
//! `WorkQueue`/`Invocation` pair. The pending FIFO is a `VecDeque<String>`
//! of invocation keys rather than raw pointers (the original's
//! `vector<Invocation*>` with erase-in-middle becomes a deque with
//! `remove(index)`, which is the same O(n) compaction without unsafe
//! pointer bookkeeping).

use std::collections::{HashMap, VecDeque};

use crate::common::Buffer;
use crate::error::PraasError;
use crate::registry::{FunctionRegistry, Trigger};
use crate::util::current_timestamp_ms;

/// Where an invocation came from, needed to route its eventual result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationSource {
    Local,
    DataPlane,
    ControlPlane,
    Peer(String),
}

/// An in-flight call to a user function.
#[derive(Debug)]
pub struct Invocation {
    pub id: String,
    pub function_name: String,
    pub source: InvocationSource,
    pub payloads: Vec<Buffer>,
    pub trigger: Trigger,
    pub start_time_ms: u64,
}

impl Invocation {
    pub fn elapsed_ms(&self) -> u64 {
        current_timestamp_ms().saturating_sub(self.start_time_ms)
    }
}

/// A finished invocation, handed back by [`WorkQueue::finish`] together
/// with the time it spent in flight.
pub struct CompletedInvocation {
    pub invocation: Invocation,
    pub elapsed_ms: u64,
}

/// Pending + active invocations, gated by each function's [`Trigger`].
pub struct WorkQueue {
    pending: VecDeque<String>,
    invocations: HashMap<String, Invocation>,
    registry: FunctionRegistry,
}

impl WorkQueue {
    pub fn new(registry: FunctionRegistry) -> Self {
        WorkQueue {
            pending: VecDeque::new(),
            invocations: HashMap::new(),
            registry,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Appends `payload` to the invocation keyed by `key`, creating it if
    /// it doesn't yet exist. Rejects unknown function names and trigger
    /// kinds with no specified readiness rule before anything is enqueued,
    /// so a not-yet-implemented trigger never sits in the pending queue
    /// blocking unrelated invocations (§9 Open Questions).
    pub fn add_payload(
        &mut self,
        function_name: &str,
        key: &str,
        payload: Buffer,
        source: InvocationSource,
    ) -> Result<(), PraasError> {
        if let Some(invocation) = self.invocations.get_mut(key) {
            invocation.payloads.push(payload);
            return Ok(());
        }

        let entry = self.registry.get(function_name).ok_or_else(|| {
            PraasError::ObjectDoesNotExist(format!("unknown function: {function_name}"))
        })?;

        if !matches!(entry.trigger.kind, crate::registry::TriggerKind::Direct) {
            return Err(PraasError::NotImplemented(format!(
                "trigger kind {} is not supported",
                entry.trigger.kind.name()
            )));
        }

        let invocation = Invocation {
            id: key.to_string(),
            function_name: function_name.to_string(),
            source,
            payloads: vec![payload],
            trigger: entry.trigger,
            start_time_ms: current_timestamp_ms(),
        };

        self.invocations.insert(key.to_string(), invocation);
        self.pending.push_back(key.to_string());
        Ok(())
    }

    /// Scans the pending FIFO in order and returns the first invocation
    /// whose trigger reports ready, removing only that entry from
    /// pending. Invocations whose trigger errors are left in place; the
    /// caller decides whether that's a bug (today, none ever reach this
    /// state, since `add_payload` refuses unsupported triggers up front).
    pub fn next(&mut self) -> Result<Option<String>, PraasError> {
        let mut ready_index = None;
        for (index, key) in self.pending.iter().enumerate() {
            let invocation = self
                .invocations
                .get(key)
                .expect("pending entries always reference a live invocation");
            if invocation.trigger.ready(invocation, self)? {
                ready_index = Some(index);
                break;
            }
        }

        Ok(ready_index.map(|index| self.pending.remove(index).expect("index came from iteration")))
    }

    /// Removes and returns the completed invocation keyed by `key`.
    pub fn finish(&mut self, key: &str) -> Option<CompletedInvocation> {
        self.invocations.remove(key).map(|invocation| {
            let elapsed_ms = invocation.elapsed_ms();
            CompletedInvocation {
                invocation,
                elapsed_ms,
            }
        })
    }

    pub fn get(&self, key: &str) -> Option<&Invocation> {
        self.invocations.get(key)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
    {
        "functions": {
            "cpp": {
                "hello-world": {"code": {"module": "m", "function": "hello_world"}, "trigger": {"type": "direct"}},
                "pipe": {"code": {"module": "m", "function": "pipe"}, "trigger": {"type": "pipeline"}}
            }
        }
    }
    "#;

    fn queue() -> WorkQueue {
        WorkQueue::new(FunctionRegistry::load(MANIFEST, "cpp").unwrap())
    }

    #[test]
    fn direct_invocation_is_immediately_ready() {
        let mut q = queue();
        q.add_payload("hello-world", "inv-1", Buffer::from(vec![]), InvocationSource::Local)
            .unwrap();
        assert_eq!(q.pending_len(), 1);

        let ready = q.next().unwrap();
        assert_eq!(ready.as_deref(), Some("inv-1"));
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.active_len(), 1);
    }

    #[test]
    fn second_add_payload_with_same_key_appends_instead_of_recreating() {
        let mut q = queue();
        q.add_payload("hello-world", "inv-1", Buffer::from(vec![1]), InvocationSource::Local)
            .unwrap();
        q.add_payload("hello-world", "inv-1", Buffer::from(vec![2]), InvocationSource::Local)
            .unwrap();
        assert_eq!(q.pending_len(), 1);
        assert_eq!(q.get("inv-1").unwrap().payloads.len(), 2);
    }

    #[test]
    fn unknown_function_is_rejected_and_not_enqueued() {
        let mut q = queue();
        let err = q
            .add_payload("missing", "inv-1", Buffer::from(vec![]), InvocationSource::Local)
            .unwrap_err();
        assert!(matches!(err, PraasError::ObjectDoesNotExist(_)));
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn unimplemented_trigger_kind_is_refused_up_front() {
        let mut q = queue();
        let err = q
            .add_payload("pipe", "inv-1", Buffer::from(vec![]), InvocationSource::Local)
            .unwrap_err();
        assert!(matches!(err, PraasError::NotImplemented(_)));
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.active_len(), 0);
    }

    #[test]
    fn finish_removes_the_invocation_and_reports_elapsed_time() {
        let mut q = queue();
        q.add_payload("hello-world", "inv-1", Buffer::from(vec![]), InvocationSource::Local)
            .unwrap();
        q.next().unwrap();

        let completed = q.finish("inv-1").unwrap();
        assert_eq!(completed.invocation.id, "inv-1");
        assert!(q.finish("inv-1").is_none());
    }
}
