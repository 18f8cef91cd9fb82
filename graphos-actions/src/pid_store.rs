use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use graphos_core::action::ActionKey;
use tokio::task::AbortHandle;

/// Live reference to a running execution.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    pub execution_id: String,
    pub key: ActionKey,
    pub started_at: Instant,
    /// Distinguishes successive runners that reused an execution id.
    pub generation: u64,
    abort: AbortHandle,
}

impl RunnerHandle {
    pub fn new(execution_id: String, key: ActionKey, generation: u64, abort: AbortHandle) -> Self {
        Self {
            execution_id,
            key,
            started_at: Instant::now(),
            generation,
            abort,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Abort the runner task. No-op once it has finished.
    pub fn terminate(&self) {
        self.abort.abort();
    }
}

/// Concurrent map from execution id to the runner serving it.
#[derive(Debug, Clone, Default)]
pub struct PidStore {
    handles: Arc<DashMap<String, RunnerHandle>>,
}

impl PidStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, execution_id: &str, handle: RunnerHandle) {
        self.handles.insert(execution_id.to_string(), handle);
    }

    pub fn get(&self, execution_id: &str) -> Option<RunnerHandle> {
        self.handles.get(execution_id).map(|entry| entry.clone())
    }

    /// Remove the entry for `execution_id`. Deleting an absent id is a no-op.
    pub fn delete(&self, execution_id: &str) -> Option<RunnerHandle> {
        self.handles.remove(execution_id).map(|(_, handle)| handle)
    }

    /// Remove the entry only if it still belongs to `generation`.
    pub fn delete_generation(&self, execution_id: &str, generation: u64) -> bool {
        self.handles
            .remove_if(execution_id, |_, handle| handle.generation == generation)
            .is_some()
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.handles.contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn execution_ids(&self) -> Vec<String> {
        self.handles.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove and return every handle.
    pub fn drain(&self) -> Vec<RunnerHandle> {
        let ids = self.execution_ids();
        ids.iter().filter_map(|id| self.delete(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parked_handle(id: &str, generation: u64) -> (RunnerHandle, tokio::task::JoinHandle<()>) {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let handle = RunnerHandle::new(
            id.to_string(),
            ActionKey::new("graph", "execute"),
            generation,
            task.abort_handle(),
        );
        (handle, task)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = PidStore::new();
        let (handle, _task) = parked_handle("exec-1", 1);
        store.put("exec-1", handle);

        assert!(store.contains("exec-1"));
        assert_eq!(store.get("exec-1").expect("present").execution_id, "exec-1");
        assert!(store.delete("exec-1").is_some());
        assert!(store.get("exec-1").is_none());
    }

    #[tokio::test]
    async fn deleting_absent_id_is_noop() {
        let store = PidStore::new();
        assert!(store.delete("exec-missing").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn generation_guard_keeps_newer_handle() {
        let store = PidStore::new();
        let (old, _t1) = parked_handle("exec-1", 1);
        let (new, _t2) = parked_handle("exec-1", 2);
        store.put("exec-1", old);
        store.put("exec-1", new);

        assert!(!store.delete_generation("exec-1", 1));
        assert_eq!(store.get("exec-1").expect("present").generation, 2);
        assert!(store.delete_generation("exec-1", 2));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn terminate_aborts_task() {
        let store = PidStore::new();
        let (handle, task) = parked_handle("exec-1", 1);
        store.put("exec-1", handle);

        store.get("exec-1").expect("present").terminate();
        let err = task.await.expect_err("aborted");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn drain_empties_store() {
        let store = PidStore::new();
        let (a, _ta) = parked_handle("exec-a", 1);
        let (b, _tb) = parked_handle("exec-b", 2);
        store.put("exec-a", a);
        store.put("exec-b", b);

        assert_eq!(store.drain().len(), 2);
        assert!(store.is_empty());
    }
}
