//! The object database: a registry of typed tables, session management,
//! and the process-wide lock façade.

use crate::error::StoreError;
use crate::table::{AnyTable, StateObject, Table};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A handle to one undo session.
///
/// Sessions are explicit values, not scope guards: success paths call
/// [`Session::push`] or [`Session::squash`], failure paths call
/// [`Session::undo`]. A session whose frame has already been discarded by
/// [`Store::commit`] degrades every operation to a no-op, mirroring the
/// push-after-commit case during block generation.
#[must_use = "a session left unresolved keeps its undo frame on the stack"]
pub struct Session {
    revision: Option<i64>,
}

impl Session {
    /// A disabled session; all operations are no-ops.
    pub fn disabled() -> Self {
        Self { revision: None }
    }

    pub fn revision(&self) -> Option<i64> {
        self.revision
    }

    /// Keep this session's changes as their own revision in history.
    pub fn push(self, _store: &mut Store) {
        // frames already live on the undo stack; consuming the token is all
        // that is needed to stop it from being reverted
    }

    /// Merge this session's changes into the enclosing session without
    /// creating a new revision.
    pub fn squash(self, store: &mut Store) {
        if let Some(revision) = self.revision {
            if store.undo_stack.last() == Some(&revision) {
                store.squash_top();
            }
        }
    }

    /// Revert this session's changes.
    pub fn undo(self, store: &mut Store) {
        if let Some(revision) = self.revision {
            if store.undo_stack.last() == Some(&revision) {
                store.undo_top();
            }
        }
    }
}

/// The in-memory object store: typed tables in registration order plus the
/// session bookkeeping shared by all of them.
#[derive(Default)]
pub struct Store {
    tables: Vec<Box<dyn AnyTable + Send + Sync>>,
    by_type: HashMap<TypeId, usize>,
    /// Revisions of live (open or pushed, uncommitted) undo frames,
    /// bottom to top.
    undo_stack: Vec<i64>,
    revision: i64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the table for `T`. Must be called once per object type
    /// before any access; registration order fixes session iteration order.
    pub fn register_table<T: StateObject + Send + Sync>(&mut self) -> Result<(), StoreError>
    where
        T::Key: Send + Sync,
    {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return Err(StoreError::TableExists(T::TABLE));
        }
        self.by_type.insert(type_id, self.tables.len());
        self.tables.push(Box::new(Table::<T>::new()));
        Ok(())
    }

    fn table<T: StateObject>(&self) -> Result<&Table<T>, StoreError> {
        let idx = self
            .by_type
            .get(&TypeId::of::<T>())
            .ok_or(StoreError::UnknownTable(T::TABLE))?;
        self.tables[*idx]
            .as_any()
            .downcast_ref::<Table<T>>()
            .ok_or(StoreError::UnknownTable(T::TABLE))
    }

    fn table_mut<T: StateObject>(&mut self) -> Result<&mut Table<T>, StoreError> {
        let idx = *self
            .by_type
            .get(&TypeId::of::<T>())
            .ok_or(StoreError::UnknownTable(T::TABLE))?;
        self.tables[idx]
            .as_any_mut()
            .downcast_mut::<Table<T>>()
            .ok_or(StoreError::UnknownTable(T::TABLE))
    }

    // ── Typed row access ────────────────────────────────────────────────

    pub fn create<T: StateObject>(
        &mut self,
        build: impl FnOnce(u64) -> T,
    ) -> Result<T, StoreError> {
        self.table_mut::<T>()?.create(build)
    }

    pub fn find<T: StateObject>(&self, key: &T::Key) -> Option<&T> {
        self.table::<T>().ok().and_then(|t| t.find(key))
    }

    pub fn get<T: StateObject>(&self, key: &T::Key) -> Result<&T, StoreError> {
        self.table::<T>()?.get(key)
    }

    pub fn find_by_id<T: StateObject>(&self, id: u64) -> Option<&T> {
        self.table::<T>().ok().and_then(|t| t.find_by_id(id))
    }

    pub fn get_by_id<T: StateObject>(&self, id: u64) -> Result<&T, StoreError> {
        self.table::<T>()?.get_by_id(id)
    }

    pub fn modify<T: StateObject>(
        &mut self,
        id: u64,
        mutate: impl FnOnce(&mut T),
    ) -> Result<(), StoreError> {
        self.table_mut::<T>()?.modify(id, mutate)
    }

    pub fn erase<T: StateObject>(&mut self, id: u64) -> Result<(), StoreError> {
        self.table_mut::<T>()?.erase(id)
    }

    /// Rows of `T` in primary id order. Empty if the table is missing.
    pub fn iter<T: StateObject>(&self) -> impl Iterator<Item = &T> {
        self.table::<T>().ok().into_iter().flat_map(|t| t.iter())
    }

    pub fn count<T: StateObject>(&self) -> usize {
        self.table::<T>().map(|t| t.len()).unwrap_or(0)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Open a new undo session. When `enabled` is false the returned
    /// session is inert and nothing is tracked.
    pub fn start_undo_session(&mut self, enabled: bool) -> Session {
        if !enabled {
            return Session::disabled();
        }
        self.revision += 1;
        let revision = self.revision;
        for table in &mut self.tables {
            table.begin(revision);
        }
        self.undo_stack.push(revision);
        Session { revision: Some(revision) }
    }

    /// Revert the most recent live undo frame, if any.
    pub fn undo(&mut self) {
        self.undo_top();
    }

    /// Revert every live undo frame, returning to the last committed state.
    pub fn undo_all(&mut self) {
        while !self.undo_stack.is_empty() {
            self.undo_top();
        }
    }

    /// Irrevocably discard undo frames with revision ≤ `revision`.
    pub fn commit(&mut self, revision: i64) {
        for table in &mut self.tables {
            table.commit(revision);
        }
        self.undo_stack.retain(|r| *r > revision);
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Set the revision counter. Only legal with no live undo frames
    /// (e.g. after replay, to align revisions with block numbers).
    pub fn set_revision(&mut self, revision: i64) -> Result<(), StoreError> {
        if !self.undo_stack.is_empty() {
            return Err(StoreError::UndoStackNotEmpty);
        }
        self.revision = revision;
        Ok(())
    }

    /// Reserved for persistent engines; the memory-resident store has
    /// nothing to sync (durability is the block log's job).
    pub fn flush(&mut self) {}

    fn undo_top(&mut self) {
        if self.undo_stack.pop().is_none() {
            return;
        }
        for table in &mut self.tables {
            table.undo();
        }
        self.revision -= 1;
    }

    fn squash_top(&mut self) {
        if self.undo_stack.len() < 2 {
            // nothing below to merge into: the frame stays as-is (push)
            return;
        }
        self.undo_stack.pop();
        for table in &mut self.tables {
            table.squash();
        }
        self.revision -= 1;
    }
}

/// The shared, lock-guarded database handle.
///
/// Cloning is cheap (an `Arc` bump); all clones see the same store. Writers
/// exclude every reader for the full duration of [`ObjectDb::with_write_lock`].
#[derive(Clone, Default)]
pub struct ObjectDb {
    shared: Arc<RwLock<Store>>,
}

impl ObjectDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_lock<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        let mut guard = match self.shared.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn with_read_lock<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        let guard = match self.shared.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter {
        id: u64,
        name: String,
        value: u64,
    }

    impl StateObject for Counter {
        type Key = String;
        const TABLE: &'static str = "counter";

        fn id(&self) -> u64 {
            self.id
        }

        fn key(&self) -> String {
            self.name.clone()
        }
    }

    fn new_store() -> Store {
        let mut store = Store::new();
        store.register_table::<Counter>().unwrap();
        store
    }

    fn make(store: &mut Store, name: &str, value: u64) -> u64 {
        store
            .create(|id| Counter { id, name: name.into(), value })
            .unwrap()
            .id
    }

    #[test]
    fn double_registration_fails() {
        let mut store = new_store();
        assert!(matches!(
            store.register_table::<Counter>(),
            Err(StoreError::TableExists(_))
        ));
    }

    #[test]
    fn dropped_session_semantics_via_undo() {
        let mut store = new_store();
        let session = store.start_undo_session(true);
        make(&mut store, "a", 1);
        session.undo(&mut store);
        assert_eq!(store.count::<Counter>(), 0);
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn pushed_session_survives_and_undoes_later() {
        let mut store = new_store();
        let session = store.start_undo_session(true);
        make(&mut store, "a", 1);
        session.push(&mut store);
        assert_eq!(store.revision(), 1);
        assert_eq!(store.count::<Counter>(), 1);

        store.undo();
        assert_eq!(store.count::<Counter>(), 0);
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn squash_merges_into_enclosing_session() {
        let mut store = new_store();
        let outer = store.start_undo_session(true);
        let id = make(&mut store, "a", 1);

        let inner = store.start_undo_session(true);
        store.modify::<Counter>(id, |c| c.value = 2).unwrap();
        inner.squash(&mut store);
        assert_eq!(store.revision(), 1);

        // undoing the outer session reverts both
        outer.undo(&mut store);
        assert_eq!(store.count::<Counter>(), 0);
    }

    #[test]
    fn nested_sessions_observe_enclosing_changes() {
        let mut store = new_store();
        let outer = store.start_undo_session(true);
        let id = make(&mut store, "a", 1);

        let inner = store.start_undo_session(true);
        assert_eq!(store.get_by_id::<Counter>(id).unwrap().value, 1);
        store.modify::<Counter>(id, |c| c.value = 9).unwrap();
        inner.undo(&mut store);

        assert_eq!(store.get_by_id::<Counter>(id).unwrap().value, 1);
        outer.push(&mut store);
    }

    #[test]
    fn commit_makes_revisions_permanent() {
        let mut store = new_store();
        let s1 = store.start_undo_session(true);
        make(&mut store, "a", 1);
        s1.push(&mut store);

        let s2 = store.start_undo_session(true);
        make(&mut store, "b", 2);
        s2.push(&mut store);

        store.commit(1);
        store.undo_all();

        // revision 1 survived the undo_all, revision 2 did not
        assert!(store.find::<Counter>(&"a".to_string()).is_some());
        assert!(store.find::<Counter>(&"b".to_string()).is_none());
    }

    #[test]
    fn session_ops_after_commit_are_inert() {
        let mut store = new_store();
        let session = store.start_undo_session(true);
        make(&mut store, "a", 1);
        store.commit(store.revision());

        // the frame is gone; undoing the stale token must not revert state
        session.undo(&mut store);
        assert_eq!(store.count::<Counter>(), 1);
    }

    #[test]
    fn disabled_session_tracks_nothing() {
        let mut store = new_store();
        let session = store.start_undo_session(false);
        make(&mut store, "a", 1);
        session.undo(&mut store);
        assert_eq!(store.count::<Counter>(), 1);
        assert_eq!(store.undo_depth(), 0);
    }

    #[test]
    fn set_revision_requires_empty_stack() {
        let mut store = new_store();
        let session = store.start_undo_session(true);
        assert!(store.set_revision(10).is_err());
        session.undo(&mut store);
        store.set_revision(10).unwrap();
        assert_eq!(store.revision(), 10);
    }

    #[test]
    fn object_db_locks_share_state() {
        let db = ObjectDb::new();
        db.with_write_lock(|store| {
            store.register_table::<Counter>().unwrap();
            make(store, "a", 1);
        });
        let db2 = db.clone();
        let count = db2.with_read_lock(|store| store.count::<Counter>());
        assert_eq!(count, 1);
    }
}
