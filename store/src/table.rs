//! Typed tables with per-table undo stacks.
//!
//! Every row has a monotonically assigned primary id and exactly one unique
//! secondary key. Undo frames record the minimum needed to reverse a
//! session: ids created, before-images of rows modified, and before-images
//! of rows removed. Reverting applies those in that order, which also
//! restores the secondary index.

use crate::error::StoreError;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Debug;

/// A state object storable in a [`Table`].
///
/// `id()` must return the primary id the object was created with; the
/// secondary `key()` must be unique within the table at all times.
pub trait StateObject: Clone + 'static {
    type Key: Ord + Clone + Debug;

    /// Table name used in error messages.
    const TABLE: &'static str;

    fn id(&self) -> u64;
    fn key(&self) -> Self::Key;
}

/// One session's worth of reversal data for a single table.
struct UndoFrame<T: StateObject> {
    revision: i64,
    /// `next_id` at the time the frame was opened.
    old_next_id: u64,
    new_ids: BTreeSet<u64>,
    old_values: BTreeMap<u64, T>,
    removed_values: BTreeMap<u64, T>,
}

impl<T: StateObject> UndoFrame<T> {
    fn new(revision: i64, old_next_id: u64) -> Self {
        Self {
            revision,
            old_next_id,
            new_ids: BTreeSet::new(),
            old_values: BTreeMap::new(),
            removed_values: BTreeMap::new(),
        }
    }

    fn on_create(&mut self, id: u64) {
        self.new_ids.insert(id);
    }

    fn on_modify(&mut self, id: u64, before: &T) {
        if self.new_ids.contains(&id) {
            return;
        }
        self.old_values.entry(id).or_insert_with(|| before.clone());
    }

    fn on_remove(&mut self, id: u64, before: T) {
        if self.new_ids.remove(&id) {
            return;
        }
        if let Some(original) = self.old_values.remove(&id) {
            self.removed_values.insert(id, original);
            return;
        }
        self.removed_values.entry(id).or_insert(before);
    }
}

/// A typed table: primary rows, a unique secondary index, and an undo
/// stack with one frame per open (or pushed, not yet committed) session.
pub struct Table<T: StateObject> {
    rows: BTreeMap<u64, T>,
    by_key: BTreeMap<T::Key, u64>,
    next_id: u64,
    stack: VecDeque<UndoFrame<T>>,
}

impl<T: StateObject> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StateObject> Table<T> {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            by_key: BTreeMap::new(),
            next_id: 0,
            stack: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Create a row. The builder receives the assigned primary id and must
    /// embed it in the object.
    pub fn create(&mut self, build: impl FnOnce(u64) -> T) -> Result<T, StoreError> {
        let id = self.next_id;
        let obj = build(id);
        if obj.id() != id {
            return Err(StoreError::IdChanged { table: T::TABLE });
        }
        if self.by_key.contains_key(&obj.key()) {
            return Err(StoreError::DuplicateKey { table: T::TABLE });
        }
        self.next_id += 1;
        self.by_key.insert(obj.key(), id);
        self.rows.insert(id, obj.clone());
        if let Some(frame) = self.stack.back_mut() {
            frame.on_create(id);
        }
        Ok(obj)
    }

    pub fn find(&self, key: &T::Key) -> Option<&T> {
        self.by_key.get(key).and_then(|id| self.rows.get(id))
    }

    pub fn get(&self, key: &T::Key) -> Result<&T, StoreError> {
        self.find(key).ok_or(StoreError::NotFound { table: T::TABLE })
    }

    pub fn find_by_id(&self, id: u64) -> Option<&T> {
        self.rows.get(&id)
    }

    pub fn get_by_id(&self, id: u64) -> Result<&T, StoreError> {
        self.rows
            .get(&id)
            .ok_or(StoreError::IdNotFound { table: T::TABLE, id })
    }

    /// Rows in primary id order (deterministic iteration).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    /// Modify a row in place. The mutation runs on a copy; it is only
    /// installed if the id is unchanged and the (possibly new) secondary
    /// key does not collide.
    pub fn modify(&mut self, id: u64, mutate: impl FnOnce(&mut T)) -> Result<(), StoreError> {
        let before = self
            .rows
            .get(&id)
            .cloned()
            .ok_or(StoreError::IdNotFound { table: T::TABLE, id })?;
        let mut after = before.clone();
        mutate(&mut after);
        if after.id() != id {
            return Err(StoreError::IdChanged { table: T::TABLE });
        }
        if after.key() != before.key() {
            if self.by_key.contains_key(&after.key()) {
                return Err(StoreError::DuplicateKey { table: T::TABLE });
            }
            self.by_key.remove(&before.key());
            self.by_key.insert(after.key(), id);
        }
        if let Some(frame) = self.stack.back_mut() {
            frame.on_modify(id, &before);
        }
        self.rows.insert(id, after);
        Ok(())
    }

    pub fn erase(&mut self, id: u64) -> Result<(), StoreError> {
        let obj = self
            .rows
            .remove(&id)
            .ok_or(StoreError::IdNotFound { table: T::TABLE, id })?;
        self.by_key.remove(&obj.key());
        if let Some(frame) = self.stack.back_mut() {
            frame.on_remove(id, obj);
        }
        Ok(())
    }

    // ── Undo stack ──────────────────────────────────────────────────────

    pub(crate) fn begin(&mut self, revision: i64) {
        self.stack.push_back(UndoFrame::new(revision, self.next_id));
    }

    /// Revert and discard the top frame.
    pub(crate) fn undo(&mut self) {
        let Some(frame) = self.stack.pop_back() else {
            return;
        };
        for (id, old) in frame.old_values {
            if let Some(current) = self.rows.get(&id) {
                self.by_key.remove(&current.key());
            }
            self.by_key.insert(old.key(), id);
            self.rows.insert(id, old);
        }
        for id in frame.new_ids {
            if let Some(obj) = self.rows.remove(&id) {
                self.by_key.remove(&obj.key());
            }
        }
        for (id, obj) in frame.removed_values {
            self.by_key.insert(obj.key(), id);
            self.rows.insert(id, obj);
        }
        self.next_id = frame.old_next_id;
    }

    /// Merge the top frame into the one below it. With fewer than two
    /// frames the top frame simply stays (equivalent to a push).
    pub(crate) fn squash(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        let Some(top) = self.stack.pop_back() else {
            return;
        };
        let Some(prev) = self.stack.back_mut() else {
            return;
        };

        for (id, old) in top.old_values {
            if prev.new_ids.contains(&id) {
                continue;
            }
            if prev.old_values.contains_key(&id) {
                continue;
            }
            prev.old_values.insert(id, old);
        }
        for id in top.new_ids {
            if let Some(original) = prev.removed_values.remove(&id) {
                // removed in the outer session, re-created in the inner one:
                // net effect is a modification
                prev.old_values.insert(id, original);
            } else {
                prev.new_ids.insert(id);
            }
        }
        for (id, obj) in top.removed_values {
            if prev.new_ids.remove(&id) {
                continue;
            }
            if let Some(original) = prev.old_values.remove(&id) {
                prev.removed_values.insert(id, original);
                continue;
            }
            prev.removed_values.insert(id, obj);
        }
    }

    /// Drop frames with revision ≤ `revision` from the bottom of the stack.
    pub(crate) fn commit(&mut self, revision: i64) {
        while matches!(self.stack.front(), Some(f) if f.revision <= revision) {
            self.stack.pop_front();
        }
    }

    pub(crate) fn undo_depth(&self) -> usize {
        self.stack.len()
    }
}

/// Object-safe view of a table, so the store can drive every table's undo
/// stack in lockstep without knowing row types.
pub(crate) trait AnyTable: Any {
    fn begin(&mut self, revision: i64);
    fn undo(&mut self);
    fn squash(&mut self);
    fn commit(&mut self, revision: i64);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: StateObject> AnyTable for Table<T> {
    fn begin(&mut self, revision: i64) {
        Table::begin(self, revision)
    }

    fn undo(&mut self) {
        Table::undo(self)
    }

    fn squash(&mut self) {
        Table::squash(self)
    }

    fn commit(&mut self, revision: i64) {
        Table::commit(self, revision)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: u64,
        name: String,
        value: u64,
    }

    impl StateObject for Row {
        type Key = String;
        const TABLE: &'static str = "row";

        fn id(&self) -> u64 {
            self.id
        }

        fn key(&self) -> String {
            self.name.clone()
        }
    }

    fn row(id: u64, name: &str, value: u64) -> Row {
        Row { id, name: name.into(), value }
    }

    #[test]
    fn create_find_modify_erase() {
        let mut t = Table::<Row>::new();
        let a = t.create(|id| row(id, "a", 1)).unwrap();
        assert_eq!(t.find(&"a".to_string()).unwrap().value, 1);

        t.modify(a.id(), |r| r.value = 2).unwrap();
        assert_eq!(t.get(&"a".to_string()).unwrap().value, 2);

        t.erase(a.id()).unwrap();
        assert!(t.find(&"a".to_string()).is_none());
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut t = Table::<Row>::new();
        t.create(|id| row(id, "a", 1)).unwrap();
        assert!(matches!(
            t.create(|id| row(id, "a", 2)),
            Err(StoreError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn modify_reindexes_key_change() {
        let mut t = Table::<Row>::new();
        let a = t.create(|id| row(id, "a", 1)).unwrap();
        t.modify(a.id(), |r| r.name = "b".into()).unwrap();
        assert!(t.find(&"a".to_string()).is_none());
        assert_eq!(t.find(&"b".to_string()).unwrap().id, a.id());
    }

    #[test]
    fn undo_reverts_create_modify_remove() {
        let mut t = Table::<Row>::new();
        let a = t.create(|id| row(id, "a", 1)).unwrap();
        let b = t.create(|id| row(id, "b", 2)).unwrap();

        t.begin(1);
        t.modify(a.id(), |r| r.value = 10).unwrap();
        t.erase(b.id()).unwrap();
        t.create(|id| row(id, "c", 3)).unwrap();
        t.undo();

        assert_eq!(t.get(&"a".to_string()).unwrap().value, 1);
        assert_eq!(t.get(&"b".to_string()).unwrap().value, 2);
        assert!(t.find(&"c".to_string()).is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn undo_restores_next_id() {
        let mut t = Table::<Row>::new();
        t.begin(1);
        t.create(|id| row(id, "a", 1)).unwrap();
        t.undo();
        let a = t.create(|id| row(id, "a", 1)).unwrap();
        assert_eq!(a.id(), 0);
    }

    #[test]
    fn squash_then_undo_reverts_both_frames() {
        let mut t = Table::<Row>::new();
        let a = t.create(|id| row(id, "a", 1)).unwrap();

        t.begin(1);
        t.modify(a.id(), |r| r.value = 10).unwrap();
        t.begin(2);
        t.modify(a.id(), |r| r.value = 20).unwrap();
        t.squash();
        t.undo();

        assert_eq!(t.get(&"a".to_string()).unwrap().value, 1);
        assert_eq!(t.undo_depth(), 0);
    }

    #[test]
    fn squash_remove_after_modify_restores_original() {
        let mut t = Table::<Row>::new();
        let a = t.create(|id| row(id, "a", 1)).unwrap();

        t.begin(1);
        t.modify(a.id(), |r| r.value = 10).unwrap();
        t.begin(2);
        t.erase(a.id()).unwrap();
        t.squash();
        t.undo();

        assert_eq!(t.get(&"a".to_string()).unwrap().value, 1);
    }

    #[test]
    fn commit_discards_history() {
        let mut t = Table::<Row>::new();
        t.begin(1);
        let a = t.create(|id| row(id, "a", 1)).unwrap();
        t.begin(2);
        t.modify(a.id(), |r| r.value = 2).unwrap();

        t.commit(1);
        assert_eq!(t.undo_depth(), 1);
        t.undo();
        // frame 1 is gone: the create survives, only the modify reverted
        assert_eq!(t.get(&"a".to_string()).unwrap().value, 1);
        t.undo();
        assert_eq!(t.get(&"a".to_string()).unwrap().value, 1);
    }

    #[test]
    fn create_then_erase_in_one_frame_is_clean() {
        let mut t = Table::<Row>::new();
        t.begin(1);
        let a = t.create(|id| row(id, "a", 1)).unwrap();
        t.erase(a.id()).unwrap();
        t.undo();
        assert!(t.is_empty());
    }
}
