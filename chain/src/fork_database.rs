//! In-memory DAG of candidate blocks above the last irreversible block.
//!
//! The database owns every fork item; a block's link to its parent is just
//! its `previous` id, resolved through the index on demand (no owning
//! cycles). The head is the highest-numbered item, with the
//! lexicographically smaller id winning ties.

use crate::block::SignedBlock;
use crate::error::ChainError;
use cascade_types::BlockId;
use std::collections::{BTreeMap, HashMap};

/// One candidate block.
#[derive(Clone, Debug)]
pub struct ForkItem {
    pub id: BlockId,
    pub num: u32,
    pub data: SignedBlock,
}

impl ForkItem {
    fn new(data: SignedBlock) -> Self {
        Self { id: data.id(), num: data.block_num(), data }
    }

    pub fn previous_id(&self) -> BlockId {
        self.data.header.previous
    }
}

/// Whether `a` beats `b` as chain head.
fn better_head(a: (u32, &BlockId), b: (u32, &BlockId)) -> bool {
    a.0 > b.0 || (a.0 == b.0 && a.1 < b.1)
}

#[derive(Default)]
pub struct ForkDatabase {
    index: HashMap<BlockId, ForkItem>,
    by_num: BTreeMap<u32, Vec<BlockId>>,
    head: Option<BlockId>,
    max_size: u32,
}

impl ForkDatabase {
    pub fn new() -> Self {
        Self { max_size: 1024, ..Default::default() }
    }

    pub fn is_known_block(&self, id: &BlockId) -> bool {
        self.index.contains_key(id)
    }

    pub fn fetch_block(&self, id: &BlockId) -> Option<&ForkItem> {
        self.index.get(id)
    }

    pub fn head(&self) -> Option<&ForkItem> {
        self.head.as_ref().and_then(|id| self.index.get(id))
    }

    /// Seed the database with a trusted block (the block log head at
    /// startup), making it the head without validation.
    pub fn start_block(&mut self, block: SignedBlock) {
        let item = ForkItem::new(block);
        let id = item.id;
        self.by_num.entry(item.num).or_default().push(id);
        self.index.insert(id, item);
        self.head = Some(id);
    }

    /// Insert a block and return the resulting longest-chain head.
    ///
    /// The block must link to a known block (or the database must be
    /// empty). Blocks below the pruning floor are rejected as unlinkable
    /// too: their ancestry is gone.
    pub fn push_block(&mut self, block: SignedBlock) -> Result<ForkItem, ChainError> {
        let item = ForkItem::new(block);
        if let Some(head) = self.head() {
            let floor = head.num.saturating_sub(self.max_size);
            if item.num <= floor {
                return Err(ChainError::UnlinkableBlock(format!(
                    "block {} is below the pruning floor {}",
                    item.id, floor
                )));
            }
            if !self.index.contains_key(&item.previous_id()) {
                return Err(ChainError::UnlinkableBlock(item.id.to_string()));
            }
        }
        let id = item.id;
        if self.index.insert(id, item.clone()).is_none() {
            self.by_num.entry(item.num).or_default().push(id);
        }
        match self.head {
            Some(head_id) => {
                let head_num = self.index.get(&head_id).map(|i| i.num).unwrap_or(0);
                if better_head((item.num, &id), (head_num, &head_id)) {
                    self.head = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.head()
            .cloned()
            .ok_or_else(|| ChainError::UnknownBlock("fork database has no head".into()))
    }

    /// Force the head to a specific known block (fork-switch recovery).
    pub fn set_head(&mut self, id: &BlockId) -> Result<(), ChainError> {
        if !self.index.contains_key(id) {
            return Err(ChainError::UnknownBlock(id.to_string()));
        }
        self.head = Some(*id);
        Ok(())
    }

    /// Move the head back to its parent.
    pub fn pop_block(&mut self) -> Result<(), ChainError> {
        let head = self.head().ok_or(ChainError::PopEmptyChain)?;
        let previous = head.previous_id();
        self.head = self.index.contains_key(&previous).then_some(previous);
        Ok(())
    }

    /// Remove a block and every descendant of it.
    pub fn remove(&mut self, id: &BlockId) {
        let Some(start) = self.index.get(id) else {
            return;
        };
        let start_num = start.num;
        let mut doomed: Vec<BlockId> = vec![*id];
        let mut doomed_set: std::collections::HashSet<BlockId> =
            doomed.iter().copied().collect();

        // children always have strictly larger numbers, so one ascending
        // sweep finds every descendant
        for (_, ids) in self.by_num.range(start_num + 1..) {
            for candidate in ids {
                if let Some(item) = self.index.get(candidate) {
                    if doomed_set.contains(&item.previous_id()) {
                        doomed.push(*candidate);
                        doomed_set.insert(*candidate);
                    }
                }
            }
        }

        for dead in &doomed {
            if let Some(item) = self.index.remove(dead) {
                if let Some(ids) = self.by_num.get_mut(&item.num) {
                    ids.retain(|i| i != dead);
                    if ids.is_empty() {
                        self.by_num.remove(&item.num);
                    }
                }
            }
        }

        if matches!(&self.head, Some(h) if doomed_set.contains(h)) {
            // fall back to the best remaining item
            self.head = self
                .index
                .values()
                .fold(None::<(u32, BlockId)>, |best, item| match best {
                    Some(b) if !better_head((item.num, &item.id), (b.0, &b.1)) => Some(b),
                    _ => Some((item.num, item.id)),
                })
                .map(|(_, id)| id);
        }
    }

    /// Keep only blocks numbered above `head - max_size`.
    pub fn set_max_size(&mut self, max_size: u32) {
        self.max_size = max_size;
        let Some(head) = self.head() else {
            return;
        };
        let floor = head.num.saturating_sub(max_size);
        let stale: Vec<BlockId> = self
            .by_num
            .range(..=floor)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        for id in stale {
            if let Some(item) = self.index.remove(&id) {
                if let Some(ids) = self.by_num.get_mut(&item.num) {
                    ids.retain(|i| *i != id);
                    if ids.is_empty() {
                        self.by_num.remove(&item.num);
                    }
                }
            }
        }
    }

    /// The two branches from `a` and `b` back to (excluding) their common
    /// ancestor, each ordered child → parent and trimmed to equal height
    /// first.
    pub fn fetch_branch_from(
        &self,
        a: &BlockId,
        b: &BlockId,
    ) -> Result<(Vec<ForkItem>, Vec<ForkItem>), ChainError> {
        let mut first = self
            .fetch_block(a)
            .cloned()
            .ok_or_else(|| ChainError::UnknownBlock(a.to_string()))?;
        let mut second = self
            .fetch_block(b)
            .cloned()
            .ok_or_else(|| ChainError::UnknownBlock(b.to_string()))?;

        let mut branch_a = Vec::new();
        let mut branch_b = Vec::new();

        while first.num > second.num {
            let previous = first.previous_id();
            branch_a.push(first);
            first = self
                .fetch_block(&previous)
                .cloned()
                .ok_or_else(|| ChainError::UnknownBlock(previous.to_string()))?;
        }
        while second.num > first.num {
            let previous = second.previous_id();
            branch_b.push(second);
            second = self
                .fetch_block(&previous)
                .cloned()
                .ok_or_else(|| ChainError::UnknownBlock(previous.to_string()))?;
        }
        while first.id != second.id {
            let first_prev = first.previous_id();
            let second_prev = second.previous_id();
            branch_a.push(first);
            branch_b.push(second);
            first = self
                .fetch_block(&first_prev)
                .cloned()
                .ok_or_else(|| ChainError::UnknownBlock(first_prev.to_string()))?;
            second = self
                .fetch_block(&second_prev)
                .cloned()
                .ok_or_else(|| ChainError::UnknownBlock(second_prev.to_string()))?;
        }
        Ok((branch_a, branch_b))
    }
}
