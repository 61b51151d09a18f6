use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use crate::buffer::{
    BufferPoolManager, PageId, ReadPageGuard, WritePageGuard, INVALID_PAGE_ID,
};
use crate::config::BTreeConfig;
use crate::error::{GraniteError, GraniteResult};
use crate::storage::codec::{
    BPlusTreeHeaderPageCodec, BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec,
};
use crate::storage::page::{
    default_comparator, BPlusTreeHeaderPage, BPlusTreeInternalPage, BPlusTreeLeafPage,
    BPlusTreePage, KeyComparator, RecordId,
};

/// Write guards held along a descent, deepest last. Once a child proves safe
/// for the operation the whole ancestor chain is released.
#[derive(Default)]
struct Context {
    write_set: VecDeque<WritePageGuard>,
}

/// Concurrent B+ tree mapping byte-string keys to record ids. Readers crab
/// down with read latches; writers start optimistically (write latch on the
/// leaf only) and fall back to full write crabbing when a split is possible.
/// The header page, which holds only the root pointer, is always latched
/// first, so root changes are serialized.
#[derive(Debug)]
pub struct BPlusTreeIndex {
    pub buffer_pool: Arc<BufferPoolManager>,
    pub comparator: KeyComparator,
    pub leaf_max_size: u32,
    pub internal_max_size: u32,
    pub header_page_id: PageId,
}

impl BPlusTreeIndex {
    pub fn new(buffer_pool: Arc<BufferPoolManager>, config: BTreeConfig) -> GraniteResult<Self> {
        Self::new_with_comparator(buffer_pool, config, default_comparator)
    }

    pub fn new_with_comparator(
        buffer_pool: Arc<BufferPoolManager>,
        config: BTreeConfig,
        comparator: KeyComparator,
    ) -> GraniteResult<Self> {
        assert!(config.leaf_max_size >= 3, "leaf_max_size must be at least 3");
        assert!(
            config.internal_max_size >= 3,
            "internal_max_size must be at least 3"
        );
        let mut header_guard = buffer_pool.new_page()?.upgrade_write();
        header_guard.overwrite(&BPlusTreeHeaderPageCodec::encode(&BPlusTreeHeaderPage::empty()));
        let header_page_id = header_guard.page_id();
        drop(header_guard);

        Ok(Self {
            buffer_pool,
            comparator,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            header_page_id,
        })
    }

    pub fn root_page_id(&self) -> GraniteResult<PageId> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let (header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
        Ok(header.root_page_id)
    }

    pub fn is_empty(&self) -> GraniteResult<bool> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /// Point lookup: crab down with read latches, releasing each parent once
    /// the child is latched.
    pub fn get(&self, key: &[u8]) -> GraniteResult<Option<RecordId>> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let (header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
        if header.root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.buffer_pool.fetch_page_read(header.root_page_id)?;
        drop(header_guard);

        loop {
            let (page, _) = BPlusTreePageCodec::decode(guard.data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    let child_id = internal.lookup_child(key, self.comparator);
                    let child_guard = self.buffer_pool.fetch_page_read(child_id)?;
                    guard = child_guard;
                }
                BPlusTreePage::Leaf(leaf) => {
                    return Ok(leaf.look_up(key, self.comparator));
                }
            }
        }
    }

    /// Insert a unique key. Returns false without side effects when the key
    /// already exists.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> GraniteResult<bool> {
        if let Some(mut leaf_guard) = self.find_leaf_write_optimistic(key)? {
            let (mut leaf, _) = BPlusTreeLeafPageCodec::decode(leaf_guard.data())?;
            if leaf.look_up(key, self.comparator).is_some() {
                return Ok(false);
            }
            if leaf.has_room() {
                leaf.insert(key.to_vec(), rid, self.comparator);
                leaf_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));
                return Ok(true);
            }
            // The leaf would split; retry with the full write path.
        }
        self.insert_pessimistic(key, rid)
    }

    /// Remove a key, rebalancing with borrows and merges as needed. Removing
    /// an absent key is a no-op.
    pub fn remove(&self, key: &[u8]) -> GraniteResult<()> {
        let header_guard = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let (header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
        if header.root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut ctx = Context::default();
        let root_guard = self.buffer_pool.fetch_page_write(header.root_page_id)?;
        ctx.write_set.push_back(header_guard);
        let mut current = root_guard;

        let (mut leaf, leaf_is_root) = loop {
            let is_root = ctx.write_set.back().map(|g| g.page_id()) == Some(self.header_page_id)
                && ctx.write_set.len() == 1;
            let (page, _) = BPlusTreePageCodec::decode(current.data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    let safe = if is_root {
                        internal.header.current_size >= 3
                    } else {
                        internal.header.current_size > internal.min_size()
                    };
                    if safe {
                        ctx.write_set.clear();
                    }
                    let child_id = internal.lookup_child(key, self.comparator);
                    let child_guard = self.buffer_pool.fetch_page_write(child_id)?;
                    ctx.write_set.push_back(current);
                    current = child_guard;
                }
                BPlusTreePage::Leaf(leaf) => {
                    let safe = if is_root {
                        leaf.header.current_size >= 2
                    } else {
                        leaf.header.current_size > leaf.min_size()
                    };
                    if safe {
                        ctx.write_set.clear();
                    }
                    break (leaf, is_root);
                }
            }
        };
        let mut leaf_guard = current;

        if !leaf.delete(key, self.comparator) {
            return Ok(());
        }

        if leaf_is_root {
            if leaf.header.current_size == 0 {
                let mut header_guard = ctx
                    .write_set
                    .pop_back()
                    .ok_or_else(|| GraniteError::Internal("root reset lost the header latch".to_string()))?;
                let (mut header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
                header.root_page_id = INVALID_PAGE_ID;
                header_guard.overwrite(&BPlusTreeHeaderPageCodec::encode(&header));
                let leaf_id = leaf_guard.page_id();
                drop(leaf_guard);
                drop(header_guard);
                self.buffer_pool.delete_page(leaf_id)?;
                return Ok(());
            }
            leaf_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));
            return Ok(());
        }

        leaf_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));
        if leaf.header.current_size >= leaf.min_size() {
            return Ok(());
        }
        self.handle_underflow(BPlusTreePage::Leaf(leaf), leaf_guard, &mut ctx)
    }

    /// Read-crab to the leaf covering `key`, then trade the leaf's read latch
    /// for a write latch while still holding the parent's read latch; the
    /// parent latch keeps the leaf from being split or merged away in the
    /// window between the two.
    fn find_leaf_write_optimistic(&self, key: &[u8]) -> GraniteResult<Option<WritePageGuard>> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let (header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
        if header.root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut parent = header_guard;
        let mut child = self.buffer_pool.fetch_page_read(header.root_page_id)?;
        loop {
            let (page, _) = BPlusTreePageCodec::decode(child.data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    let next_id = internal.lookup_child(key, self.comparator);
                    let next_guard = self.buffer_pool.fetch_page_read(next_id)?;
                    parent = child;
                    child = next_guard;
                }
                BPlusTreePage::Leaf(_) => {
                    let leaf_id = child.page_id();
                    drop(child);
                    let write_guard = self.buffer_pool.fetch_page_write(leaf_id)?;
                    drop(parent);
                    return Ok(Some(write_guard));
                }
            }
        }
    }

    fn insert_pessimistic(&self, key: &[u8], rid: RecordId) -> GraniteResult<bool> {
        let mut header_guard = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let (mut header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;

        if header.root_page_id == INVALID_PAGE_ID {
            let mut root_guard = self.buffer_pool.new_page()?.upgrade_write();
            let mut root = BPlusTreeLeafPage::new(self.leaf_max_size);
            root.insert(key.to_vec(), rid, self.comparator);
            root_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&root));
            header.root_page_id = root_guard.page_id();
            header_guard.overwrite(&BPlusTreeHeaderPageCodec::encode(&header));
            debug!("started new tree with root {}", root_guard.page_id());
            return Ok(true);
        }

        let mut ctx = Context::default();
        let root_guard = self.buffer_pool.fetch_page_write(header.root_page_id)?;
        ctx.write_set.push_back(header_guard);
        let mut current = root_guard;

        let mut leaf = loop {
            let (page, _) = BPlusTreePageCodec::decode(current.data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    if internal.header.current_size < internal.header.max_size {
                        ctx.write_set.clear();
                    }
                    let child_id = internal.lookup_child(key, self.comparator);
                    let child_guard = self.buffer_pool.fetch_page_write(child_id)?;
                    ctx.write_set.push_back(current);
                    current = child_guard;
                }
                BPlusTreePage::Leaf(leaf) => {
                    if leaf.has_room() {
                        ctx.write_set.clear();
                    }
                    break leaf;
                }
            }
        };
        let mut leaf_guard = current;

        if leaf.look_up(key, self.comparator).is_some() {
            return Ok(false);
        }

        leaf.insert(key.to_vec(), rid, self.comparator);
        if !leaf.is_at_split_threshold() {
            leaf_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));
            return Ok(true);
        }

        // Split: the left page keeps the first ceil(max/2) entries, the new
        // right page takes the rest and the promoted separator is its first
        // key.
        let split_at = ((leaf.header.max_size + 1) / 2) as usize;
        let right_entries = leaf.split_off(split_at);
        let mut right = BPlusTreeLeafPage::new(self.leaf_max_size);
        right.extend(right_entries);
        let mut right_guard = self.buffer_pool.new_page()?.upgrade_write();
        right.header.next_page_id = leaf.header.next_page_id;
        leaf.header.next_page_id = right_guard.page_id();

        let mut separator = right.key_at(0).to_vec();
        let mut new_child_id = right_guard.page_id();
        let mut split_left_id = leaf_guard.page_id();
        debug!(
            "split leaf {} into {} at separator len {}",
            split_left_id,
            new_child_id,
            separator.len()
        );

        right_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&right));
        leaf_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));
        drop(right_guard);
        drop(leaf_guard);

        loop {
            let mut parent_guard = ctx
                .write_set
                .pop_back()
                .ok_or_else(|| GraniteError::Internal("split lost its parent chain".to_string()))?;

            if parent_guard.page_id() == self.header_page_id {
                // Every level below was full: grow the tree with a new root.
                let mut new_root = BPlusTreeInternalPage::new(self.internal_max_size);
                new_root.populate_root(split_left_id, separator, new_child_id);
                let mut new_root_guard = self.buffer_pool.new_page()?.upgrade_write();
                new_root_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&new_root));
                let (mut header, _) = BPlusTreeHeaderPageCodec::decode(parent_guard.data())?;
                header.root_page_id = new_root_guard.page_id();
                parent_guard.overwrite(&BPlusTreeHeaderPageCodec::encode(&header));
                debug!("grew tree with new root {}", new_root_guard.page_id());
                return Ok(true);
            }

            let (mut parent, _) = BPlusTreeInternalPageCodec::decode(parent_guard.data())?;
            parent.insert(separator, new_child_id, self.comparator);
            if !parent.is_overflow() {
                parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
                return Ok(true);
            }

            // Internal split at max_size + 1 entries: the left page retains
            // floor(max/2) + 1, the middle key moves up, and its child seeds
            // slot 0 of the right page.
            let keep = (parent.header.max_size / 2 + 1) as usize;
            let mut rest = parent.split_off(keep);
            let (promoted, orphan_child) = rest.remove(0);
            let mut right = BPlusTreeInternalPage::new(self.internal_max_size);
            let mut right_entries = Vec::with_capacity(rest.len() + 1);
            right_entries.push((Vec::new(), orphan_child));
            right_entries.extend(rest);
            right.extend(right_entries);

            let mut right_guard = self.buffer_pool.new_page()?.upgrade_write();
            right_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&right));
            parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));

            separator = promoted;
            new_child_id = right_guard.page_id();
            split_left_id = parent_guard.page_id();
        }
    }

    /// Rebalance an underfull node with its siblings, preferring the right
    /// one: borrow when a sibling is above its minimum, merge when the
    /// combined node fits, and otherwise tolerate the underflow. Merges may
    /// cascade toward the root.
    fn handle_underflow(
        &self,
        mut node: BPlusTreePage,
        mut node_guard: WritePageGuard,
        ctx: &mut Context,
    ) -> GraniteResult<()> {
        loop {
            let mut parent_guard = ctx.write_set.pop_back().ok_or_else(|| {
                GraniteError::Internal("underflow cascade lost its parent chain".to_string())
            })?;
            let (mut parent, _) = BPlusTreeInternalPageCodec::decode(parent_guard.data())?;
            let node_id = node_guard.page_id();
            let idx = parent.child_index(node_id).ok_or_else(|| {
                GraniteError::Internal(format!("page {} missing from its parent", node_id))
            })?;
            let parent_size = parent.header.current_size as usize;

            let mut right_pair = if idx + 1 < parent_size {
                let right_id = parent.value_at(idx + 1);
                let guard = self.buffer_pool.fetch_page_write(right_id)?;
                let (page, _) = BPlusTreePageCodec::decode(guard.data())?;
                Some((guard, page))
            } else {
                None
            };

            if let Some((right_guard, right)) = right_pair.as_mut() {
                if right.current_size() > right.min_size() {
                    self.borrow_from_right(&mut node, right, &mut parent, idx)?;
                    node_guard.overwrite(&BPlusTreePageCodec::encode(&node));
                    right_guard.overwrite(&BPlusTreePageCodec::encode(right));
                    parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
                    return Ok(());
                }
            }

            let mut left_pair = if idx > 0 {
                let left_id = parent.value_at(idx - 1);
                let guard = self.buffer_pool.fetch_page_write(left_id)?;
                let (page, _) = BPlusTreePageCodec::decode(guard.data())?;
                Some((guard, page))
            } else {
                None
            };

            if let Some((left_guard, left)) = left_pair.as_mut() {
                if left.current_size() > left.min_size() {
                    self.borrow_from_left(&mut node, left, &mut parent, idx)?;
                    node_guard.overwrite(&BPlusTreePageCodec::encode(&node));
                    left_guard.overwrite(&BPlusTreePageCodec::encode(left));
                    parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
                    return Ok(());
                }
            }

            let mut did_merge = false;
            if let Some((right_guard, right)) = right_pair.take() {
                if Self::merge_fits(&node, &right) {
                    self.merge_into_left(&mut node, right, &mut parent, idx + 1)?;
                    node_guard.overwrite(&BPlusTreePageCodec::encode(&node));
                    parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
                    let right_id = right_guard.page_id();
                    drop(right_guard);
                    if !self.buffer_pool.delete_page(right_id)? {
                        debug!("merged page {} still pinned, left for eviction", right_id);
                    }
                    did_merge = true;
                }
            }
            if !did_merge {
                if let Some((left_guard, left)) = left_pair.take() {
                    if Self::merge_fits(&left, &node) {
                        let mut left = left;
                        let mut left_guard = left_guard;
                        self.merge_into_left(&mut left, node, &mut parent, idx)?;
                        left_guard.overwrite(&BPlusTreePageCodec::encode(&left));
                        parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
                        drop(node_guard);
                        if !self.buffer_pool.delete_page(node_id)? {
                            debug!("merged page {} still pinned, left for eviction", node_id);
                        }
                        // The left sibling survives; the cascade continues
                        // from it.
                        node = left;
                        node_guard = left_guard;
                        did_merge = true;
                    }
                }
            }
            if !did_merge {
                // Neither borrow nor merge was possible; the underflow stays.
                return Ok(());
            }

            // The parent lost a separator; decide whether the cascade
            // continues.
            let grandparent_id = ctx.write_set.back().map(|g| g.page_id());
            let parent_is_root =
                grandparent_id.is_none() || grandparent_id == Some(self.header_page_id);
            if parent_is_root {
                if parent.header.current_size == 1 {
                    // A root with a single child hands the tree to that child.
                    let mut header_guard = ctx.write_set.pop_back().ok_or_else(|| {
                        GraniteError::Internal("root collapse lost the header latch".to_string())
                    })?;
                    let (mut header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
                    header.root_page_id = parent.value_at(0);
                    header_guard.overwrite(&BPlusTreeHeaderPageCodec::encode(&header));
                    let old_root_id = parent_guard.page_id();
                    drop(parent_guard);
                    drop(header_guard);
                    drop(node_guard);
                    if !self.buffer_pool.delete_page(old_root_id)? {
                        debug!("collapsed root {} still pinned, left for eviction", old_root_id);
                    }
                    debug!("root collapsed to {}", header.root_page_id);
                    return Ok(());
                }
                return Ok(());
            }
            if parent.header.current_size >= parent.min_size() {
                return Ok(());
            }

            node = BPlusTreePage::Internal(parent);
            node_guard = parent_guard;
        }
    }

    fn merge_fits(left: &BPlusTreePage, right: &BPlusTreePage) -> bool {
        match (left, right) {
            (BPlusTreePage::Leaf(a), BPlusTreePage::Leaf(b)) => {
                a.header.current_size + b.header.current_size <= a.header.max_size - 1
            }
            (BPlusTreePage::Internal(a), BPlusTreePage::Internal(b)) => {
                a.header.current_size + b.header.current_size <= a.header.max_size
            }
            _ => false,
        }
    }

    fn borrow_from_right(
        &self,
        node: &mut BPlusTreePage,
        right: &mut BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        idx: usize,
    ) -> GraniteResult<()> {
        match (node, right) {
            (BPlusTreePage::Leaf(node), BPlusTreePage::Leaf(right)) => {
                let kv = right.array.remove(0);
                right.header.current_size -= 1;
                node.array.push(kv);
                node.header.current_size += 1;
                parent.array[idx + 1].0 = right.key_at(0).to_vec();
                Ok(())
            }
            (BPlusTreePage::Internal(node), BPlusTreePage::Internal(right)) => {
                // The parent separator rotates down in front of the child
                // orphaned from the right sibling's slot 0.
                let separator = std::mem::take(&mut parent.array[idx + 1].0);
                let (_, child) = right.array.remove(0);
                right.header.current_size -= 1;
                node.array.push((separator, child));
                node.header.current_size += 1;
                parent.array[idx + 1].0 = std::mem::take(&mut right.array[0].0);
                Ok(())
            }
            _ => Err(GraniteError::Internal(
                "cannot borrow across different page kinds".to_string(),
            )),
        }
    }

    fn borrow_from_left(
        &self,
        node: &mut BPlusTreePage,
        left: &mut BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        idx: usize,
    ) -> GraniteResult<()> {
        match (node, left) {
            (BPlusTreePage::Leaf(node), BPlusTreePage::Leaf(left)) => {
                let kv = left
                    .array
                    .pop()
                    .ok_or_else(|| GraniteError::Internal("borrow from empty leaf".to_string()))?;
                left.header.current_size -= 1;
                parent.array[idx].0 = kv.0.clone();
                node.array.insert(0, kv);
                node.header.current_size += 1;
                Ok(())
            }
            (BPlusTreePage::Internal(node), BPlusTreePage::Internal(left)) => {
                let (last_key, last_child) = left.array.pop().ok_or_else(|| {
                    GraniteError::Internal("borrow from empty internal page".to_string())
                })?;
                left.header.current_size -= 1;
                // The old separator becomes the real key of the former
                // sentinel slot; the borrowed child arrives with a fresh
                // sentinel.
                let old_separator = std::mem::replace(&mut parent.array[idx].0, last_key);
                node.array[0].0 = old_separator;
                node.array.insert(0, (Vec::new(), last_child));
                node.header.current_size += 1;
                Ok(())
            }
            _ => Err(GraniteError::Internal(
                "cannot borrow across different page kinds".to_string(),
            )),
        }
    }

    /// Fold `right` into `left` and drop the parent's separator at
    /// `right_idx`.
    fn merge_into_left(
        &self,
        left: &mut BPlusTreePage,
        right: BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        right_idx: usize,
    ) -> GraniteResult<()> {
        match (left, right) {
            (BPlusTreePage::Leaf(left), BPlusTreePage::Leaf(right)) => {
                left.header.next_page_id = right.header.next_page_id;
                left.extend(right.array);
            }
            (BPlusTreePage::Internal(left), BPlusTreePage::Internal(mut right)) => {
                right.array[0].0 = parent.key_at(right_idx).to_vec();
                left.extend(right.array);
            }
            _ => {
                return Err(GraniteError::Internal(
                    "cannot merge different page kinds".to_string(),
                ))
            }
        }
        parent.remove_at(right_idx);
        Ok(())
    }

    /// Leftmost leaf, for full scans.
    pub(crate) fn find_first_leaf(&self) -> GraniteResult<Option<ReadPageGuard>> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let (header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
        if header.root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.buffer_pool.fetch_page_read(header.root_page_id)?;
        drop(header_guard);
        loop {
            let (page, _) = BPlusTreePageCodec::decode(guard.data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    let child_guard = self.buffer_pool.fetch_page_read(internal.value_at(0))?;
                    guard = child_guard;
                }
                BPlusTreePage::Leaf(_) => return Ok(Some(guard)),
            }
        }
    }

    /// Leaf whose key range covers `key`, for positioned scans.
    pub(crate) fn find_leaf_for(&self, key: &[u8]) -> GraniteResult<Option<ReadPageGuard>> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let (header, _) = BPlusTreeHeaderPageCodec::decode(header_guard.data())?;
        if header.root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.buffer_pool.fetch_page_read(header.root_page_id)?;
        drop(header_guard);
        loop {
            let (page, _) = BPlusTreePageCodec::decode(guard.data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    let child_id = internal.lookup_child(key, self.comparator);
                    let child_guard = self.buffer_pool.fetch_page_read(child_id)?;
                    guard = child_guard;
                }
                BPlusTreePage::Leaf(_) => return Ok(Some(guard)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferPoolConfig;
    use crate::storage::codec::BPlusTreeLeafPageCodec;
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::index::TreeIndexIterator;
    use std::thread;
    use tempfile::TempDir;

    fn setup_tree(
        pool_size: usize,
        leaf_max: u32,
        internal_max: u32,
    ) -> (TempDir, Arc<BPlusTreeIndex>) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let pool = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size,
                lru_k_k: 2,
            },
            disk_manager,
        ));
        let tree = Arc::new(
            BPlusTreeIndex::new(
                pool,
                BTreeConfig {
                    leaf_max_size: leaf_max,
                    internal_max_size: internal_max,
                },
            )
            .unwrap(),
        );
        (temp_dir, tree)
    }

    fn key(i: i64) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn rid(i: i64) -> RecordId {
        RecordId::new(i as PageId, i as u32)
    }

    fn collect_keys(tree: &Arc<BPlusTreeIndex>) -> Vec<i64> {
        let mut iter = TreeIndexIterator::new(tree.clone(), ..);
        let mut keys = Vec::new();
        while let Some((key, _)) = iter.next().unwrap() {
            keys.push(i64::from_be_bytes(key.as_slice().try_into().unwrap()));
        }
        keys
    }

    /// Leaf contents left to right, one Vec per leaf.
    fn leaf_shape(tree: &Arc<BPlusTreeIndex>) -> Vec<Vec<i64>> {
        let mut shape = Vec::new();
        let Some(mut guard) = tree.find_first_leaf().unwrap() else {
            return shape;
        };
        loop {
            let (leaf, _) = BPlusTreeLeafPageCodec::decode(guard.data()).unwrap();
            shape.push(
                leaf.array
                    .iter()
                    .map(|(k, _)| i64::from_be_bytes(k.as_slice().try_into().unwrap()))
                    .collect(),
            );
            let next = leaf.header.next_page_id;
            drop(guard);
            if next == INVALID_PAGE_ID {
                break;
            }
            guard = tree.buffer_pool.fetch_page_read(next).unwrap();
        }
        shape
    }

    fn root_separators(tree: &Arc<BPlusTreeIndex>) -> Vec<i64> {
        let root_id = tree.root_page_id().unwrap();
        let guard = tree.buffer_pool.fetch_page_read(root_id).unwrap();
        let (page, _) = BPlusTreePageCodec::decode(guard.data()).unwrap();
        match page {
            BPlusTreePage::Internal(internal) => internal
                .array
                .iter()
                .skip(1)
                .map(|(k, _)| i64::from_be_bytes(k.as_slice().try_into().unwrap()))
                .collect(),
            BPlusTreePage::Leaf(_) => Vec::new(),
        }
    }

    #[test]
    fn small_tree_split_and_merge_sequence() {
        let (_tmp, tree) = setup_tree(32, 3, 3);

        for i in 1..=5 {
            assert!(tree.insert(&key(i), rid(i)).unwrap());
        }
        assert_eq!(leaf_shape(&tree), vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(root_separators(&tree), vec![3, 5]);
        assert_eq!(collect_keys(&tree), vec![1, 2, 3, 4, 5]);

        tree.remove(&key(4)).unwrap();
        assert_eq!(leaf_shape(&tree), vec![vec![1, 2], vec![3, 5]]);
        assert_eq!(root_separators(&tree), vec![3]);

        tree.remove(&key(3)).unwrap();
        assert_eq!(leaf_shape(&tree), vec![vec![1, 2], vec![5]]);

        tree.remove(&key(5)).unwrap();
        assert_eq!(leaf_shape(&tree), vec![vec![1, 2]]);
        // The root collapsed to the single remaining leaf.
        let root_id = tree.root_page_id().unwrap();
        let guard = tree.buffer_pool.fetch_page_read(root_id).unwrap();
        let (page, _) = BPlusTreePageCodec::decode(guard.data()).unwrap();
        assert!(matches!(page, BPlusTreePage::Leaf(_)));
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let (_tmp, tree) = setup_tree(32, 4, 4);

        assert!(tree.insert(&key(10), rid(10)).unwrap());
        assert_eq!(tree.get(&key(10)).unwrap(), Some(rid(10)));
        // Duplicate keys are rejected with no side effect.
        assert!(!tree.insert(&key(10), rid(99)).unwrap());
        assert_eq!(tree.get(&key(10)).unwrap(), Some(rid(10)));

        tree.remove(&key(10)).unwrap();
        assert_eq!(tree.get(&key(10)).unwrap(), None);
        assert!(tree.is_empty().unwrap());

        // Removing from an empty tree is a no-op.
        tree.remove(&key(10)).unwrap();
    }

    #[test]
    fn bulk_sequential_insert_and_delete() {
        let (_tmp, tree) = setup_tree(128, 4, 4);

        for i in 1..=200 {
            assert!(tree.insert(&key(i), rid(i)).unwrap(), "insert {}", i);
        }
        for i in 1..=200 {
            assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)), "get {}", i);
        }
        assert_eq!(collect_keys(&tree), (1..=200).collect::<Vec<_>>());

        for i in (1..=200).rev() {
            tree.remove(&key(i)).unwrap();
        }
        assert!(tree.is_empty().unwrap());
    }

    #[test]
    fn bulk_reverse_insert_keeps_order() {
        let (_tmp, tree) = setup_tree(128, 5, 4);

        for i in (1..=100).rev() {
            assert!(tree.insert(&key(i), rid(i)).unwrap());
        }
        assert_eq!(collect_keys(&tree), (1..=100).collect::<Vec<_>>());

        for i in 1..=50 {
            tree.remove(&key(i * 2)).unwrap();
        }
        assert_eq!(
            collect_keys(&tree),
            (1..=100).filter(|i| i % 2 == 1).collect::<Vec<_>>()
        );
    }

    #[test]
    fn randomized_against_oracle() {
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};

        let (_tmp, tree) = setup_tree(256, 4, 5);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let mut oracle = std::collections::BTreeMap::new();

        let mut keys: Vec<i64> = (0..500).collect();
        keys.shuffle(&mut rng);
        for &i in &keys {
            tree.insert(&key(i), rid(i)).unwrap();
            oracle.insert(i, rid(i));
        }
        keys.shuffle(&mut rng);
        for &i in &keys {
            if rng.gen_bool(0.5) {
                tree.remove(&key(i)).unwrap();
                oracle.remove(&i);
            }
        }

        for i in 0..500 {
            assert_eq!(tree.get(&key(i)).unwrap(), oracle.get(&i).copied(), "key {}", i);
        }
        assert_eq!(
            collect_keys(&tree),
            oracle.keys().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn iterator_ranges() {
        let (_tmp, tree) = setup_tree(64, 4, 4);
        for i in 1..=20 {
            tree.insert(&key(i), rid(i)).unwrap();
        }

        let mut iter = TreeIndexIterator::new(tree.clone(), key(5)..key(9));
        let mut got = Vec::new();
        while let Some((k, _)) = iter.next().unwrap() {
            got.push(i64::from_be_bytes(k.as_slice().try_into().unwrap()));
        }
        assert_eq!(got, vec![5, 6, 7, 8]);

        let mut iter = TreeIndexIterator::new(tree.clone(), key(15)..);
        let mut got = Vec::new();
        while let Some((k, _)) = iter.next().unwrap() {
            got.push(i64::from_be_bytes(k.as_slice().try_into().unwrap()));
        }
        assert_eq!(got, vec![15, 16, 17, 18, 19, 20]);

        let mut empty = TreeIndexIterator::new(tree.clone(), key(100)..);
        assert!(empty.next().unwrap().is_none());
    }

    #[test]
    fn concurrent_readers_see_all_keys() {
        let (_tmp, tree) = setup_tree(128, 8, 8);
        for i in 0..300 {
            tree.insert(&key(i), rid(i)).unwrap();
        }

        let mut handles = Vec::new();
        for t in 0..4 {
            let tree = tree.clone();
            handles.push(thread::spawn(move || {
                for i in (t..300).step_by(4) {
                    assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn concurrent_inserts_disjoint_ranges() {
        let (_tmp, tree) = setup_tree(256, 6, 6);

        let mut handles = Vec::new();
        for t in 0..4i64 {
            let tree = tree.clone();
            handles.push(thread::spawn(move || {
                for i in (t * 100)..(t * 100 + 100) {
                    assert!(tree.insert(&key(i), rid(i)).unwrap());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collect_keys(&tree), (0..400).collect::<Vec<_>>());
        for i in 0..400 {
            assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)));
        }
    }
}
