use std::collections::{HashMap, VecDeque};

use crate::buffer::{FrameId, Replacer};
use crate::error::{GraniteError, GraniteResult};

#[derive(Debug)]
struct LruKNode {
    // Access timestamps, most recent at the front, at most k entries.
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new(k: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: u64, k: usize) {
        self.history.push_front(timestamp);
        if self.history.len() > k {
            self.history.pop_back();
        }
    }

    fn oldest(&self) -> u64 {
        *self.history.back().expect("node has at least one access")
    }
}

/// Eviction policy based on backward k-distance: the distance of a frame is
/// `now - t` where `t` is the timestamp of its k-th most recent access, or
/// infinite when fewer than k accesses exist. The frame with the largest
/// distance is evicted; infinite-distance frames are ordered by their oldest
/// access (classic LRU among cold frames).
#[derive(Debug)]
pub struct LruKReplacer {
    current_size: usize,
    replacer_size: usize,
    k: usize,
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            current_size: 0,
            replacer_size: num_frames,
            k,
            node_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&mut self, frame_id: FrameId) -> GraniteResult<()> {
        if !self.node_store.contains_key(&frame_id) {
            if self.node_store.len() >= self.replacer_size {
                return Err(GraniteError::Internal(format!(
                    "frame {} exceeds replacer capacity {}",
                    frame_id, self.replacer_size
                )));
            }
            self.node_store.insert(frame_id, LruKNode::new(self.k));
        }
        let node = self.node_store.get_mut(&frame_id).unwrap();
        node.record_access(self.current_timestamp, self.k);
        self.current_timestamp += 1;
        Ok(())
    }

    fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<FrameId> = None;
        let mut victim_is_cold = false;
        let mut max_distance = 0u64;
        let mut min_oldest = u64::MAX;

        for (frame_id, node) in self.node_store.iter() {
            if !node.is_evictable {
                continue;
            }
            if node.history.len() < self.k {
                // Infinite distance; tie-break on the earliest oldest access.
                if !victim_is_cold || node.oldest() < min_oldest {
                    victim = Some(*frame_id);
                    victim_is_cold = true;
                    min_oldest = node.oldest();
                }
            } else if !victim_is_cold {
                let distance = self.current_timestamp - node.oldest();
                if victim.is_none() || distance > max_distance {
                    victim = Some(*frame_id);
                    max_distance = distance;
                }
            }
        }

        if let Some(frame_id) = victim {
            self.node_store.remove(&frame_id);
            self.current_size -= 1;
        }
        victim
    }

    fn set_evictable(&mut self, frame_id: FrameId, set_evictable: bool) {
        let Some(node) = self.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable != set_evictable {
            node.is_evictable = set_evictable;
            if set_evictable {
                self.current_size += 1;
            } else {
                self.current_size -= 1;
            }
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.node_store.get(&frame_id) {
            assert!(node.is_evictable, "cannot remove a non-evictable frame");
            self.node_store.remove(&frame_id);
            self.current_size -= 1;
        }
    }

    fn size(&self) -> usize {
        self.current_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_evictable_tracks_size() {
        let mut replacer = LruKReplacer::new(3, 2);
        replacer.record_access(1).unwrap();
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(1, false);
        assert_eq!(replacer.size(), 0);
        // Unknown frames are a no-op.
        replacer.set_evictable(42, true);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn evict_prefers_infinite_distance() {
        let mut replacer = LruKReplacer::new(2, 3);
        replacer.record_access(1).unwrap(); // ts=0
        replacer.record_access(2).unwrap(); // ts=1
        replacer.record_access(2).unwrap(); // ts=2
        replacer.record_access(1).unwrap(); // ts=3
        replacer.record_access(2).unwrap(); // ts=4
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        // Frame 1 has two of three accesses recorded (infinite distance),
        // frame 2 is warm with distance 5 - 1 = 4. The cold frame wins.
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn cold_frames_beat_hot_frames() {
        let mut replacer = LruKReplacer::new(3, 3);
        replacer.record_access(1).unwrap(); // ts=0
        replacer.record_access(2).unwrap(); // ts=1
        replacer.record_access(3).unwrap(); // ts=2
        replacer.record_access(1).unwrap(); // ts=3
        replacer.record_access(1).unwrap(); // ts=4, frame 1 has k accesses
        replacer.record_access(3).unwrap(); // ts=5
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.set_evictable(3, true);
        // Frames 2 and 3 have infinite distance; frame 2 is older.
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn full_eviction_sequence() {
        let mut replacer = LruKReplacer::new(7, 2);

        replacer.record_access(1).unwrap(); // ts=0
        replacer.record_access(2).unwrap(); // ts=1
        replacer.record_access(3).unwrap(); // ts=2
        replacer.record_access(4).unwrap(); // ts=3
        replacer.record_access(5).unwrap(); // ts=4
        replacer.record_access(6).unwrap(); // ts=5
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.set_evictable(3, true);
        replacer.set_evictable(4, true);
        replacer.set_evictable(5, true);
        replacer.set_evictable(6, false);
        assert_eq!(replacer.size(), 5);

        replacer.record_access(1).unwrap(); // ts=6, frame 1 now has 2 accesses

        // Cold frames first, ordered by oldest access: 2, 3, 4.
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.size(), 2);

        replacer.record_access(3).unwrap(); // ts=7
        replacer.record_access(4).unwrap(); // ts=8
        replacer.record_access(5).unwrap(); // ts=9
        replacer.record_access(4).unwrap(); // ts=10
        replacer.set_evictable(3, true);
        replacer.set_evictable(4, true);
        assert_eq!(replacer.size(), 4);

        // Frame 3 is the only cold frame left.
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.size(), 3);

        replacer.set_evictable(6, true);
        assert_eq!(replacer.size(), 4);
        // Frame 6 is cold (single access at ts=5).
        assert_eq!(replacer.evict(), Some(6));
        assert_eq!(replacer.size(), 3);

        replacer.set_evictable(1, false);
        assert_eq!(replacer.size(), 2);
        // Frames 5 [9,4] and 4 [10,8]; frame 5 has the larger distance.
        assert_eq!(replacer.evict(), Some(5));
        assert_eq!(replacer.size(), 1);

        replacer.record_access(1).unwrap(); // ts=11
        replacer.record_access(1).unwrap(); // ts=12
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 2);
        // Frame 4 [10,8] dist 5, frame 1 [12,11] dist 2.
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn remove_non_evictable_panics() {
        let mut replacer = LruKReplacer::new(2, 2);
        replacer.record_access(1).unwrap();
        replacer.remove(1);
    }
}
