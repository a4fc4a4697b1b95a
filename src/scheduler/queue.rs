//! Priority-tiered FIFO queue of unassigned submissions.
//!
//! One linked sequence holds every queued submission, interleaved with a
//! permanent boundary marker per tier, ordered highest tier first. Walking
//! the sequence therefore visits submissions in dispatch order (higher tier
//! before lower, FIFO within a tier), and a side index maps submission id to
//! its node so queued entries can be removed in O(1) without a per-tier
//! container.

use std::collections::HashMap;

use crate::error::{BridgeError, Result};

/// A submission waiting for a capable judge.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: u64,
    pub problem: String,
    pub language: String,
    pub source: String,
    /// Pins the submission to one named judge.
    pub judge_id: Option<String>,
    /// Priority tier, 0 = lowest.
    pub priority: u8,
}

type NodeId = u64;

#[derive(Debug)]
enum Entry {
    Marker(u8),
    Submission(Submission),
}

#[derive(Debug)]
struct Node {
    prev: Option<NodeId>,
    next: Option<NodeId>,
    entry: Entry,
}

#[derive(Debug)]
pub struct TierQueue {
    nodes: HashMap<NodeId, Node>,
    /// Marker node per tier; markers are created once and never removed.
    markers: Vec<NodeId>,
    head: NodeId,
    tail: NodeId,
    /// submission id -> node, exactly one entry per queued submission.
    index: HashMap<u64, NodeId>,
    next_node: NodeId,
    tiers: u8,
}

impl TierQueue {
    pub fn new(tiers: u8) -> Self {
        assert!(tiers > 0, "at least one priority tier is required");
        let mut queue = Self {
            nodes: HashMap::new(),
            markers: vec![0; tiers as usize],
            head: 0,
            tail: 0,
            index: HashMap::new(),
            next_node: 0,
            tiers,
        };

        // Highest tier first, so sequence order is dispatch order.
        let mut prev: Option<NodeId> = None;
        for tier in (0..tiers).rev() {
            let id = queue.alloc(Entry::Marker(tier));
            if let Some(node) = queue.nodes.get_mut(&id) {
                node.prev = prev;
            }
            if let Some(p) = prev {
                if let Some(node) = queue.nodes.get_mut(&p) {
                    node.next = Some(id);
                }
            } else {
                queue.head = id;
            }
            queue.markers[tier as usize] = id;
            prev = Some(id);
        }
        queue.tail = prev.expect("tiers > 0 guarantees a marker");
        queue
    }

    fn alloc(&mut self, entry: Entry) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                prev: None,
                next: None,
                entry,
            },
        );
        id
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, submission_id: u64) -> bool {
        self.index.contains_key(&submission_id)
    }

    /// Append at the tail of the submission's tier.
    pub fn enqueue(&mut self, submission: Submission) -> Result<()> {
        if submission.priority >= self.tiers {
            return Err(BridgeError::InvalidPriority(submission.priority));
        }
        if self.index.contains_key(&submission.id) {
            return Err(BridgeError::Internal(format!(
                "submission {} already queued",
                submission.id
            )));
        }

        let tier = submission.priority;
        let submission_id = submission.id;
        let id = self.alloc(Entry::Submission(submission));

        // A tier's region ends right before the next lower marker; tier 0
        // runs to the end of the list.
        match tier {
            0 => self.link_after(self.tail, id),
            t => self.link_before(self.markers[(t - 1) as usize], id),
        }
        self.index.insert(submission_id, id);
        Ok(())
    }

    /// Remove a queued submission by id, dropping its index entry with it.
    pub fn remove(&mut self, submission_id: u64) -> Option<Submission> {
        let node_id = self.index.remove(&submission_id)?;
        let node = self.unlink(node_id)?;
        match node.entry {
            Entry::Submission(sub) => Some(sub),
            Entry::Marker(_) => None,
        }
    }

    /// Walk the queue in dispatch order: highest tier first, FIFO within a
    /// tier.
    pub fn scan(&self) -> impl Iterator<Item = (u8, &Submission)> + '_ {
        ScanIter {
            queue: self,
            cursor: Some(self.head),
            tier: self.tiers - 1,
        }
    }

    fn link_after(&mut self, anchor: NodeId, id: NodeId) {
        let next = self.nodes.get(&anchor).and_then(|n| n.next);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.prev = Some(anchor);
            node.next = next;
        }
        if let Some(node) = self.nodes.get_mut(&anchor) {
            node.next = Some(id);
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes.get_mut(&n) {
                    node.prev = Some(id);
                }
            }
            None => self.tail = id,
        }
    }

    fn link_before(&mut self, anchor: NodeId, id: NodeId) {
        let prev = self.nodes.get(&anchor).and_then(|n| n.prev);
        match prev {
            // Markers below the highest always have a predecessor marker,
            // so inserting before one never touches the head.
            Some(p) => self.link_after(p, id),
            None => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.next = Some(anchor);
                }
                if let Some(node) = self.nodes.get_mut(&anchor) {
                    node.prev = Some(id);
                }
                self.head = id;
            }
        }
    }

    fn unlink(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        if let Some(p) = node.prev {
            if let Some(prev) = self.nodes.get_mut(&p) {
                prev.next = node.next;
            }
        } else if let Some(n) = node.next {
            self.head = n;
        }
        match node.next {
            Some(n) => {
                if let Some(next) = self.nodes.get_mut(&n) {
                    next.prev = node.prev;
                }
            }
            None => {
                if let Some(p) = node.prev {
                    self.tail = p;
                }
            }
        }
        Some(node)
    }
}

struct ScanIter<'a> {
    queue: &'a TierQueue,
    cursor: Option<NodeId>,
    tier: u8,
}

impl<'a> Iterator for ScanIter<'a> {
    type Item = (u8, &'a Submission);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.cursor {
            let node = self.queue.nodes.get(&id)?;
            self.cursor = node.next;
            match &node.entry {
                Entry::Marker(tier) => self.tier = *tier,
                Entry::Submission(sub) => return Some((self.tier, sub)),
            }
        }
        None
    }
}
