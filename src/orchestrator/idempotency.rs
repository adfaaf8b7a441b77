use std::collections::{HashMap, HashSet, VecDeque};

use crate::decision::SelectionDecision;

/// FIFO-bounded set of ids. The oldest id is forgotten once full.
#[derive(Debug)]
pub struct BoundedIdSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl BoundedIdSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        self.members.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// Emitted decisions by request id, oldest evicted first.
#[derive(Debug)]
pub struct DecisionCache {
    order: VecDeque<String>,
    decisions: HashMap<String, SelectionDecision>,
    capacity: usize,
}

impl DecisionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            decisions: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, request_id: &str) -> Option<&SelectionDecision> {
        self.decisions.get(request_id)
    }

    pub fn insert(&mut self, decision: SelectionDecision) {
        let id = decision.request_id.clone();
        if self.decisions.insert(id.clone(), decision).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.decisions.remove(&old);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
