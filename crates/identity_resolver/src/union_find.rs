//! Disjoint-set forest over dual-identity player keys.

use aegis_types::{EosId, SteamId};
use std::collections::HashMap;

/// A single identity key: one side of a player's dual identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Steam(SteamId),
    Eos(EosId),
}

impl IdentityKey {
    /// Stable string form used for canonical-id selection and lookups.
    pub fn as_string(&self) -> String {
        match self {
            IdentityKey::Steam(id) => format!("steam:{id}"),
            IdentityKey::Eos(id) => format!("eos:{id}"),
        }
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

/// Union-find with path compression and union by rank.
///
/// Keys are interned on first sight; a key seen alone forms a singleton
/// class until a record carrying both of a player's identifiers unions it
/// with its sibling.
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
    keys: Vec<IdentityKey>,
    index: HashMap<IdentityKey, usize>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a key, returning its slot.
    pub fn insert(&mut self, key: IdentityKey) -> usize {
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        let slot = self.parent.len();
        self.parent.push(slot);
        self.rank.push(0);
        self.keys.push(key.clone());
        self.index.insert(key, slot);
        slot
    }

    /// Slot for a key already interned, if any.
    pub fn get(&self, key: &IdentityKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Representative slot for the class containing `slot`.
    pub fn find(&mut self, slot: usize) -> usize {
        let mut root = slot;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut current = slot;
        while self.parent[current] != current {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merges the classes containing the two slots.
    pub fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
    }

    /// Number of interned keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key stored at a slot.
    pub fn key(&self, slot: usize) -> &IdentityKey {
        &self.keys[slot]
    }

    /// Groups every interned key by its class representative.
    pub fn classes(&mut self) -> Vec<Vec<IdentityKey>> {
        let mut groups: HashMap<usize, Vec<IdentityKey>> = HashMap::new();
        for slot in 0..self.len() {
            let root = self.find(slot);
            groups.entry(root).or_default().push(self.keys[slot].clone());
        }
        let mut classes: Vec<Vec<IdentityKey>> = groups.into_values().collect();
        for class in &mut classes {
            class.sort();
        }
        classes.sort();
        classes
    }
}
