//! Status map and the "loudest wins" reduction over it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::status::{Rank, StatusOrdering};

/// Last known status per node identity
///
/// Entries are stored by rank, resolved once when they are written.
#[derive(Debug, Clone)]
pub struct StatusMap {
    ordering: Arc<StatusOrdering>,
    entries: HashMap<String, Rank>,
}

impl StatusMap {
    pub fn new(ordering: Arc<StatusOrdering>) -> Self {
        Self {
            ordering,
            entries: HashMap::new(),
        }
    }

    /// Insert or overwrite an identity's status
    pub fn set_status(&mut self, identity: &str, status: &str) -> Result<()> {
        let rank = self.ordering.validate(status)?;
        self.entries.insert(identity.to_string(), rank);
        Ok(())
    }

    /// Delete an identity's entry, returning its last status
    pub fn remove_status(&mut self, identity: &str) -> Option<&str> {
        let rank = self.entries.remove(identity)?;
        Some(self.ordering.name(rank))
    }

    pub fn get(&self, identity: &str) -> Option<&str> {
        self.entries.get(identity).map(|&rank| self.ordering.name(rank))
    }

    /// Highest rank present, or `default` if nothing outranks it
    ///
    /// Stops scanning as soon as the top configured status is seen.
    pub fn aggregate_rank(&self, default: Rank) -> Rank {
        let top = self.ordering.highest_rank();
        let mut max = default;
        for &rank in self.entries.values() {
            if rank == top {
                return top;
            }
            if rank > max {
                max = rank;
            }
        }
        max
    }

    /// Aggregate status name, falling back to `default_status`
    pub fn aggregate(&self, default_status: &str) -> Result<&str> {
        let default = self.ordering.validate(default_status)?;
        Ok(self.ordering.name(self.aggregate_rank(default)))
    }

    /// Identities with a recorded status
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Keep only the entries for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|identity, _| keep(identity));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
