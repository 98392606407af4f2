//! Total order over the configured status names.
//!
//! Statuses are compared by their position in the configured list: the
//! first entry is the lowest priority, the last entry the highest. Names are
//! resolved once here, so every external boundary rejects unknown names
//! through the same lookup.

use std::collections::HashMap;

use crate::error::{Result, SyncError};

/// Position of a status in the configured list; higher wins
pub type Rank = usize;

/// Resolved `{name -> rank}` lookup built from configuration
#[derive(Debug, Clone)]
pub struct StatusOrdering {
    names: Vec<String>,
    ranks: HashMap<String, Rank>,
    default_rank: Rank,
}

impl StatusOrdering {
    /// Build the ordering from the configured list and default status
    pub fn new(statuses: &[String], default_status: &str) -> Result<Self> {
        if statuses.is_empty() {
            return Err(SyncError::Config("status list is empty".to_string()));
        }

        let mut ranks = HashMap::with_capacity(statuses.len());
        for (rank, name) in statuses.iter().enumerate() {
            if ranks.insert(name.clone(), rank).is_some() {
                return Err(SyncError::Config(format!("duplicate status \"{}\"", name)));
            }
        }

        let default_rank = *ranks.get(default_status).ok_or_else(|| {
            SyncError::Config(format!(
                "default status \"{}\" is not a configured status",
                default_status
            ))
        })?;

        Ok(Self {
            names: statuses.to_vec(),
            ranks,
            default_rank,
        })
    }

    /// Rank of a configured status
    pub fn rank(&self, name: &str) -> Result<Rank> {
        self.ranks
            .get(name)
            .copied()
            .ok_or_else(|| SyncError::Config(format!("unknown status \"{}\"", name)))
    }

    /// Resolve a status arriving at a runtime boundary
    pub fn validate(&self, name: &str) -> Result<Rank> {
        self.ranks
            .get(name)
            .copied()
            .ok_or_else(|| SyncError::InvalidStatus(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ranks.contains_key(name)
    }

    /// Whether `a` ranks at least as high as `b`
    pub fn higher_or_equal(&self, a: &str, b: &str) -> Result<bool> {
        Ok(self.rank(a)? >= self.rank(b)?)
    }

    /// Name at a rank; ranks only ever come from this ordering
    pub fn name(&self, rank: Rank) -> &str {
        &self.names[rank]
    }

    pub fn default_rank(&self) -> Rank {
        self.default_rank
    }

    pub fn default_status(&self) -> &str {
        self.name(self.default_rank)
    }

    /// Rank of the last configured status; nothing outranks it
    pub fn highest_rank(&self) -> Rank {
        self.names.len() - 1
    }

    pub fn highest(&self) -> &str {
        self.name(self.highest_rank())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
