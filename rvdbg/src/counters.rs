use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

/// Direction of a bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDirection {
    Read,
    Write,
}

impl AccessDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Per bus master read and write counts.
///
/// Counts only grow. They wrap around at `u64::MAX`.
#[derive(Debug, Default)]
pub struct AccessCounters {
    counts: Mutex<BTreeMap<(u32, AccessDirection), u64>>,
}

impl AccessCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, master: u32, direction: AccessDirection) {
        let mut counts = self.counts.lock();
        let count = counts.entry((master, direction)).or_insert(0);
        *count = count.wrapping_add(1);
    }

    pub fn get(&self, master: u32, direction: AccessDirection) -> u64 {
        self.counts
            .lock()
            .get(&(master, direction))
            .copied()
            .unwrap_or(0)
    }

    /// All non-zero counters, ordered by master and direction.
    pub fn snapshot(&self) -> Vec<(u32, AccessDirection, u64)> {
        self.counts
            .lock()
            .iter()
            .map(|(&(master, direction), &count)| (master, direction, count))
            .collect()
    }
}
