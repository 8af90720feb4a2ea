use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-sortable 128-bit identifier (UUIDv7). Lexicographic order of the
/// string form matches creation order, which keeps btree indexes on these
/// columns append-mostly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSortableId(Uuid);

impl TimeSortableId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn parse(input: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(input)?))
    }
}

impl Default for TimeSortableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimeSortableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TimeSortableId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<TimeSortableId> for Uuid {
    fn from(id: TimeSortableId) -> Self {
        id.0
    }
}

impl std::str::FromStr for TimeSortableId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_generated_later_sort_greater() {
        let first = TimeSortableId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = TimeSortableId::new();
        assert!(second > first);
    }

    #[test]
    fn round_trips_through_string() {
        let id = TimeSortableId::new();
        let parsed: TimeSortableId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
