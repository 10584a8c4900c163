use crate::model::EntityKind;
use std::collections::HashMap;
use uuid::Uuid;

/// Source of fresh ids for every "add" operation in the domain store.
pub trait IdAllocator {
    fn next_id(&mut self, kind: EntityKind) -> String;
}

/// Random v4 uuids. Used by the sidecar.
#[derive(Debug, Default)]
pub struct UuidIds;

impl IdAllocator for UuidIds {
    fn next_id(&mut self, _kind: EntityKind) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Monotonic per-kind counter producing ids like `sec-3`.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counters: HashMap<EntityKind, u64>,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdAllocator for SequentialIds {
    fn next_id(&mut self, kind: EntityKind) -> String {
        let n = self.counters.entry(kind).or_insert(0);
        *n += 1;
        format!("{}-{}", kind.id_prefix(), n)
    }
}
