//! In-memory object sink for lifecycle tests.

use std::{collections::BTreeSet, sync::Mutex};

use async_trait::async_trait;

use super::{ObjectSink, SinkError};

/// Test sink holding a set of object keys.
///
/// `accepting_all` mode reports every key as present, for tests where the
/// store double "writes" artifacts the sink never sees.
#[derive(Default)]
pub struct MemorySink {
    objects: Mutex<BTreeSet<String>>,
    accept_all: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting_all() -> Self {
        Self {
            objects: Mutex::new(BTreeSet::new()),
            accept_all: true,
        }
    }

    pub fn put(&self, key: &str) {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string());
    }
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn artifact_exists(&self, key: &str) -> Result<bool, SinkError> {
        if self.accept_all {
            return Ok(true);
        }
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key))
    }

    async fn list_artifacts(&self, prefix: &str) -> Result<Vec<String>, SinkError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
