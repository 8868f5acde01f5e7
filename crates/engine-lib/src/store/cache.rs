//! Cached read handle over the artifact store

use super::{ArtifactSet, ArtifactStore};
use crate::error::Result;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Loads a generation once and shares it across inference calls.
///
/// Callers get an `Arc` to one complete generation; a swap of `CURRENT`
/// is picked up on the next [`ArtifactCache::get`].
pub struct ArtifactCache {
    store: ArtifactStore,
    loaded: RwLock<Option<Arc<ArtifactSet>>>,
}

impl ArtifactCache {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            loaded: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Generation currently held in memory, if any
    pub fn cached_generation(&self) -> Option<String> {
        self.read_slot().as_ref().map(|set| set.generation.clone())
    }

    /// Current generation, reloading if `CURRENT` moved since the last call
    pub fn get(&self) -> Result<Arc<ArtifactSet>> {
        let id = self.store.require_current()?;
        if let Some(set) = self.read_slot().as_ref() {
            if set.generation == id {
                return Ok(Arc::clone(set));
            }
        }

        let set = match self.store.load_generation(&id) {
            Ok(set) => set,
            Err(e) => {
                // A concurrent commit may have pruned the generation we resolved
                let retry = self.store.require_current()?;
                if retry == id {
                    return Err(e);
                }
                warn!(stale = %id, current = %retry, error = %e, "Generation moved during load, retrying");
                self.store.load_generation(&retry)?
            }
        };

        let set = Arc::new(set);
        let previous = self.write_slot().replace(Arc::clone(&set));
        info!(
            generation = %set.generation,
            previous = ?previous.map(|p| p.generation.clone()),
            "Artifact generation activated"
        );
        Ok(set)
    }

    /// Drop the cached generation so the next call reloads from disk
    pub fn invalidate(&self) {
        self.write_slot().take();
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<ArtifactSet>>> {
        self.loaded.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<ArtifactSet>>> {
        self.loaded.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
