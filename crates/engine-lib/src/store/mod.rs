//! Versioned artifact store
//!
//! This module provides:
//! - Generation directories holding one consistent set of artifacts
//! - Atomic swap of the `CURRENT` pointer on commit and rollback
//! - SHA-256 checksums verified on every load
//! - An exclusive writer lock so at most one training or update runs at a time
//! - A cached handle for readers (see [`ArtifactCache`])
//!
//! Layout:
//! ```text
//! <root>/CURRENT
//! <root>/generations/<id>/{transform,regressor,anomaly_gate,maintenance,hyperparameters,manifest}.json
//! <root>/.staging-<id>/
//! <root>/.writer.lock
//! ```

mod cache;
mod manifest;

pub use cache::ArtifactCache;
pub use manifest::{GenerationManifest, GenerationOrigin, HyperparameterRecord};

use crate::anomaly::AnomalyGate;
use crate::error::{ArtifactKind, EngineError, Result};
use crate::learners::GradientBoostedRegressor;
use crate::maintenance::MaintenanceEstimator;
use crate::training::EvaluationReport;
use crate::transform::FeatureTransform;
use manifest::GenerationId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CURRENT_FILE: &str = "CURRENT";
const GENERATIONS_DIR: &str = "generations";
const STAGING_PREFIX: &str = ".staging-";
const LOCK_FILE: &str = ".writer.lock";

/// Default number of committed generations retained on disk
pub const DEFAULT_GENERATIONS_TO_KEEP: usize = 5;

/// One fully loaded, mutually consistent generation
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub generation: String,
    pub transform: FeatureTransform,
    pub regressor: GradientBoostedRegressor,
    pub anomaly_gate: AnomalyGate,
    pub maintenance: MaintenanceEstimator,
    pub hyperparameters: HyperparameterRecord,
    pub manifest: GenerationManifest,
}

impl ArtifactSet {
    /// Cross-check that every model consumes this transform's output
    pub fn check_consistency(&self) -> Result<()> {
        self.transform.validate()?;
        self.regressor.validate().map_err(|e| EngineError::Corrupt {
            artifact: ArtifactKind::Regressor,
            reason: e.to_string(),
        })?;
        if self.regressor.n_features() != self.transform.width() {
            return Err(EngineError::Corrupt {
                artifact: ArtifactKind::Regressor,
                reason: format!(
                    "regressor expects {} features, transform produces {}",
                    self.regressor.n_features(),
                    self.transform.width()
                ),
            });
        }
        self.anomaly_gate.check_compatible(&self.transform)?;
        self.maintenance.check_compatible(&self.transform)?;
        Ok(())
    }
}

/// Hex SHA-256 of a byte slice
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Filesystem-backed store of artifact generations
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    keep: usize,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>, keep: usize) -> Result<Self> {
        let root = root.into();
        let generations = root.join(GENERATIONS_DIR);
        fs::create_dir_all(&generations).map_err(|e| EngineError::io(&generations, e))?;
        Ok(Self {
            root,
            keep: keep.max(1),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generation_dir(&self, id: &str) -> PathBuf {
        self.root.join(GENERATIONS_DIR).join(id)
    }

    fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    /// Id of the committed generation, if any
    pub fn current_id(&self) -> Result<Option<String>> {
        let path = self.current_path();
        match fs::read_to_string(&path) {
            Ok(text) => {
                let id = text.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(path, e)),
        }
    }

    fn require_current(&self) -> Result<String> {
        self.current_id()?.ok_or_else(|| EngineError::ArtifactMissing {
            artifact: ArtifactKind::CurrentPointer,
            path: self.current_path(),
        })
    }

    /// Path of one artifact in the committed generation
    pub fn current_artifact_path(&self, kind: ArtifactKind) -> Result<PathBuf> {
        let id = self.require_current()?;
        Ok(self.generation_dir(&id).join(kind.file_name()))
    }

    /// Load and verify the committed generation
    pub fn load_current(&self) -> Result<ArtifactSet> {
        let id = self.require_current()?;
        self.load_generation(&id)
    }

    /// Load and verify a specific generation
    pub fn load_generation(&self, id: &str) -> Result<ArtifactSet> {
        let dir = self.generation_dir(id);
        let manifest: GenerationManifest = read_artifact(&dir, ArtifactKind::Manifest, None)?;
        let checksums = Some(&manifest.checksums);

        let set = ArtifactSet {
            generation: id.to_string(),
            transform: read_artifact(&dir, ArtifactKind::Transform, checksums)?,
            regressor: read_artifact(&dir, ArtifactKind::Regressor, checksums)?,
            anomaly_gate: read_artifact(&dir, ArtifactKind::AnomalyGate, checksums)?,
            maintenance: read_artifact(&dir, ArtifactKind::MaintenanceEstimator, checksums)?,
            hyperparameters: read_artifact(&dir, ArtifactKind::Hyperparameters, checksums)?,
            manifest,
        };
        set.check_consistency()?;

        debug!(generation = %id, "Artifact generation loaded");
        Ok(set)
    }

    /// Read one artifact from the committed generation, verifying its checksum
    pub fn read_current<T: DeserializeOwned>(&self, kind: ArtifactKind) -> Result<T> {
        let id = self.require_current()?;
        let dir = self.generation_dir(&id);
        let manifest: GenerationManifest = read_artifact(&dir, ArtifactKind::Manifest, None)?;
        read_artifact(&dir, kind, Some(&manifest.checksums))
    }

    /// Start an empty generation; holds the writer lock until commit or drop
    pub fn stage(&self) -> Result<StagedGeneration> {
        let lock = WriterLock::acquire(&self.root)?;
        let parent = self.current_id()?;
        let id = self.next_id()?;
        let dir = self.root.join(format!("{STAGING_PREFIX}{id}"));
        fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        debug!(generation = %id, parent = ?parent, "Generation staged");
        Ok(StagedGeneration {
            store: self.clone(),
            id,
            dir,
            parent,
            origin: GenerationOrigin::Training,
            evaluation: None,
            committed: false,
            _lock: lock,
        })
    }

    /// Start a generation pre-populated with the committed generation's artifacts
    ///
    /// The source generation is resolved under the writer lock, so it is
    /// always the staged generation's parent.
    pub fn stage_from_current(&self) -> Result<StagedGeneration> {
        let mut staged = self.stage()?;
        let current = staged.parent.clone().ok_or_else(|| EngineError::ArtifactMissing {
            artifact: ArtifactKind::CurrentPointer,
            path: self.current_path(),
        })?;
        let source = self.generation_dir(&current);
        staged.origin = GenerationOrigin::IncrementalUpdate;
        for kind in ArtifactKind::REQUIRED {
            let from = source.join(kind.file_name());
            if !from.exists() {
                return Err(EngineError::ArtifactMissing { artifact: kind, path: from });
            }
            let to = staged.dir.join(kind.file_name());
            fs::copy(&from, &to).map_err(|e| EngineError::io(&from, e))?;
        }
        if let Ok(manifest) = read_artifact::<GenerationManifest>(&source, ArtifactKind::Manifest, None) {
            staged.evaluation = manifest.evaluation;
        }
        Ok(staged)
    }

    /// Manifests of every committed generation, oldest first
    pub fn list_generations(&self) -> Result<Vec<GenerationManifest>> {
        let mut manifests = Vec::new();
        for id in self.generation_ids()? {
            match read_artifact::<GenerationManifest>(&self.generation_dir(&id), ArtifactKind::Manifest, None) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!(generation = %id, error = %e, "Skipping unreadable generation"),
            }
        }
        Ok(manifests)
    }

    /// Point `CURRENT` back at the current generation's parent
    pub fn rollback(&self) -> Result<String> {
        let _lock = WriterLock::acquire(&self.root)?;
        let current = self.require_current()?;
        let ids = self.generation_ids()?;

        let parent = read_artifact::<GenerationManifest>(&self.generation_dir(&current), ArtifactKind::Manifest, None)
            .ok()
            .and_then(|m| m.parent)
            .filter(|p| ids.contains(p));
        let target = match parent {
            Some(parent) => parent,
            None => ids
                .iter()
                .filter(|id| id.as_str() < current.as_str())
                .last()
                .cloned()
                .ok_or_else(|| {
                    EngineError::Configuration(format!("no generation before {current} to roll back to"))
                })?,
        };

        self.load_generation(&target)?;
        self.write_current(&target)?;
        info!(from = %current, to = %target, "Rolled back artifact generation");
        Ok(target)
    }

    /// Committed generation ids in ascending order
    fn generation_ids(&self) -> Result<Vec<String>> {
        let dir = self.root.join(GENERATIONS_DIR);
        let entries = fs::read_dir(&dir).map_err(|e| EngineError::io(&dir, e))?;
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| GenerationId::parse(name).is_some())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn next_id(&self) -> Result<String> {
        let entries = fs::read_dir(&self.root).map_err(|e| EngineError::io(&self.root, e))?;
        let staged = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| name.strip_prefix(STAGING_PREFIX).map(str::to_string));
        let latest = self
            .generation_ids()?
            .into_iter()
            .chain(staged)
            .filter_map(|id| GenerationId::parse(&id))
            .max();
        Ok(GenerationId::next(chrono::Utc::now(), latest.as_ref()).to_string())
    }

    fn write_current(&self, id: &str) -> Result<()> {
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        write_synced(&tmp, id.as_bytes())?;
        let path = self.current_path();
        fs::rename(&tmp, &path).map_err(|e| EngineError::io(&path, e))
    }

    /// Remove the oldest generations beyond the retention count, never the current one
    fn prune(&self, current: &str) -> Result<()> {
        let ids = self.generation_ids()?;
        if ids.len() <= self.keep {
            return Ok(());
        }
        let excess = ids.len() - self.keep;
        for id in ids.iter().filter(|id| id.as_str() != current).take(excess) {
            let dir = self.generation_dir(id);
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!(generation = %id, "Pruned generation"),
                Err(e) => warn!(generation = %id, error = %e, "Failed to prune generation"),
            }
        }
        Ok(())
    }
}

/// In-progress generation; discarded on drop unless committed
#[derive(Debug)]
pub struct StagedGeneration {
    store: ArtifactStore,
    id: String,
    dir: PathBuf,
    parent: Option<String>,
    origin: GenerationOrigin,
    evaluation: Option<EvaluationReport>,
    committed: bool,
    _lock: WriterLock,
}

impl StagedGeneration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn contains(&self, kind: ArtifactKind) -> bool {
        self.artifact_path(kind).exists()
    }

    /// Serialize an artifact into the staging directory
    pub fn write<T: Serialize>(&self, kind: ArtifactKind, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        write_synced(&self.artifact_path(kind), &bytes)
    }

    /// Read back an artifact written (or copied) into this generation
    pub fn read<T: DeserializeOwned>(&self, kind: ArtifactKind) -> Result<T> {
        read_artifact(&self.dir, kind, None)
    }

    /// Checksum of a staged artifact's bytes
    pub fn checksum_of(&self, kind: ArtifactKind) -> Result<String> {
        let path = self.artifact_path(kind);
        let bytes = read_bytes(&path, kind)?;
        Ok(checksum(&bytes))
    }

    pub fn set_evaluation(&mut self, report: EvaluationReport) {
        self.evaluation = Some(report);
    }

    /// Verify, write the manifest, move into place and swap `CURRENT`
    pub fn commit(mut self) -> Result<GenerationManifest> {
        let mut checksums = BTreeMap::new();
        for kind in ArtifactKind::REQUIRED {
            checksums.insert(kind.file_name().to_string(), self.checksum_of(kind)?);
        }

        let manifest = GenerationManifest {
            id: self.id.clone(),
            created_at: chrono::Utc::now(),
            parent: self.parent.clone(),
            origin: self.origin,
            checksums,
            evaluation: self.evaluation.clone(),
        };
        self.write(ArtifactKind::Manifest, &manifest)?;

        // Must load cleanly before CURRENT points at it
        let final_dir = self.store.generation_dir(&self.id);
        fs::rename(&self.dir, &final_dir).map_err(|e| EngineError::io(&final_dir, e))?;
        self.committed = true;
        if let Err(e) = self.store.load_generation(&self.id) {
            let _ = fs::remove_dir_all(&final_dir);
            return Err(e);
        }

        self.store.write_current(&self.id)?;
        info!(
            generation = %self.id,
            parent = ?self.parent,
            origin = %self.origin,
            "Artifact generation committed"
        );
        self.store.prune(&self.id)?;
        Ok(manifest)
    }
}

impl Drop for StagedGeneration {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(generation = %self.id, error = %e, "Failed to discard staged generation");
            }
        }
    }
}

/// Exclusive writer lock, released on drop
#[derive(Debug)]
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(EngineError::WriterBusy(path)),
            Err(e) => return Err(EngineError::io(path, e)),
        };
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    file.write_all(bytes).map_err(|e| EngineError::io(path, e))?;
    file.sync_all().map_err(|e| EngineError::io(path, e))
}

fn read_bytes(path: &Path, kind: ArtifactKind) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(EngineError::ArtifactMissing {
            artifact: kind,
            path: path.to_path_buf(),
        }),
        Err(e) => Err(EngineError::io(path, e)),
    }
}

/// Read and deserialize one artifact, verifying its checksum when given
fn read_artifact<T: DeserializeOwned>(
    dir: &Path,
    kind: ArtifactKind,
    checksums: Option<&BTreeMap<String, String>>,
) -> Result<T> {
    let path = dir.join(kind.file_name());
    let bytes = read_bytes(&path, kind)?;
    if let Some(checksums) = checksums {
        let expected = checksums.get(kind.file_name()).ok_or_else(|| EngineError::Corrupt {
            artifact: kind,
            reason: "no checksum recorded in manifest".to_string(),
        })?;
        let actual = checksum(&bytes);
        if &actual != expected {
            return Err(EngineError::Corrupt {
                artifact: kind,
                reason: format!("checksum mismatch: expected {expected}, got {actual}"),
            });
        }
    }
    serde_json::from_slice(&bytes).map_err(|e| EngineError::Corrupt {
        artifact: kind,
        reason: e.to_string(),
    })
}
