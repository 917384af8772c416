//! Incremental indexing pass: scan, detect changes, embed, upsert, prune, save.
//!
//! Change detection is by modification time only. A file is (re)embedded when
//! it has no entry or its on-disk mtime differs from the stored one. Files
//! that fail to read or embed are skipped and retried on the next pass; their
//! previous entry, if any, is left as it was.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::config::Config;
use crate::lock::StopSignal;
use crate::scanner::FileScanner;
use crate::semantic::embeddings::Embedder;
use crate::semantic::extract::{prepare_text, TextExtractor};
use crate::semantic::index::{IndexEntry, Modality};
use crate::semantic::storage::{IndexStore, StoreError};

/// Which stored entries a pass may delete when they were not rediscovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneScope {
    /// Every entry of a scanned modality
    All,
    /// Only entries located under one of the pass's roots
    UnderRoots,
}

#[derive(Debug, Clone)]
pub struct PassPlan {
    pub text_roots: Vec<PathBuf>,
    pub image_roots: Vec<PathBuf>,
    pub prune: PruneScope,
}

impl PassPlan {
    /// The background pass over the configured folders.
    pub fn continuous(config: &Config) -> Self {
        Self {
            text_roots: config.text_roots(),
            image_roots: config.image_roots(),
            prune: PruneScope::All,
        }
    }

    /// A pass over caller-supplied folders, looking for both documents and
    /// images in each of them.
    pub fn on_demand(roots: Vec<PathBuf>) -> Self {
        Self {
            text_roots: roots.clone(),
            image_roots: roots,
            prune: PruneScope::UnderRoots,
        }
    }

    fn roots(&self, modality: Modality) -> &[PathBuf] {
        match modality {
            Modality::Text => &self.text_roots,
            Modality::Image => &self.image_roots,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ModalityReport {
    pub discovered: usize,
    pub embedded: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub pruned: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub text: ModalityReport,
    pub images: ModalityReport,
    /// The pass ended early because stop was requested
    pub stopped: bool,
}

impl PassReport {
    pub fn modality(&self, modality: Modality) -> &ModalityReport {
        match modality {
            Modality::Text => &self.text,
            Modality::Image => &self.images,
        }
    }

    fn modality_mut(&mut self, modality: Modality) -> &mut ModalityReport {
        match modality {
            Modality::Text => &mut self.text,
            Modality::Image => &mut self.images,
        }
    }
}

enum FileOutcome {
    Embedded,
    Unchanged,
    Failed,
}

/// Modification time in seconds since the Unix epoch, negative before it.
pub fn file_mtime(path: &Path) -> std::io::Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    })
}

pub struct IncrementalIndexer {
    store: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    text_extensions: Vec<String>,
    image_extensions: Vec<String>,
}

impl IncrementalIndexer {
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
        text_extensions: Vec<String>,
        image_extensions: Vec<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            text_extensions,
            image_extensions,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<IndexStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self::new(
            store,
            embedder,
            extractor,
            config.text_extensions.clone(),
            config.image_extensions.clone(),
        )
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    fn extensions(&self, modality: Modality) -> &[String] {
        match modality {
            Modality::Text => &self.text_extensions,
            Modality::Image => &self.image_extensions,
        }
    }

    /// Run one full pass. The index is saved at the end, also when the pass
    /// was stopped part way. Only a failed save is reported as an error.
    pub fn run_pass(&self, plan: &PassPlan, stop: &StopSignal) -> Result<PassReport, StoreError> {
        log::info!(
            "indexing pass started: {} text roots, {} image roots",
            plan.text_roots.len(),
            plan.image_roots.len()
        );

        let mut report = PassReport::default();

        for modality in Modality::ALL {
            if stop.is_stopped() {
                report.stopped = true;
                break;
            }

            let roots = plan.roots(modality);
            if roots.is_empty() {
                log::debug!("no {modality} roots configured, skipping");
                continue;
            }

            let completed = self.index_modality(
                modality,
                roots,
                plan.prune,
                stop,
                report.modality_mut(modality),
            );
            if !completed {
                report.stopped = true;
                break;
            }
        }

        self.store.save()?;

        log::info!(
            "indexing pass {}: text {:?}, images {:?}",
            if report.stopped { "stopped" } else { "finished" },
            report.text,
            report.images
        );

        Ok(report)
    }

    /// Returns false if stop was requested before every file was visited.
    fn index_modality(
        &self,
        modality: Modality,
        roots: &[PathBuf],
        prune: PruneScope,
        stop: &StopSignal,
        report: &mut ModalityReport,
    ) -> bool {
        let scanner = FileScanner::new(roots.to_vec(), self.extensions(modality));
        let mut discovered = HashSet::new();

        for path in scanner.scan_until(stop) {
            if stop.is_stopped() {
                break;
            }

            let key = path.to_string_lossy().into_owned();
            report.discovered += 1;

            match self.process_file(modality, &path, &key) {
                FileOutcome::Embedded => report.embedded += 1,
                FileOutcome::Unchanged => report.unchanged += 1,
                FileOutcome::Failed => report.failed += 1,
            }

            discovered.insert(key);
        }

        if stop.is_stopped() {
            // pruning against a partial discovery set would drop live entries
            log::info!("stop requested during {modality} scan, skipping prune");
            return false;
        }

        report.pruned = self.prune(modality, scanner.roots(), prune, &discovered);
        true
    }

    fn process_file(&self, modality: Modality, path: &Path, key: &str) -> FileOutcome {
        let mtime = match file_mtime(path) {
            Ok(mtime) => mtime,
            Err(e) => {
                log::warn!("{}: cannot read mtime: {e}", path.display());
                return FileOutcome::Failed;
            }
        };

        if let Some(entry) = self.store.get(modality, key) {
            if entry.mtime == mtime {
                return FileOutcome::Unchanged;
            }
        }

        let embedding = match modality {
            Modality::Text => match self.extractor.extract(path) {
                Ok(raw) => self.embedder.embed_text(&prepare_text(&raw)),
                Err(e) => {
                    log::warn!("{}: {e}", path.display());
                    return FileOutcome::Failed;
                }
            },
            Modality::Image => match std::fs::read(path) {
                Ok(bytes) => self.embedder.embed_image(&bytes),
                Err(e) => {
                    log::warn!("{}: cannot read file: {e}", path.display());
                    return FileOutcome::Failed;
                }
            },
        };

        match embedding {
            Ok(embedding) => {
                log::debug!("embedded {key}");
                self.store.upsert(modality, key, IndexEntry::new(embedding, mtime));
                FileOutcome::Embedded
            }
            Err(e) => {
                log::warn!("{}: {e}", path.display());
                FileOutcome::Failed
            }
        }
    }

    fn prune(
        &self,
        modality: Modality,
        roots: &[PathBuf],
        scope: PruneScope,
        discovered: &HashSet<String>,
    ) -> usize {
        let stale: Vec<String> = self
            .store
            .paths(modality)
            .into_iter()
            .filter(|p| !discovered.contains(p))
            .filter(|p| match scope {
                PruneScope::All => true,
                PruneScope::UnderRoots => roots.iter().any(|root| Path::new(p).starts_with(root)),
            })
            .collect();

        for path in &stale {
            log::debug!("pruning {path}");
            self.store.remove(modality, path);
        }

        stale.len()
    }
}
