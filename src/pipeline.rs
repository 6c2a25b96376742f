//! Post-save image optimization.
//!
//! Every card with a raw image gets one derivative: the raw image decoded,
//! flattened onto white, capped at the configured width and re-encoded as a
//! metadata-free JPEG, stored under `cards/optimized/{stem}_optimized.jpg`.
//!
//! ```text
//! card saved ──▶ OptimizeOnCommit ──▶ spawn_blocking(Pipeline::run) ──▶ set_optimized_if_absent
//! ```
//!
//! The pipeline never fails a card write. [`Pipeline::run`] catches every
//! [`PipelineError`], logs it with the card id and name, and returns; the raw
//! image is only ever read.
//!
//! Attaching the derivative is a conditional store write. When two runs race
//! on the same card, the one that attaches second deletes the file it wrote
//! and reports [`Skip::AlreadyOptimized`].
//!
//! [`Pipeline::optimize_pending`] is the batch form used by the
//! `optimize-existing` command: it walks every card lacking a derivative on
//! the rayon pool.

use crate::imaging::{BackendError, ImageBackend, OptimizeConfig, create_optimized};
use crate::media::{MediaError, MediaStore};
use crate::model::{Card, CardId};
use crate::naming::optimized_filename;
use crate::store::{CardStore, CommitEvent, CommitListener, StoreError};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("raw image {0} is missing")]
    SourceMissing(String),
    #[error("decode failed: {0}")]
    DecodeFailure(String),
    #[error("encode failed: {0}")]
    EncodeFailure(String),
    #[error("storage failed: {0}")]
    StorageFailure(String),
}

impl From<MediaError> for PipelineError {
    fn from(e: MediaError) -> Self {
        PipelineError::StorageFailure(e.to_string())
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::StorageFailure(e.to_string())
    }
}

/// Why a run did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    CardMissing,
    NoImage,
    AlreadyOptimized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Optimized {
        stored_name: String,
        width: u32,
        height: u32,
    },
    Skipped(Skip),
}

/// Counts from a batch pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub optimized: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl BatchReport {
    pub fn total(&self) -> u32 {
        self.optimized + self.skipped + self.failed
    }

    fn merge(mut self, other: BatchReport) -> Self {
        self.optimized += other.optimized;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self
    }

    fn record(result: &Result<PipelineOutcome, PipelineError>) -> Self {
        let mut report = Self::default();
        match result {
            Ok(PipelineOutcome::Optimized { .. }) => report.optimized += 1,
            Ok(PipelineOutcome::Skipped(_)) => report.skipped += 1,
            Err(_) => report.failed += 1,
        }
        report
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped > 0 || self.failed > 0 {
            write!(
                f,
                "{} optimized, {} skipped, {} failed ({} total)",
                self.optimized,
                self.skipped,
                self.failed,
                self.total()
            )
        } else {
            write!(f, "{} optimized", self.optimized)
        }
    }
}

/// Generates and attaches card derivatives.
pub struct Pipeline {
    store: Arc<CardStore>,
    media: MediaStore,
    backend: Arc<dyn ImageBackend>,
    config: OptimizeConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<CardStore>,
        media: MediaStore,
        backend: Arc<dyn ImageBackend>,
        config: OptimizeConfig,
    ) -> Self {
        Self {
            store,
            media,
            backend,
            config,
        }
    }

    /// Optimize one card, logging and swallowing any failure.
    pub fn run(&self, card_id: CardId) {
        match self.optimize(card_id) {
            Ok(_) => {}
            Err(PipelineError::SourceMissing(image)) => {
                warn!(card_id, image = %image, "raw image missing; derivative not generated");
            }
            Err(e) => {
                let name = self.store.get(card_id).map(|c| c.name).unwrap_or_default();
                error!(card_id, card_name = %name, error = %e, "image optimization failed");
            }
        }
    }

    /// Generate and attach the derivative for a card that has none.
    #[instrument(skip(self))]
    pub fn optimize(&self, card_id: CardId) -> Result<PipelineOutcome, PipelineError> {
        let Some(card) = self.store.get(card_id) else {
            return Ok(PipelineOutcome::Skipped(Skip::CardMissing));
        };
        if card.image.is_empty() {
            return Ok(PipelineOutcome::Skipped(Skip::NoImage));
        }
        if card.image_optimized.is_some() {
            return Ok(PipelineOutcome::Skipped(Skip::AlreadyOptimized));
        }

        let (stored_name, width, height) = self.generate(&card)?;
        let attached = match self.store.set_optimized_if_absent(card_id, &card.image, &stored_name) {
            Ok(attached) => attached,
            Err(StoreError::NotFound(_)) => {
                self.discard(&stored_name);
                return Ok(PipelineOutcome::Skipped(Skip::CardMissing));
            }
            Err(e) => {
                self.discard(&stored_name);
                return Err(e.into());
            }
        };
        if !attached {
            debug!(card_id, "card changed or was optimized by a concurrent run");
            self.discard(&stored_name);
            return Ok(PipelineOutcome::Skipped(Skip::AlreadyOptimized));
        }

        info!(card_id, stored = %stored_name, width, height, "optimized card image");
        Ok(PipelineOutcome::Optimized {
            stored_name,
            width,
            height,
        })
    }

    /// Generate a fresh derivative, replacing any existing one.
    ///
    /// The previous derivative file is removed only after the new one is
    /// attached.
    #[instrument(skip(self))]
    pub fn regenerate(&self, card_id: CardId) -> Result<PipelineOutcome, PipelineError> {
        let Some(card) = self.store.get(card_id) else {
            return Ok(PipelineOutcome::Skipped(Skip::CardMissing));
        };
        if card.image.is_empty() {
            return Ok(PipelineOutcome::Skipped(Skip::NoImage));
        }

        let (stored_name, width, height) = self.generate(&card)?;
        let replaced = match self.store.replace_optimized(card_id, &stored_name) {
            Ok(replaced) => replaced,
            Err(e) => {
                self.discard(&stored_name);
                return Err(e.into());
            }
        };
        if let Some(old) = replaced.filter(|old| *old != stored_name) {
            self.discard(&old);
        }

        info!(card_id, stored = %stored_name, width, height, "regenerated card image");
        Ok(PipelineOutcome::Optimized {
            stored_name,
            width,
            height,
        })
    }

    /// Optimize every card lacking a derivative, in parallel.
    ///
    /// With `force`, every card with a raw image is regenerated instead.
    pub fn optimize_pending(&self, force: bool) -> BatchReport {
        let ids: Vec<CardId> = if force {
            self.store
                .list(&Default::default())
                .into_iter()
                .filter(|c| !c.image.is_empty())
                .map(|c| c.id)
                .collect()
        } else {
            self.store
                .pending_optimization()
                .into_iter()
                .map(|c| c.id)
                .collect()
        };

        ids.par_iter()
            .map(|&id| {
                let result = if force {
                    self.regenerate(id)
                } else {
                    self.optimize(id)
                };
                if let Err(e) = &result {
                    error!(card_id = id, error = %e, "batch optimization failed");
                }
                BatchReport::record(&result)
            })
            .reduce(BatchReport::default, BatchReport::merge)
    }

    /// Encode the derivative and write it to media storage.
    fn generate(&self, card: &Card) -> Result<(String, u32, u32), PipelineError> {
        let source = self
            .media
            .path(&card.image)
            .map_err(|_| PipelineError::SourceMissing(card.image.clone()))?;
        if !source.is_file() {
            return Err(PipelineError::SourceMissing(card.image.clone()));
        }

        let optimized =
            create_optimized(self.backend.as_ref(), &source, &self.config).map_err(|e| match e {
                BackendError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    PipelineError::SourceMissing(card.image.clone())
                }
                BackendError::Io(io) => PipelineError::StorageFailure(io.to_string()),
                BackendError::Decode(msg) => PipelineError::DecodeFailure(msg),
                BackendError::Encode(msg) => PipelineError::EncodeFailure(msg),
            })?;

        let stored_name = self
            .media
            .save_optimized(&optimized_filename(&card.image), &optimized.bytes)?;
        Ok((stored_name, optimized.width, optimized.height))
    }

    fn discard(&self, stored_name: &str) {
        if let Err(e) = self.media.delete(stored_name) {
            warn!(stored = %stored_name, error = %e, "could not remove unused derivative");
        }
    }
}

/// Runs the pipeline after every committed card write that leaves a card
/// without a derivative.
///
/// Work goes to tokio's blocking pool under a timeout; a run that exceeds it
/// is logged and abandoned.
pub struct OptimizeOnCommit {
    pipeline: Arc<Pipeline>,
    runtime: Handle,
    timeout: Duration,
}

impl OptimizeOnCommit {
    pub fn new(pipeline: Arc<Pipeline>, runtime: Handle, timeout: Duration) -> Self {
        Self {
            pipeline,
            runtime,
            timeout,
        }
    }
}

impl CommitListener for OptimizeOnCommit {
    fn on_commit(&self, event: &CommitEvent) {
        let card = &event.card;
        if card.image.is_empty() || card.image_optimized.is_some() {
            return;
        }
        let card_id = card.id;
        let pipeline = Arc::clone(&self.pipeline);
        let limit = self.timeout;
        self.runtime.spawn(async move {
            let work = tokio::task::spawn_blocking(move || pipeline.run(card_id));
            match tokio::time::timeout(limit, work).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(card_id, error = %e, "optimization task panicked"),
                Err(_) => warn!(card_id, timeout_secs = limit.as_secs(), "optimization timed out"),
            }
        });
    }
}
