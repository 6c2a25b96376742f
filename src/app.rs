//! Component wiring shared by the server and the maintenance commands.

use crate::api::{AppState, create_router};
use crate::auth::Authorizer;
use crate::autocomplete::CardNameIndex;
use crate::config::ServerConfig;
use crate::imaging::{ImageBackend, OptimizeConfig, RustBackend};
use crate::media::MediaStore;
use crate::pipeline::{OptimizeOnCommit, Pipeline};
use crate::rate_limit::FixedWindowLimiter;
use crate::service::CardService;
use crate::store::{CardStore, StoreError};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::info;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No [autocomplete].names_file configured")]
    NoNamesFile,
}

/// Every long-lived component, built from one config.
pub struct App {
    pub config: ServerConfig,
    pub store: Arc<CardStore>,
    pub media: MediaStore,
    pub backend: Arc<dyn ImageBackend>,
    pub names: Arc<CardNameIndex>,
}

impl App {
    /// Open the card store and load the names file, if configured.
    pub fn open(config: ServerConfig) -> Result<Self, AppError> {
        let store = match &config.store.snapshot {
            Some(path) => CardStore::open(path)?,
            None => CardStore::in_memory(),
        };
        let names = CardNameIndex::new();
        if let Some(path) = &config.autocomplete.names_file {
            if path.exists() {
                names.load_file(path)?;
            }
        }
        info!(cards = store.len(), names = names.len(), "application opened");
        Ok(Self {
            media: MediaStore::new(&config.media.root),
            store: Arc::new(store),
            backend: Arc::new(RustBackend::new()),
            names: Arc::new(names),
            config,
        })
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::clone(&self.store),
            self.media.clone(),
            Arc::clone(&self.backend),
            OptimizeConfig::from_images_config(&self.config.images),
        ))
    }

    /// Optimize cards in the background after every committed write.
    pub fn optimize_on_commit(&self, runtime: Handle) {
        self.store.subscribe(Arc::new(OptimizeOnCommit::new(
            self.pipeline(),
            runtime,
            Duration::from_secs(self.config.pipeline.timeout_secs),
        )));
    }

    pub fn state(&self) -> AppState {
        AppState {
            service: Arc::new(CardService::new(
                Arc::clone(&self.store),
                self.media.clone(),
                Arc::clone(&self.backend),
                self.config.images.max_upload_bytes,
            )),
            names: Arc::clone(&self.names),
            limiter: Arc::new(FixedWindowLimiter::for_card_names(
                self.config.rate_limit.capacity,
                Duration::from_secs(self.config.rate_limit.window_secs),
            )),
            auth: Arc::new(Authorizer::from_config(&self.config.auth)),
            public_base_url: self.config.server.public_base_url.clone(),
        }
    }

    /// The full router. Request bodies may exceed the upload cap so that an
    /// oversized image reaches validation and gets a field-level error.
    pub fn router(&self) -> Router {
        let upload_cap = usize::try_from(self.config.images.max_upload_bytes).unwrap_or(usize::MAX);
        create_router(self.state(), upload_cap.saturating_mul(2))
    }

    /// Import names from `source` and write the merged set to the names file.
    pub fn import_names(&self, source: &Path) -> Result<usize, AppError> {
        let target = self
            .config
            .autocomplete
            .names_file
            .as_deref()
            .ok_or(AppError::NoNamesFile)?;
        let added = self.names.load_file(source)?;
        self.names.save_file(target)?;
        Ok(added)
    }
}
