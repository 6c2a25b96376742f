//! The card store.
//!
//! Cards live in memory behind a single lock and, when a snapshot path is
//! configured, are written back to a JSON file after every successful write.
//! A write whose snapshot fails is rolled back in memory, so the in-memory
//! state never runs ahead of what is on disk.
//!
//! ## Commit listeners
//!
//! Work that must follow a durable write (image optimization) registers a
//! [`CommitListener`]. Listeners are called after the lock is released, with
//! a copy of the committed card; they run outside the write and cannot fail
//! it.
//!
//! ## Derivative writes
//!
//! [`CardStore::set_optimized_if_absent`] is a conditional write: it attaches
//! a derivative only if the card has none and still points at the raw image
//! the derivative was made from, atomically under the store lock.
//! It does not notify listeners.

use crate::model::{Card, CardFilter, CardId, CardPatch, NewCard};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Card {0} not found")]
    NotFound(CardId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Created,
    Updated,
}

/// A committed write, as seen by listeners.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub kind: CommitKind,
    /// The card as it was committed.
    pub card: Card,
}

/// Reaction to a committed card write.
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, event: &CommitEvent);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: CardId,
    cards: Vec<Card>,
}

#[derive(Debug)]
struct Inner {
    cards: BTreeMap<CardId, Card>,
    next_id: CardId,
}

pub struct CardStore {
    inner: Mutex<Inner>,
    listeners: RwLock<Vec<Arc<dyn CommitListener>>>,
    snapshot: Option<PathBuf>,
}

impl CardStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cards: BTreeMap::new(),
                next_id: 1,
            }),
            listeners: RwLock::new(Vec::new()),
            snapshot: None,
        }
    }

    /// A store backed by a JSON snapshot, loaded now if the file exists.
    pub fn open(snapshot: &Path) -> Result<Self, StoreError> {
        let store = Self {
            snapshot: Some(snapshot.to_path_buf()),
            ..Self::in_memory()
        };
        if snapshot.exists() {
            let loaded: Snapshot = serde_json::from_str(&fs::read_to_string(snapshot)?)?;
            let mut inner = store.inner.lock();
            let max_id = loaded.cards.iter().map(|c| c.id).max().unwrap_or(0);
            inner.next_id = loaded.next_id.max(max_id + 1);
            inner.cards = loaded.cards.into_iter().map(|c| (c.id, c)).collect();
            info!(cards = inner.cards.len(), path = %snapshot.display(), "loaded card store");
        }
        Ok(store)
    }

    /// Register a listener for committed creates and updates.
    pub fn subscribe(&self, listener: Arc<dyn CommitListener>) {
        self.listeners.write().push(listener);
    }

    pub fn get(&self, id: CardId) -> Option<Card> {
        self.inner.lock().cards.get(&id).cloned()
    }

    /// Cards matching `filter`, newest first.
    pub fn list(&self, filter: &CardFilter) -> Vec<Card> {
        let inner = self.inner.lock();
        let mut cards: Vec<Card> = inner
            .cards
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        cards
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cards with a raw image and no derivative yet.
    pub fn pending_optimization(&self) -> Vec<Card> {
        self.inner
            .lock()
            .cards
            .values()
            .filter(|c| !c.image.is_empty() && c.image_optimized.is_none())
            .cloned()
            .collect()
    }

    pub fn insert(&self, new: NewCard) -> Result<Card, StoreError> {
        let card = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            let now = Utc::now();
            let card = Card {
                id,
                name: new.name,
                serial_number: new.serial_number,
                image: new.image,
                image_optimized: None,
                condition: new.condition,
                rarity: new.rarity,
                price: new.price,
                sale_status: new.sale_status,
                created_at: now,
                updated_at: now,
            };
            inner.cards.insert(id, card.clone());
            self.persist_or_rollback(&mut inner, id, None)?;
            card
        };
        debug!(card_id = card.id, "card created");
        self.notify(CommitKind::Created, &card);
        Ok(card)
    }

    /// Apply a partial update.
    ///
    /// Replacing the raw image clears the derivative reference; the caller is
    /// responsible for removing the old files.
    pub fn update(&self, id: CardId, patch: CardPatch) -> Result<Card, StoreError> {
        let card = {
            let mut inner = self.inner.lock();
            let previous = inner.cards.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
            let mut card = previous.clone();
            if let Some(name) = patch.name {
                card.name = name;
            }
            if let Some(serial_number) = patch.serial_number {
                card.serial_number = serial_number;
            }
            if let Some(image) = patch.image.filter(|image| *image != card.image) {
                card.image = image;
                card.image_optimized = None;
            }
            if let Some(condition) = patch.condition {
                card.condition = condition;
            }
            if let Some(rarity) = patch.rarity {
                card.rarity = rarity;
            }
            if let Some(price) = patch.price {
                card.price = price;
            }
            if let Some(status) = patch.sale_status {
                card.sale_status = status;
            }
            card.updated_at = Utc::now();
            inner.cards.insert(id, card.clone());
            self.persist_or_rollback(&mut inner, id, Some(previous))?;
            card
        };
        debug!(card_id = id, "card updated");
        self.notify(CommitKind::Updated, &card);
        Ok(card)
    }

    /// Remove a card and return it.
    pub fn delete(&self, id: CardId) -> Result<Card, StoreError> {
        let mut inner = self.inner.lock();
        let card = inner.cards.remove(&id).ok_or(StoreError::NotFound(id))?;
        if let Err(e) = self.persist(&inner) {
            inner.cards.insert(id, card);
            return Err(e);
        }
        debug!(card_id = id, "card deleted");
        Ok(card)
    }

    /// Attach a derivative generated from `source_image`, only if the card
    /// has none and still points at that raw image.
    ///
    /// Returns `Ok(false)` when the condition no longer holds.
    pub fn set_optimized_if_absent(
        &self,
        id: CardId,
        source_image: &str,
        stored_name: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let previous = inner.cards.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        if previous.image_optimized.is_some() || previous.image != source_image {
            return Ok(false);
        }
        let mut card = previous.clone();
        card.image_optimized = Some(stored_name.to_string());
        card.updated_at = Utc::now();
        inner.cards.insert(id, card);
        self.persist_or_rollback(&mut inner, id, Some(previous))?;
        Ok(true)
    }

    /// Attach a derivative unconditionally, returning the one it replaced.
    pub fn replace_optimized(
        &self,
        id: CardId,
        stored_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        let previous = inner.cards.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        let mut card = previous.clone();
        card.image_optimized = Some(stored_name.to_string());
        card.updated_at = Utc::now();
        inner.cards.insert(id, card);
        let replaced = previous.image_optimized.clone();
        self.persist_or_rollback(&mut inner, id, Some(previous))?;
        Ok(replaced)
    }

    fn notify(&self, kind: CommitKind, card: &Card) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let event = CommitEvent {
            kind,
            card: card.clone(),
        };
        for listener in listeners {
            listener.on_commit(&event);
        }
    }

    fn persist_or_rollback(
        &self,
        inner: &mut Inner,
        id: CardId,
        previous: Option<Card>,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.persist(inner) {
            match previous {
                Some(card) => inner.cards.insert(id, card),
                None => inner.cards.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let snapshot = Snapshot {
            next_id: inner.next_id,
            cards: inner.cards.values().cloned().collect(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
