//! Card lifecycle operations.
//!
//! The service owns the order of side effects for every write: validate
//! everything first, store the upload, commit the record, then clean up files
//! the record no longer points at. Authorization happens before any of this,
//! in the HTTP layer.

use crate::auth::AuthorizationError;
use crate::imaging::ImageBackend;
use crate::media::{MediaError, MediaStore};
use crate::model::{Card, CardFilter, CardId, CardPatch, NewCard, Rarity, SaleStatus};
use crate::rate_limit::RateLimitExceeded;
use crate::store::{CardStore, StoreError};
use crate::validation::{
    ValidatedImage, ValidationError, parse_condition, parse_price, parse_rarity,
    parse_sale_status, validate_name, validate_price, validate_serial_number, validate_upload,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
    #[error("Card {0} not found")]
    NotFound(CardId),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Store error: {0}")]
    Store(StoreError),
    #[error("Media error: {0}")]
    Media(#[from] MediaError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

/// A file part of a card form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Raw card form fields, as submitted.
#[derive(Debug, Clone, Default)]
pub struct CardForm {
    pub name: Option<String>,
    pub serial_number: Option<String>,
    pub condition: Option<String>,
    pub rarity: Option<String>,
    pub price: Option<String>,
    pub sale_status: Option<String>,
    pub image: Option<Upload>,
}

pub struct CardService {
    store: Arc<CardStore>,
    media: MediaStore,
    backend: Arc<dyn ImageBackend>,
    max_upload_bytes: u64,
}

impl CardService {
    pub fn new(
        store: Arc<CardStore>,
        media: MediaStore,
        backend: Arc<dyn ImageBackend>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            media,
            backend,
            max_upload_bytes,
        }
    }

    /// Largest accepted image upload, in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub fn list(&self, filter: &CardFilter) -> Vec<Card> {
        self.store.list(filter)
    }

    pub fn get(&self, id: CardId) -> Result<Card, ServiceError> {
        self.store.get(id).ok_or(ServiceError::NotFound(id))
    }

    /// Create a listing. New listings are always available for sale,
    /// whatever status the form carries.
    pub fn create(&self, form: CardForm) -> Result<Card, ServiceError> {
        let name = validate_name(form.name.as_deref().unwrap_or_default())?;
        let serial_number = validate_serial_number(form.serial_number.as_deref().unwrap_or_default())?;
        let condition = parse_condition(
            form.condition
                .as_deref()
                .ok_or(ValidationError::MissingField("condition"))?,
        )?;
        let rarity = match form.rarity.as_deref().map(str::trim) {
            None | Some("") => Rarity::default(),
            Some(raw) => parse_rarity(raw)?,
        };
        let price = validate_price(form.price.as_deref().map(parse_price).transpose()?)?;
        let upload = form.image.ok_or(ValidationError::MissingField("image"))?;
        let image = self.validate_image(upload)?;

        let stored = self.media.save_raw(&image.filename, image.bytes())?;
        let result = self.store.insert(NewCard {
            name,
            serial_number,
            image: stored.clone(),
            condition,
            rarity,
            price,
            sale_status: SaleStatus::Available,
        });
        match result {
            Ok(card) => {
                info!(card_id = card.id, image = %stored, "card created");
                Ok(card)
            }
            Err(e) => {
                self.remove_file(&stored);
                Err(e.into())
            }
        }
    }

    /// Apply the fields present in `form`.
    ///
    /// A new image replaces the raw file; the old raw file and its derivative
    /// are removed once the record points at the new one.
    pub fn update(&self, id: CardId, form: CardForm) -> Result<Card, ServiceError> {
        let current = self.get(id)?;

        let mut patch = CardPatch {
            name: form.name.as_deref().map(validate_name).transpose()?,
            serial_number: form
                .serial_number
                .as_deref()
                .map(validate_serial_number)
                .transpose()?,
            condition: form.condition.as_deref().map(parse_condition).transpose()?,
            rarity: form.rarity.as_deref().map(parse_rarity).transpose()?,
            price: match form.price.as_deref() {
                Some(raw) => Some(validate_price(Some(parse_price(raw)?))?),
                None => None,
            },
            sale_status: form
                .sale_status
                .as_deref()
                .map(parse_sale_status)
                .transpose()?,
            image: None,
        };
        let image = form.image.map(|u| self.validate_image(u)).transpose()?;

        let stored = match image {
            Some(image) => Some(self.media.save_raw(&image.filename, image.bytes())?),
            None => None,
        };
        patch.image = stored.clone();

        let updated = match self.store.update(id, patch) {
            Ok(card) => card,
            Err(e) => {
                if let Some(stored) = &stored {
                    self.remove_file(stored);
                }
                return Err(e.into());
            }
        };

        if stored.is_some() {
            self.remove_file(&current.image);
            if let Some(old) = &current.image_optimized {
                self.remove_file(old);
            }
            info!(card_id = id, image = %updated.image, "card image replaced");
        }
        Ok(updated)
    }

    pub fn set_status(&self, id: CardId, status: SaleStatus) -> Result<Card, ServiceError> {
        let card = self.store.update(id, CardPatch::status(status))?;
        info!(card_id = id, status = status.code(), "sale status changed");
        Ok(card)
    }

    /// Delete a listing and its image files.
    pub fn delete(&self, id: CardId) -> Result<(), ServiceError> {
        let card = self.store.delete(id)?;
        self.remove_file(&card.image);
        if let Some(optimized) = &card.image_optimized {
            self.remove_file(optimized);
        }
        info!(card_id = id, "card deleted");
        Ok(())
    }

    fn validate_image(&self, upload: Upload) -> Result<ValidatedImage, ValidationError> {
        validate_upload(
            self.backend.as_ref(),
            &upload.filename,
            upload.bytes,
            self.max_upload_bytes,
        )
    }

    fn remove_file(&self, stored_name: &str) {
        if stored_name.is_empty() {
            return;
        }
        if let Err(e) = self.media.delete(stored_name) {
            warn!(stored = %stored_name, error = %e, "could not remove media file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use crate::model::Condition;
    use crate::test_helpers::*;

    fn service() -> (tempfile::TempDir, Arc<CardStore>, CardService) {
        let (tmp, store, media) = setup_store();
        let service = CardService::new(
            Arc::clone(&store),
            media,
            Arc::new(RustBackend::new()),
            20 * 1024 * 1024,
        );
        (tmp, store, service)
    }

    fn form(name: &str) -> CardForm {
        CardForm {
            name: Some(name.into()),
            condition: Some("A".into()),
            rarity: Some("SR".into()),
            price: Some("1500".into()),
            image: Some(Upload {
                filename: "card.jpg".into(),
                bytes: jpeg_bytes(32, 32),
            }),
            ..CardForm::default()
        }
    }

    #[test]
    fn create_stores_image_and_forces_available() {
        let (_tmp, _store, service) = service();
        let card = service
            .create(CardForm {
                sale_status: Some("sold".into()),
                ..form("Jinzo")
            })
            .unwrap();

        assert_eq!(card.sale_status, SaleStatus::Available);
        assert_eq!(card.image, "cards/card.jpg");
        assert_eq!(card.rarity, Rarity::SuperRare);
        assert_eq!(card.price, 1500);
        assert!(service.media().exists(&card.image));
    }

    #[test]
    fn create_defaults_rarity() {
        let (_tmp, _store, service) = service();
        let card = service
            .create(CardForm {
                rarity: None,
                ..form("Jinzo")
            })
            .unwrap();
        assert_eq!(card.rarity, Rarity::Normal);
    }

    #[test]
    fn create_validates_before_storing() {
        let (_tmp, store, service) = service();
        let err = service
            .create(CardForm {
                price: Some("-5".into()),
                ..form("Jinzo")
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidPrice(_))));
        assert!(store.is_empty());
        assert!(!service.media().root().join("cards").exists());
    }

    #[test]
    fn create_requires_image_and_condition() {
        let (_tmp, _store, service) = service();
        let err = service
            .create(CardForm {
                image: None,
                ..form("Jinzo")
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::MissingField("image"))
        ));

        let err = service
            .create(CardForm {
                condition: None,
                ..form("Jinzo")
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::MissingField("condition"))
        ));
    }

    #[test]
    fn create_rejects_corrupt_upload() {
        let (_tmp, store, service) = service();
        let err = service
            .create(CardForm {
                image: Some(Upload {
                    filename: "card.png".into(),
                    bytes: b"nope".to_vec(),
                }),
                ..form("Jinzo")
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::CorruptImage(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn update_applies_present_fields_only() {
        let (_tmp, _store, service) = service();
        let card = service.create(form("Jinzo")).unwrap();
        let updated = service
            .update(
                card.id,
                CardForm {
                    condition: Some("C".into()),
                    ..CardForm::default()
                },
            )
            .unwrap();
        assert_eq!(updated.condition, Condition::C);
        assert_eq!(updated.name, "Jinzo");
        assert_eq!(updated.image, card.image);
    }

    #[test]
    fn update_replacing_image_removes_old_files() {
        let (_tmp, store, service) = service();
        let card = service.create(form("Jinzo")).unwrap();
        let optimized = service
            .media()
            .save_optimized("card_optimized.jpg", b"jpeg")
            .unwrap();
        store.set_optimized_if_absent(card.id, &card.image, &optimized).unwrap();

        let updated = service
            .update(
                card.id,
                CardForm {
                    image: Some(Upload {
                        filename: "new.png".into(),
                        bytes: png_rgba_bytes(16, 16, 255),
                    }),
                    ..CardForm::default()
                },
            )
            .unwrap();

        assert_eq!(updated.image, "cards/new.png");
        assert!(updated.image_optimized.is_none());
        assert!(!service.media().exists(&card.image));
        assert!(!service.media().exists(&optimized));
        assert!(service.media().exists(&updated.image));
    }

    #[test]
    fn update_missing_card_is_not_found() {
        let (_tmp, _store, service) = service();
        assert!(matches!(
            service.update(7, CardForm::default()),
            Err(ServiceError::NotFound(7))
        ));
    }

    #[test]
    fn status_transitions_are_all_reachable() {
        let (_tmp, _store, service) = service();
        let card = service.create(form("Jinzo")).unwrap();
        for status in [
            SaleStatus::Sold,
            SaleStatus::Available,
            SaleStatus::Reserved,
            SaleStatus::Sold,
            SaleStatus::Reserved,
            SaleStatus::Available,
        ] {
            assert_eq!(service.set_status(card.id, status).unwrap().sale_status, status);
        }
    }

    #[test]
    fn delete_removes_files() {
        let (_tmp, store, service) = service();
        let card = service.create(form("Jinzo")).unwrap();
        let optimized = service
            .media()
            .save_optimized("card_optimized.jpg", b"jpeg")
            .unwrap();
        store.set_optimized_if_absent(card.id, &card.image, &optimized).unwrap();

        service.delete(card.id).unwrap();
        assert!(!service.media().exists(&card.image));
        assert!(!service.media().exists(&optimized));
        assert!(matches!(service.get(card.id), Err(ServiceError::NotFound(_))));
        assert!(matches!(service.delete(card.id), Err(ServiceError::NotFound(_))));
    }
}
