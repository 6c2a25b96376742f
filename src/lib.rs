//! # Cardmart
//!
//! Backend for a trading-card marketplace. Staff list cards with a photo,
//! grading, rarity and price; anyone can browse the listings. Every uploaded
//! photo is turned into a small web-ready JPEG in the background.
//!
//! # Architecture: Write, Then Optimize
//!
//! A card write and its image derivative are two separate steps:
//!
//! ```text
//! 1. Validate   multipart form  →  ValidatedImage + fields   (size → extension → decode)
//! 2. Commit     card record     →  store + cards/<raw>        (synchronous, in the request)
//! 3. Optimize   committed card  →  cards/optimized/<stem>_optimized.jpg  (background)
//! ```
//!
//! The request returns after step 2. Step 3 runs on tokio's blocking pool,
//! triggered by a commit listener on the store, and can never fail the write:
//! a card without a derivative is served with its raw image until one exists.
//! The same step runs in bulk from the `optimize-existing` command.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`api`] | axum router, multipart parsing, JSON views, error → status mapping |
//! | [`app`] | Builds every component from one [`config::ServerConfig`] |
//! | [`service`] | Card lifecycle: create, update, status changes, delete, file cleanup |
//! | [`validation`] | Upload checks and field validators |
//! | [`store`] | Card records, JSON snapshot, commit listeners, conditional derivative write |
//! | [`pipeline`] | Derivative generation, batch pass, post-commit listener |
//! | [`imaging`] | Pure-Rust decode, flatten, resize and JPEG encode behind a backend trait |
//! | [`media`] | Stored-name addressing and collision-free file writes |
//! | [`naming`] | Upload name cleanup and derivative naming |
//! | [`model`] | `Card` and its enumerated fields |
//! | [`autocomplete`] | Card-name index for the name endpoints |
//! | [`rate_limit`] | Fixed-window limiter for the bulk name list |
//! | [`auth`] | Bearer-token staff check |
//! | [`config`] | `config.toml` loading and validation |
//!
//! # Design Decisions
//!
//! ## Orientation Is Ignored
//!
//! Derivatives use pixels exactly as stored. The EXIF orientation tag is
//! neither applied nor carried over: the JPEG encoder writes no EXIF segment,
//! so a rotated phone photo comes out in its stored orientation, and it comes
//! out the same way every time.
//!
//! ## One Derivative Per Card
//!
//! Attaching a derivative is a conditional write under the store lock. Two
//! concurrent runs for the same card may both encode, but only one attaches;
//! the other deletes its own file. Re-running the pipeline on an optimized
//! card does nothing.

pub mod api;
pub mod app;
pub mod auth;
pub mod autocomplete;
pub mod config;
pub mod imaging;
pub mod media;
pub mod model;
pub mod naming;
pub mod pipeline;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_helpers;
