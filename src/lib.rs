//! Validate, localize and publish versioned game-design data.
//!
//! A publish reads a snapshot of design records and translation catalogs
//! from a [`records::RecordStore`], validates and builds the records once,
//! then produces one localized, client-shaped artifact per bundle, language
//! and output format. Artifacts are registered under a new version in the
//! [`registry::VersionRegistry`] and served by access token.

pub mod analytics;
pub mod artifact;
pub mod codec;
pub mod config;
pub mod domain;
pub mod dto;
pub mod error;
pub mod i18n;
pub mod pipeline;
pub mod records;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod storage;
