//! Notion page source: wire types and the HTTP client.
//!
//! The importer talks to Notion through the [`PageSource`] trait so the rest
//! of the pipeline never depends on the concrete HTTP client; tests drive it
//! with the in-memory source from [`crate::testing`].

pub mod client;
pub mod types;

pub use client::{NotionClient, PageSource, DEFAULT_PAGE_SIZE};
pub use types::{PageBatch, PropertyDescriptor, PropertyKind, RemoteRow};
