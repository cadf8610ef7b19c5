//! Print-faithful PDF export of laid-out resume documents.
//!
//! The [`export::Exporter`] clones the template root of a [`dom::Document`] into an
//! off-screen container, hardens the copy for rasterization, paginates it without
//! splitting atomic blocks, rasterizes every page and encodes the result as an A4
//! PDF delivered through an [`sink::ArtifactSink`].

pub mod config;
pub mod dom;
pub mod encode;
pub mod error;
pub mod export;
pub mod filename;
pub mod fonts;
pub mod footer;
pub mod optimize;
pub mod paginate;
pub mod raster;
pub mod sample;
pub mod selector;
pub mod sink;
pub mod style;

#[cfg(feature = "bookmarks")]
pub mod bookmarks;

pub use config::ExportConfig;
pub use dom::Document;
pub use error::ExportError;
pub use export::{DocumentMetadata, ExportRequest, ExportResult, Exporter};
