//! Errors reported by a failed export.

use std::io;

use thiserror::Error;

use crate::dom::DomError;
use crate::encode::EncodeError;
use crate::raster::RasterError;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("template root matching '{selector}' was not found in the document")]
    TemplateRootMissing { selector: String },
    #[error("failed to build the render copy")]
    Dom(#[from] DomError),
    #[error("failed to rasterize the render copy")]
    Raster(#[from] RasterError),
    #[error("failed to encode the PDF")]
    Encode(#[from] EncodeError),
    #[error("failed to deliver '{filename}'")]
    Delivery {
        filename: String,
        #[source]
        source: io::Error,
    },
    #[cfg(feature = "bookmarks")]
    #[error("failed to add section bookmarks")]
    Bookmarks(#[from] crate::bookmarks::BookmarkError),
}
