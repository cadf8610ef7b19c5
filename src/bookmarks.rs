//! PDF outline entries for resume sections, written with `lopdf`.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::paginate::SectionAnchor;

/// Errors that can occur while adding section bookmarks to an encoded PDF.
#[derive(Debug)]
pub enum BookmarkError {
    /// The encoded bytes could not be parsed or written back by `lopdf`.
    Pdf(lopdf::Error),
    /// The trailer has no `/Root` catalog reference.
    MissingCatalog,
    /// The catalog object is not a dictionary.
    InvalidCatalog,
    /// An anchor points past the last page of the document.
    MissingPage { title: String, page: usize },
}

impl From<lopdf::Error> for BookmarkError {
    fn from(err: lopdf::Error) -> Self {
        Self::Pdf(err)
    }
}

impl std::fmt::Display for BookmarkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf(err) => write!(f, "Failed to process PDF bytes: {err}"),
            Self::MissingCatalog => write!(f, "PDF catalog entry is missing"),
            Self::InvalidCatalog => write!(f, "PDF catalog entry is not a dictionary"),
            Self::MissingPage { title, page } => {
                write!(f, "Section '{title}' starts on missing page {page}")
            }
        }
    }
}

impl std::error::Error for BookmarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pdf(err) => Some(err),
            Self::MissingCatalog | Self::InvalidCatalog | Self::MissingPage { .. } => None,
        }
    }
}

/// Adds a flat `/Outlines` tree with one `/Dest [page /Fit]` entry per anchor.
///
/// The input is returned unchanged when there are no anchors.
pub fn apply_section_bookmarks(
    pdf_bytes: &[u8],
    anchors: &[SectionAnchor],
) -> Result<Vec<u8>, BookmarkError> {
    if anchors.is_empty() {
        return Ok(pdf_bytes.to_vec());
    }

    let mut document = Document::load_mem(pdf_bytes)?;
    let pages = document.get_pages();
    let entries = outline_entries(&mut document, anchors, &pages)?;

    let outlines_id = document.new_object_id();
    for (index, entry) in entries.iter().enumerate() {
        let mut dictionary = Dictionary::new();
        dictionary.set("Title", Object::string_literal(entry.title.as_str()));
        dictionary.set(
            "Dest",
            Object::Array(vec![
                Object::Reference(entry.page_ref),
                Object::Name("Fit".into()),
            ]),
        );
        dictionary.set("Parent", Object::Reference(outlines_id));
        if let Some(previous) = index.checked_sub(1).and_then(|prev| entries.get(prev)) {
            dictionary.set("Prev", Object::Reference(previous.object_id));
        }
        if let Some(next) = entries.get(index + 1) {
            dictionary.set("Next", Object::Reference(next.object_id));
        }
        document
            .objects
            .insert(entry.object_id, Object::Dictionary(dictionary));
    }
    attach_outlines(&mut document, outlines_id, &entries)?;

    let mut buffer = Vec::new();
    document
        .save_to(&mut buffer)
        .map_err(|err| BookmarkError::Pdf(err.into()))?;
    log::debug!("added {} section bookmark(s)", entries.len());
    Ok(buffer)
}

struct OutlineEntry {
    object_id: ObjectId,
    page_ref: ObjectId,
    title: String,
}

fn outline_entries(
    document: &mut Document,
    anchors: &[SectionAnchor],
    pages: &BTreeMap<u32, ObjectId>,
) -> Result<Vec<OutlineEntry>, BookmarkError> {
    anchors
        .iter()
        .map(|anchor| {
            let page_ref = pages
                .get(&(anchor.page as u32))
                .copied()
                .ok_or_else(|| BookmarkError::MissingPage {
                    title: anchor.title.clone(),
                    page: anchor.page,
                })?;
            Ok(OutlineEntry {
                object_id: document.new_object_id(),
                page_ref,
                title: anchor.title.clone(),
            })
        })
        .collect()
}

fn attach_outlines(
    document: &mut Document,
    outlines_id: ObjectId,
    entries: &[OutlineEntry],
) -> Result<(), BookmarkError> {
    let catalog_id = document
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| BookmarkError::MissingCatalog)?;

    let mut outlines = Dictionary::new();
    outlines.set("Type", Object::Name("Outlines".into()));
    outlines.set("Count", Object::Integer(entries.len() as i64));
    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
        outlines.set("First", Object::Reference(first.object_id));
        outlines.set("Last", Object::Reference(last.object_id));
    }
    document
        .objects
        .insert(outlines_id, Object::Dictionary(outlines));

    document
        .objects
        .get_mut(&catalog_id)
        .ok_or(BookmarkError::MissingCatalog)?
        .as_dict_mut()
        .map_err(|_| BookmarkError::InvalidCatalog)?
        .set("Outlines", Object::Reference(outlines_id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportConfig, PageFormat};
    use crate::encode::{encode_pages, PageRaster};
    use image::{Rgb, RgbImage};

    fn two_page_pdf() -> Vec<u8> {
        let page = PageRaster::new(RgbImage::from_pixel(100, 50, Rgb([200, 200, 200])));
        encode_pages(
            &[page.clone(), page],
            &ExportConfig::default().page_layout(PageFormat::A4),
            90,
            "Bookmarks",
        )
        .expect("encode")
    }

    fn anchor(title: &str, page: usize) -> SectionAnchor {
        SectionAnchor {
            title: title.to_owned(),
            page,
        }
    }

    #[test]
    fn outlines_point_at_section_pages() {
        let bytes = apply_section_bookmarks(
            &two_page_pdf(),
            &[anchor("Experience", 1), anchor("Education", 2)],
        )
        .expect("bookmarks");

        let document = Document::load_mem(&bytes).expect("reload");
        let catalog = document.catalog().expect("catalog");
        let outlines_id = catalog
            .get(b"Outlines")
            .and_then(Object::as_reference)
            .expect("outlines reference");
        let outlines = document.get_dictionary(outlines_id).expect("outlines");
        assert_eq!(outlines.get(b"Count").and_then(Object::as_i64).ok(), Some(2));
    }

    #[test]
    fn anchors_past_the_last_page_are_rejected() {
        let error = apply_section_bookmarks(&two_page_pdf(), &[anchor("Skills", 3)]).unwrap_err();
        assert!(matches!(error, BookmarkError::MissingPage { page: 3, .. }));
    }

    #[test]
    fn no_anchors_keeps_bytes() {
        let bytes = two_page_pdf();
        assert_eq!(apply_section_bookmarks(&bytes, &[]).expect("noop"), bytes);
    }
}
