//! Synthesized page footer.
//!
//! The footer is appended to the render copy as a page-anchored block with three
//! slots: a page label containing `{page}`/`{pages}` placeholders, the contact
//! identifier and the generation date. The rasterizer repeats it on every page,
//! substituting the placeholders.

use chrono::NaiveDate;

use crate::dom::{Document, DomError, ElementData, LayoutBox, NodeId};
use crate::style::{Color, ComputedStyle, Positioning};

pub const FOOTER_CLASS: &str = "export-footer";
pub const SLOT_ATTRIBUTE: &str = "data-footer-slot";
pub const PAGE_PLACEHOLDER: &str = "{page}";
pub const PAGES_PLACEHOLDER: &str = "{pages}";

const PAGE_LABEL: &str = "Page {page} of {pages}";
const FOOTER_FONT_SIZE: f32 = 9.0;
const FOOTER_COLOR: Color = Color::rgb(0x6b, 0x72, 0x80);

/// Text shown in the footer of every page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FooterContent {
    pub contact: String,
    pub generated_on: NaiveDate,
}

impl FooterContent {
    pub fn new(contact: impl Into<String>, generated_on: NaiveDate) -> Self {
        Self {
            contact: contact.into(),
            generated_on,
        }
    }

    fn date_label(&self) -> String {
        format!("Generated {}", self.generated_on.format("%Y-%m-%d"))
    }
}

/// Replaces the page placeholders in a footer text.
pub fn fill_page_placeholders(text: &str, page: usize, pages: usize) -> String {
    text.replace(PAGES_PLACEHOLDER, &pages.to_string())
        .replace(PAGE_PLACEHOLDER, &page.to_string())
}

/// Appends the footer block to `parent` and returns its node.
///
/// The block spans `width` CSS pixels and is `height` tall; its vertical position is
/// irrelevant because the rasterizer places it at the bottom of each page.
pub fn append_footer(
    document: &mut Document,
    parent: NodeId,
    content: &FooterContent,
    width: f32,
    height: f32,
) -> Result<NodeId, DomError> {
    let origin = document.layout(parent).ok_or(DomError::UnknownNode(parent))?;
    let style = ComputedStyle {
        position: Positioning::PageAnchored,
        color: FOOTER_COLOR,
        font_size: FOOTER_FONT_SIZE,
        ..ComputedStyle::default()
    };
    let footer = document.create_element(
        ElementData::new("div")
            .with_class(FOOTER_CLASS)
            .with_style(style.clone()),
    );
    document.set_layout(footer, LayoutBox::new(origin.x, origin.y, width, height));
    document.append_child(parent, footer)?;

    let slot_style = ComputedStyle {
        position: Positioning::Flow,
        ..style
    };
    let column = width / 3.0;
    let slots = [
        ("page", PAGE_LABEL.to_owned()),
        ("contact", content.contact.clone()),
        ("date", content.date_label()),
    ];
    for (index, (slot, text)) in slots.into_iter().enumerate() {
        let cell = LayoutBox::new(origin.x + column * index as f32, origin.y, column, height);
        let span = document.create_element(
            ElementData::new("span")
                .with_attribute(SLOT_ATTRIBUTE, slot)
                .with_style(slot_style.clone()),
        );
        document.set_layout(span, cell);
        document.append_child(footer, span)?;

        let text = document.create_text(text);
        document.set_layout(text, cell);
        document.append_child(span, text)?;
    }

    Ok(footer)
}
