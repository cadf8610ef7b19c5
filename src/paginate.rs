//! Splitting the render copy into physical pages.
//!
//! Content flows top to bottom inside the off-screen container. Page boundaries are
//! chosen greedily: each page takes as much content as fits, then the boundary moves
//! up to the top of any unbreakable span it would cut. Unbreakable spans are atomic
//! blocks (`break-inside: avoid`) and the line boxes of every text node. Spans taller
//! than a page cannot be kept whole and are split where they fall.

use crate::dom::{Document, NodeId};
use crate::style::{BreakInside, ComputedStyle, Positioning};

const EPSILON: f32 = 0.01;

/// A horizontal band of the render copy, in CSS pixels relative to the container.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSlice {
    pub top: f32,
    pub bottom: f32,
}

impl PageSlice {
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    fn contains(&self, y: f32) -> bool {
        y >= self.top && y < self.bottom
    }
}

/// A vertical extent that must not be cut by a page boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Span {
    pub top: f32,
    pub bottom: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pagination {
    slices: Vec<PageSlice>,
    page_height: f32,
}

impl Pagination {
    pub fn slices(&self) -> &[PageSlice] {
        &self.slices
    }

    pub fn page_count(&self) -> usize {
        self.slices.len()
    }

    pub fn page_height(&self) -> f32 {
        self.page_height
    }

    /// 1-based page number containing the vertical offset `y`.
    pub fn page_of(&self, y: f32) -> usize {
        self.slices
            .iter()
            .position(|slice| slice.contains(y))
            .unwrap_or_else(|| self.slices.len().saturating_sub(1))
            + 1
    }
}

/// A titled section and the page on which it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionAnchor {
    pub title: String,
    pub page: usize,
}

/// Computes page bands for `content_height` pixels of content.
///
/// `blocks` are the spans that must not straddle a boundary when they fit on a page.
pub fn slice_pages(content_height: f32, page_height: f32, blocks: &[Span]) -> Vec<PageSlice> {
    let page_height = page_height.max(1.0);
    let content_height = content_height.max(0.0);
    let mut slices = Vec::new();
    let mut top = 0.0_f32;

    loop {
        let mut bottom = top + page_height;
        if bottom >= content_height - EPSILON {
            slices.push(PageSlice {
                top,
                bottom: content_height.max(top + EPSILON).min(bottom),
            });
            break;
        }

        while let Some(cut) = blocks
            .iter()
            .filter(|block| {
                block.bottom - block.top <= page_height + EPSILON
                    && block.top > top + EPSILON
                    && block.top < bottom - EPSILON
                    && block.bottom > bottom + EPSILON
            })
            .map(|block| block.top)
            .reduce(f32::min)
        {
            bottom = cut;
        }

        slices.push(PageSlice { top, bottom });
        top = bottom;
    }

    slices
}

/// Distance between consecutive baselines of text set in `style`.
fn line_pitch(style: &ComputedStyle) -> f32 {
    style.font_size.max(1.0) * style.line_height.max(1.0)
}

/// Splits a text box into the line boxes it is painted as.
fn line_spans(text: Span, pitch: f32) -> impl Iterator<Item = Span> {
    let lines = ((text.bottom - text.top - EPSILON) / pitch).ceil().max(1.0) as usize;
    (0..lines).map(move |line| Span {
        top: text.top + line as f32 * pitch,
        bottom: (text.top + (line + 1) as f32 * pitch).min(text.bottom),
    })
}

/// Collects the flow geometry of the render copy rooted at `root`.
///
/// Offsets are relative to `origin_y`. Page-anchored subtrees are ignored. Text
/// nodes contribute one span per line, measured with the style of their element.
fn flow_geometry(document: &Document, root: NodeId, origin_y: f32) -> (f32, Vec<Span>) {
    let mut extent = 0.0_f32;
    let mut blocks = Vec::new();
    let mut stack = vec![(root, line_pitch(&ComputedStyle::default()))];

    while let Some((node, pitch)) = stack.pop() {
        let element = document.element(node);
        let mut child_pitch = pitch;
        if let Some(element) = element {
            let style = element.style();
            if style.position == Positioning::PageAnchored || !style.display {
                continue;
            }
            child_pitch = line_pitch(style);
        }
        let Some(layout) = document.layout(node) else {
            continue;
        };
        let span = Span {
            top: layout.y - origin_y,
            bottom: layout.bottom() - origin_y,
        };
        extent = extent.max(span.bottom);
        if element.map(|element| element.style().break_inside) == Some(BreakInside::Avoid) {
            blocks.push(span);
        }
        if document.text(node).is_some() && span.bottom > span.top {
            blocks.extend(line_spans(span, pitch));
        }
        stack.extend(document.children(node).iter().map(|child| (*child, child_pitch)));
    }

    (extent, blocks)
}

/// Paginates the flow content under `container`.
pub fn paginate(document: &Document, container: NodeId, page_height: f32) -> Pagination {
    let origin_y = document
        .layout(container)
        .map(|layout| layout.y)
        .unwrap_or_default();
    let (extent, blocks) = flow_geometry(document, container, origin_y);
    let slices = slice_pages(extent, page_height, &blocks);
    log::debug!(
        "paginated {:.1}px of content into {} page(s) with {} unbreakable span(s)",
        extent,
        slices.len(),
        blocks.len()
    );
    Pagination {
        slices,
        page_height,
    }
}

/// Maps every `[data-section]` element under `container` to the page it starts on.
pub fn section_anchors(
    document: &Document,
    container: NodeId,
    pagination: &Pagination,
) -> Vec<SectionAnchor> {
    let origin_y = document
        .layout(container)
        .map(|layout| layout.y)
        .unwrap_or_default();
    document
        .descendants(container)
        .into_iter()
        .filter_map(|node| {
            let title = document.element(node)?.attribute("data-section")?;
            let layout = document.layout(node)?;
            Some(SectionAnchor {
                title: title.to_owned(),
                page: pagination.page_of(layout.y - origin_y),
            })
        })
        .collect()
}
