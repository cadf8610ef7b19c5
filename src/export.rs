//! The export orchestrator.
//!
//! [`Exporter::export`] turns the template root of a live [`Document`] into a PDF
//! without touching the subtree the user is looking at. Work happens on a deep copy
//! placed in an off-screen container; the container is owned by a [`DetachedCopy`]
//! guard whose `Drop` removes it again on every exit path, panics included.

use std::fmt;

use chrono::NaiveDate;
use image::{imageops, RgbImage};
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::config::{ExportConfig, PageFormat};
use crate::dom::{Document, DomError, ElementData, LayoutBox, NodeId};
use crate::encode::{encode_pages, PageRaster};
use crate::error::ExportError;
use crate::filename::artifact_filename;
use crate::footer::{append_footer, FooterContent};
use crate::optimize::CorrectionTable;
use crate::paginate::{paginate, PageSlice};
use crate::raster::{Rasterizer, SkiaRasterizer};
use crate::sink::{ArtifactSink, DirectorySink};
use crate::style::{ComputedStyle, Stylesheet, OVERRIDE_STYLE_CLASS};

pub const CONTAINER_CLASS: &str = "export-render-container";
/// Horizontal position of the off-screen container, far outside any viewport.
pub const OFFSCREEN_X: f32 = -10_000.0;

/// Owner and contact details of the exported document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub owner_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl DocumentMetadata {
    pub fn new(owner_name: impl Into<String>) -> Self {
        Self {
            owner_name: Some(owner_name.into()),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Contact identifier shown in the footer: email, else phone, else owner name.
    pub fn contact(&self) -> String {
        [&self.email, &self.phone, &self.owner_name]
            .into_iter()
            .filter_map(|field| field.as_deref().map(str::trim))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
            .to_owned()
    }
}

/// One export invocation.
#[derive(Debug)]
pub struct ExportRequest {
    metadata: DocumentMetadata,
    template: String,
    format: PageFormat,
    generated_on: Option<NaiveDate>,
    ready: Option<oneshot::Receiver<()>>,
}

impl ExportRequest {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            metadata: DocumentMetadata::default(),
            template: template.into(),
            format: PageFormat::A4,
            generated_on: None,
            ready: None,
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Overrides the generation date printed in the footer.
    pub fn with_generated_on(mut self, date: NaiveDate) -> Self {
        self.generated_on = Some(date);
        self
    }

    /// Waits for `ready` instead of the fixed settle delay.
    pub fn with_ready_signal(mut self, ready: oneshot::Receiver<()>) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn format(&self) -> PageFormat {
        self.format
    }
}

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportStage {
    Idle,
    Cloning,
    Styling,
    Rasterizing,
    Encoding,
    Downloading,
    Cleanup,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportStage::Idle => "idle",
            ExportStage::Cloning => "cloning",
            ExportStage::Styling => "styling",
            ExportStage::Rasterizing => "rasterizing",
            ExportStage::Encoding => "encoding",
            ExportStage::Downloading => "downloading",
            ExportStage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub filename: String,
    pub pages: usize,
    /// Page bands in CSS pixels, relative to the top of the render container.
    pub slices: Vec<PageSlice>,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct ExportFailure {
    pub stage: ExportStage,
    pub error: ExportError,
}

impl fmt::Display for ExportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "export failed while {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for ExportFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Outcome of [`Exporter::export`].
#[derive(Debug)]
pub enum ExportResult {
    Exported(ExportSummary),
    Failed(ExportFailure),
}

impl ExportResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportResult::Exported(_))
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            ExportResult::Exported(summary) => Some(&summary.filename),
            ExportResult::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ExportError> {
        match self {
            ExportResult::Exported(_) => None,
            ExportResult::Failed(failure) => Some(&failure.error),
        }
    }

    pub fn into_result(self) -> Result<ExportSummary, ExportFailure> {
        match self {
            ExportResult::Exported(summary) => Ok(summary),
            ExportResult::Failed(failure) => Err(failure),
        }
    }
}

type BeforeHook = Box<dyn Fn(&ExportRequest) + Send + Sync>;
type AfterHook = Box<dyn Fn(&ExportResult) + Send + Sync>;

/// Callbacks run around every export, e.g. to toggle a progress indicator.
#[derive(Default)]
pub struct ExportHooks {
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
}

impl ExportHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before(mut self, hook: impl Fn(&ExportRequest) + Send + Sync + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    /// Runs after the copy has been cleaned up, on success and on failure.
    pub fn on_after(mut self, hook: impl Fn(&ExportResult) + Send + Sync + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for ExportHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportHooks")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// The off-screen render copy of a template root.
///
/// Dropping the guard removes the container and frees every node under it.
pub struct DetachedCopy<'a> {
    document: &'a mut Document,
    container: NodeId,
    root: NodeId,
}

impl<'a> DetachedCopy<'a> {
    /// Clones `source` into a new off-screen container `width` CSS pixels wide.
    pub fn create(document: &'a mut Document, source: NodeId, width: f32) -> Result<Self, DomError> {
        let container = document.create_element(ElementData::new("div").with_class(CONTAINER_CLASS));
        document.set_layout(container, LayoutBox::new(OFFSCREEN_X, 0.0, width, 0.0));
        if let Err(err) = document.append_child(document.body(), container) {
            document.remove_subtree(container);
            return Err(err);
        }

        let mut copy = Self {
            document,
            container,
            root: container,
        };
        let root = copy
            .document
            .deep_clone(source)
            .ok_or(DomError::UnknownNode(source))?;
        if let Err(err) = copy.document.append_child(container, root) {
            copy.document.remove_subtree(root);
            return Err(err);
        }
        copy.root = root;

        let origin = copy.document.layout(root).unwrap_or_default();
        copy.document
            .translate_subtree(root, OFFSCREEN_X - origin.x, -origin.y);
        debug!(
            "cloned template root into off-screen container ({} live node(s))",
            copy.document.live_nodes()
        );
        Ok(copy)
    }

    pub fn document(&self) -> &Document {
        &*self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut *self.document
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    /// Root of the cloned template subtree.
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn container_box(&self) -> LayoutBox {
        self.document.layout(self.container).unwrap_or_default()
    }

    /// Moves the root to the container origin, offset by its own margin.
    fn reposition(&mut self) {
        let frame = self.container_box();
        let root = self.root;
        let margin = self
            .document
            .element(root)
            .map(|element| element.style().margin)
            .unwrap_or_default();
        let current = self.document.layout(root).unwrap_or_default();
        self.document.translate_subtree(
            root,
            frame.x + margin - current.x,
            frame.y + margin - current.y,
        );
    }

    /// Scales the copy down when it is wider than the container and records the
    /// resulting content height on the container.
    fn fit_to_width(&mut self) {
        let mut frame = self.container_box();
        let root = self.root;
        let current = self.document.layout(root).unwrap_or_default();
        if current.width > frame.width && current.width > 0.0 {
            let factor = frame.width / current.width;
            debug!("scaling render copy by {:.3} to fit {:.1}px", factor, frame.width);
            self.document.scale_subtree(root, frame.x, frame.y, factor);
        }
        let fitted = self.document.layout(root).unwrap_or_default();
        frame.height = (fitted.bottom() - frame.y).max(0.0);
        self.document.set_layout(self.container, frame);
    }
}

impl Drop for DetachedCopy<'_> {
    fn drop(&mut self) {
        let freed = self.document.remove_subtree(self.container);
        debug!("{}: removed render copy ({} node(s))", ExportStage::Cleanup, freed);
    }
}

/// Exports documents with a fixed configuration, rasterizer and sink.
pub struct Exporter<R = SkiaRasterizer, S = DirectorySink> {
    config: ExportConfig,
    rasterizer: R,
    sink: S,
    corrections: CorrectionTable,
    overrides: Stylesheet,
    hooks: ExportHooks,
}

impl<R: Rasterizer, S: ArtifactSink> Exporter<R, S> {
    pub fn new(config: ExportConfig, rasterizer: R, sink: S) -> Self {
        Self {
            config,
            rasterizer,
            sink,
            corrections: CorrectionTable::default(),
            overrides: Stylesheet::print_overrides(),
            hooks: ExportHooks::default(),
        }
    }

    pub fn with_corrections(mut self, corrections: CorrectionTable) -> Self {
        self.corrections = corrections;
        self
    }

    pub fn with_hooks(mut self, hooks: ExportHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs one export. Always resolves to a result; failures are reported, not raised.
    pub async fn export(&self, document: &mut Document, mut request: ExportRequest) -> ExportResult {
        if let Some(before) = &self.hooks.before {
            before(&request);
        }
        debug!("{}: export of template '{}' requested", ExportStage::Idle, request.template);
        self.settle(request.ready.take()).await;

        let result = match self.run(document, &request).await {
            Ok(summary) => {
                info!(
                    "exported {} ({} page(s), {} bytes)",
                    summary.filename,
                    summary.pages,
                    summary.bytes.len()
                );
                ExportResult::Exported(summary)
            }
            Err(failure) => {
                warn!("{}", failure);
                ExportResult::Failed(failure)
            }
        };

        if let Some(after) = &self.hooks.after {
            after(&result);
        }
        result
    }

    async fn settle(&self, ready: Option<oneshot::Receiver<()>>) {
        match ready {
            Some(signal) => match tokio::time::timeout(self.config.ready_timeout(), signal).await {
                Ok(Ok(())) => debug!("document signalled render completion"),
                Ok(Err(_)) => warn!("render-complete signal was dropped, proceeding"),
                Err(_) => warn!(
                    "document did not signal render completion within {:?}, proceeding",
                    self.config.ready_timeout()
                ),
            },
            None if !self.config.settle_delay().is_zero() => {
                tokio::time::sleep(self.config.settle_delay()).await;
            }
            None => {}
        }
    }

    async fn run(
        &self,
        document: &mut Document,
        request: &ExportRequest,
    ) -> Result<ExportSummary, ExportFailure> {
        let layout = self.config.page_layout(request.format);
        let template = request.template.as_str();

        debug!("{}: locating template root", ExportStage::Cloning);
        let source = document
            .query(document.body(), self.config.template_root())
            .ok_or_else(|| ExportError::TemplateRootMissing {
                selector: self.config.template_root().to_string(),
            })
            .map_err(at(ExportStage::Cloning))?;
        let mut copy = DetachedCopy::create(document, source, layout.printable_width_px())
            .map_err(at(ExportStage::Cloning))?;

        debug!("{}: applying print overrides", ExportStage::Styling);
        self.style_copy(&mut copy, template)
            .map_err(at(ExportStage::Styling))?;
        let generated_on = request
            .generated_on
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let footer_content = FooterContent::new(request.metadata.contact(), generated_on);
        let container = copy.container();
        let footer = append_footer(
            copy.document_mut(),
            container,
            &footer_content,
            layout.printable_width_px(),
            layout.footer_height_px(),
        )
        .map_err(at(ExportStage::Styling))?;

        debug!("{}: paginating and rasterizing", ExportStage::Rasterizing);
        let pagination = paginate(copy.document(), container, layout.content_height_px());
        let pages = self
            .rasterize_pages(&copy, footer, pagination.slices())
            .map_err(at(ExportStage::Rasterizing))?;
        tokio::task::yield_now().await;

        debug!("{}: encoding {} page(s)", ExportStage::Encoding, pages.len());
        let filename = artifact_filename(
            request.metadata.owner_name.as_deref(),
            template,
            self.config.fallback_base_name(),
        );
        let title = filename.trim_end_matches(".pdf").replace('_', " ");
        let bytes = encode_pages(&pages, &layout, self.config.jpeg_quality(), &title)
            .map_err(at(ExportStage::Encoding))?;
        #[cfg(feature = "bookmarks")]
        let bytes = if self.config.bookmarks() {
            let anchors = crate::paginate::section_anchors(copy.document(), container, &pagination);
            crate::bookmarks::apply_section_bookmarks(&bytes, &anchors)
                .map_err(at(ExportStage::Encoding))?
        } else {
            bytes
        };
        tokio::task::yield_now().await;

        debug!("{}: delivering {}", ExportStage::Downloading, filename);
        self.sink
            .deliver(&filename, &bytes)
            .map_err(|source| ExportError::Delivery {
                filename: filename.clone(),
                source,
            })
            .map_err(at(ExportStage::Downloading))?;

        drop(copy);
        Ok(ExportSummary {
            filename,
            pages: pages.len(),
            slices: pagination.slices().to_vec(),
            bytes,
        })
    }

    fn style_copy(&self, copy: &mut DetachedCopy<'_>, template: &str) -> Result<(), DomError> {
        let container = copy.container();
        let root = copy.root();
        let document = copy.document_mut();

        let origin = document.layout(container).unwrap_or_default();
        let style_node = document.create_element(
            ElementData::new("style")
                .with_class(OVERRIDE_STYLE_CLASS)
                .with_style(ComputedStyle {
                    display: false,
                    ..ComputedStyle::default()
                }),
        );
        document.set_layout(style_node, LayoutBox::new(origin.x, origin.y, 0.0, 0.0));
        document.append_child(container, style_node)?;
        let css = document.create_text(self.overrides.to_css());
        document.append_child(style_node, css)?;

        let styled = self.overrides.apply(document, root);
        debug!("print overrides matched {} element(s)", styled);
        self.corrections.optimize(document, root, template);

        copy.reposition();
        copy.fit_to_width();
        Ok(())
    }

    fn rasterize_pages(
        &self,
        copy: &DetachedCopy<'_>,
        footer: NodeId,
        slices: &[PageSlice],
    ) -> Result<Vec<PageRaster>, ExportError> {
        let scale = self.config.scale();
        let extent = slices.last().map(|slice| slice.bottom).unwrap_or_default();
        let content = self
            .rasterizer
            .rasterize_content(copy.document(), copy.container(), extent, scale)?;

        let count = slices.len();
        slices
            .iter()
            .enumerate()
            .map(|(index, slice)| {
                let strip = self.rasterizer.rasterize_footer(
                    copy.document(),
                    footer,
                    index + 1,
                    count,
                    scale,
                )?;
                Ok(PageRaster::new(crop_slice(&content, slice, scale)).with_footer(strip))
            })
            .collect()
    }
}

fn at<E: Into<ExportError>>(stage: ExportStage) -> impl Fn(E) -> ExportFailure {
    move |error| ExportFailure {
        stage,
        error: error.into(),
    }
}

/// Cuts the raster rows of one page out of the full content raster.
fn crop_slice(content: &RgbImage, slice: &PageSlice, scale: f32) -> RgbImage {
    let height = content.height().max(1);
    let top = ((slice.top * scale).round().max(0.0) as u32).min(height - 1);
    let bottom = ((slice.bottom * scale).round().max(0.0) as u32).clamp(top + 1, height);
    imageops::crop_imm(content, 0, top, content.width(), bottom - top).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;
    use image::Rgb;

    fn document_with_root(width: f32) -> (Document, NodeId) {
        let mut document = Document::new();
        let root = document.create_element(ElementData::new("main").with_attribute("data-template-root", ""));
        document.set_layout(root, LayoutBox::new(120.0, 64.0, width, 300.0));
        document.append_child(document.body(), root).expect("attach root");
        let child = document.create_element(ElementData::new("section"));
        document.set_layout(child, LayoutBox::new(140.0, 80.0, width / 2.0, 100.0));
        document.append_child(root, child).expect("attach child");
        (document, root)
    }

    #[test]
    fn contact_prefers_email_then_phone_then_owner() {
        let owner = DocumentMetadata::new("Ada Lovelace");
        assert_eq!(owner.contact(), "Ada Lovelace");
        assert_eq!(owner.clone().with_phone("+44 20").contact(), "+44 20");
        assert_eq!(
            owner.with_phone("+44 20").with_email("ada@example.com").contact(),
            "ada@example.com"
        );
        assert_eq!(DocumentMetadata::default().contact(), "");
    }

    #[test]
    fn detached_copy_is_placed_off_screen_and_removed_on_drop() {
        let (mut document, root) = document_with_root(500.0);
        let before = document.snapshot(document.body());
        let live = document.live_nodes();

        {
            let copy = DetachedCopy::create(&mut document, root, 718.0).expect("copy");
            let container = copy.document().layout(copy.container()).expect("container box");
            assert_eq!(container.x, OFFSCREEN_X);
            assert_eq!(container.width, 718.0);
            let cloned = copy.document().layout(copy.root()).expect("clone box");
            assert_eq!((cloned.x, cloned.y), (OFFSCREEN_X, 0.0));
            let child = copy.document().children(copy.root())[0];
            assert_eq!(
                copy.document().layout(child).map(|layout| (layout.x, layout.y)),
                Some((OFFSCREEN_X + 20.0, 16.0))
            );
            assert_eq!(copy.document().live_nodes(), live + 3);
        }

        assert_eq!(document.live_nodes(), live);
        assert_eq!(document.snapshot(document.body()), before);
    }

    #[test]
    fn wide_copies_are_scaled_to_the_container() {
        let (mut document, root) = document_with_root(1436.0);
        let mut copy = DetachedCopy::create(&mut document, root, 718.0).expect("copy");
        copy.reposition();
        copy.fit_to_width();
        let fitted = copy.document().layout(copy.root()).expect("root box");
        assert_eq!(fitted.width, 718.0);
        assert_eq!(fitted.height, 150.0);
        assert_eq!(
            copy.document().layout(copy.container()).map(|frame| frame.height),
            Some(150.0)
        );
    }

    #[test]
    fn missing_source_node_leaves_no_container_behind() {
        let (mut document, root) = document_with_root(100.0);
        document.remove_subtree(root);
        let live = document.live_nodes();
        assert!(DetachedCopy::create(&mut document, root, 718.0).is_err());
        assert_eq!(document.live_nodes(), live);
        assert!(document
            .query(document.body(), &Selector::class(CONTAINER_CLASS))
            .is_none());
    }

    #[test]
    fn slices_are_cropped_at_scale() {
        let content = RgbImage::from_fn(10, 100, |_, y| Rgb([y as u8, 0, 0]));
        let page = crop_slice(&content, &PageSlice { top: 20.0, bottom: 45.0 }, 2.0);
        assert_eq!(page.dimensions(), (10, 50));
        assert_eq!(page.get_pixel(0, 0), &Rgb([40, 0, 0]));

        let tail = crop_slice(&content, &PageSlice { top: 45.0, bottom: 60.0 }, 2.0);
        assert_eq!(tail.dimensions(), (10, 10));
    }

    #[test]
    fn stages_display_in_lowercase() {
        assert_eq!(ExportStage::Rasterizing.to_string(), "rasterizing");
        assert_eq!(ExportStage::Downloading.to_string(), "downloading");
    }
}
