//! Export configuration.

use std::time::Duration;

use crate::selector::Selector;

pub const MM_PER_INCH: f64 = 25.4;
/// CSS reference pixel density.
pub const CSS_PX_PER_INCH: f64 = 96.0;

const DEFAULT_MARGIN_MM: f64 = 10.0;
const DEFAULT_FOOTER_HEIGHT_MM: f64 = 8.0;
const DEFAULT_SCALE: f32 = 2.0;
const MIN_SCALE: f32 = 1.0;
const MAX_SCALE: f32 = 4.0;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_TEMPLATE_ROOT_ATTRIBUTE: &str = "data-template-root";
const DEFAULT_BASE_NAME: &str = "Resume";

/// Converts CSS pixels to millimetres.
pub fn px_to_mm(px: f64) -> f64 {
    px * MM_PER_INCH / CSS_PX_PER_INCH
}

/// Converts millimetres to CSS pixels.
pub fn mm_to_px(mm: f64) -> f64 {
    mm * CSS_PX_PER_INCH / MM_PER_INCH
}

/// Physical page size in portrait orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageFormat {
    pub name: &'static str,
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PageFormat {
    pub const A4: PageFormat = PageFormat {
        name: "A4",
        width_mm: 210.0,
        height_mm: 297.0,
    };
}

impl Default for PageFormat {
    fn default() -> Self {
        PageFormat::A4
    }
}

/// Page margins in millimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(mm: f64) -> Self {
        Self {
            top: mm,
            right: mm,
            bottom: mm,
            left: mm,
        }
    }
}

impl Default for Margins {
    fn default() -> Self {
        Margins::uniform(DEFAULT_MARGIN_MM)
    }
}

/// Geometry of one physical page: format, margins and the footer band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageLayout {
    pub format: PageFormat,
    pub margins: Margins,
    pub footer_height_mm: f64,
}

impl PageLayout {
    pub fn printable_width_mm(&self) -> f64 {
        self.format.width_mm - self.margins.left - self.margins.right
    }

    /// Height between the top and bottom margins, footer band included.
    pub fn printable_height_mm(&self) -> f64 {
        self.format.height_mm - self.margins.top - self.margins.bottom
    }

    /// Height available to flowing content once margins and the footer band are removed.
    pub fn content_height_mm(&self) -> f64 {
        self.format.height_mm - self.margins.top - self.margins.bottom - self.footer_height_mm
    }

    pub fn printable_width_px(&self) -> f32 {
        mm_to_px(self.printable_width_mm()) as f32
    }

    pub fn content_height_px(&self) -> f32 {
        mm_to_px(self.content_height_mm()) as f32
    }

    pub fn footer_height_px(&self) -> f32 {
        mm_to_px(self.footer_height_mm) as f32
    }
}

/// Settings shared by every export run by an [`Exporter`](crate::export::Exporter).
#[derive(Clone, Debug)]
pub struct ExportConfig {
    margins: Margins,
    footer_height_mm: f64,
    scale: f32,
    jpeg_quality: u8,
    settle_delay: Duration,
    ready_timeout: Duration,
    template_root: Selector,
    fallback_base_name: String,
    #[cfg(feature = "bookmarks")]
    bookmarks: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            margins: Margins::default(),
            footer_height_mm: DEFAULT_FOOTER_HEIGHT_MM,
            scale: DEFAULT_SCALE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            settle_delay: DEFAULT_SETTLE_DELAY,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            template_root: Selector::attribute(DEFAULT_TEMPLATE_ROOT_ATTRIBUTE),
            fallback_base_name: DEFAULT_BASE_NAME.to_owned(),
            #[cfg(feature = "bookmarks")]
            bookmarks: true,
        }
    }
}

impl ExportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page margins.
    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    /// Sets the height of the footer band reserved at the bottom of each page.
    pub fn with_footer_height_mm(mut self, height: f64) -> Self {
        self.footer_height_mm = height.max(0.0);
        self
    }

    /// Sets the oversampling factor, clamped to `1.0..=4.0`.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = if scale.is_finite() {
            scale.clamp(MIN_SCALE, MAX_SCALE)
        } else {
            DEFAULT_SCALE
        };
        self
    }

    /// Sets the JPEG quality of page images, clamped to `1..=100`.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Sets the fallback wait used when a request carries no ready signal.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the upper bound for waiting on a request's ready signal.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Sets the selector identifying the template root in the live document.
    pub fn with_template_root(mut self, selector: Selector) -> Self {
        self.template_root = selector;
        self
    }

    /// Sets the base file name used when the owner name is missing.
    pub fn with_fallback_base_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_base_name = name.into();
        self
    }

    /// Enables or disables PDF outline entries for `[data-section]` elements.
    #[cfg(feature = "bookmarks")]
    pub fn with_bookmarks(mut self, enabled: bool) -> Self {
        self.bookmarks = enabled;
        self
    }

    pub fn page_layout(&self, format: PageFormat) -> PageLayout {
        PageLayout {
            format,
            margins: self.margins,
            footer_height_mm: self.footer_height_mm,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    pub fn template_root(&self) -> &Selector {
        &self.template_root
    }

    pub fn fallback_base_name(&self) -> &str {
        &self.fallback_base_name
    }

    #[cfg(feature = "bookmarks")]
    pub fn bookmarks(&self) -> bool {
        self.bookmarks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_layout_dimensions() {
        let layout = ExportConfig::default().page_layout(PageFormat::A4);
        assert_eq!(layout.printable_width_mm(), 190.0);
        assert_eq!(layout.content_height_mm(), 269.0);
        assert_eq!(layout.printable_height_mm(), 277.0);
        assert!((layout.printable_width_px() - 718.11).abs() < 0.01);
    }

    #[test]
    fn scale_and_quality_are_clamped() {
        let config = ExportConfig::new()
            .with_scale(12.0)
            .with_jpeg_quality(0);
        assert_eq!(config.scale(), 4.0);
        assert_eq!(config.jpeg_quality(), 1);
        assert_eq!(ExportConfig::new().with_scale(f32::NAN).scale(), 2.0);
    }
}
