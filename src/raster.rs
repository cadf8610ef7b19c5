//! Rasterization of the render copy.
//!
//! [`Rasterizer`] is the seam between the export orchestrator and pixel production.
//! The default [`SkiaRasterizer`] paints boxes, borders and images with `tiny-skia`
//! and text with `rusttype`, oversampling by the requested scale factor. Geometry is
//! taken as-is from the layout boxes of the copy; nothing is re-laid out except
//! greedy word wrapping inside text boxes.

use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use log::{debug, warn};
use rusttype::{point, Font, Scale};
use thiserror::Error;
use tiny_skia::{
    FillRule, FilterQuality, GradientStop, LinearGradient, Paint, Path as SkPath, PathBuilder,
    Pattern, Pixmap, Point, PremultipliedColorU8, Rect, Shader, SpreadMode, Stroke, Transform,
};

use crate::dom::{Document, ImageSource, LayoutBox, NodeData, NodeId};
use crate::fonts::{self, FontSet};
use crate::footer::fill_page_placeholders;
use crate::style::{
    Background, BoxSizing, Color, ComputedStyle, EdgeRendering, Positioning, PrintColorAdjust,
};

/// Cubic Bézier control distance approximating a quarter circle.
const KAPPA: f32 = 0.552_284_8;

/// Errors raised while producing page rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("cannot allocate a {width}x{height} pixel canvas")]
    Canvas { width: u32, height: u32 },
    #[error("node {0:?} is missing from the render copy")]
    MissingNode(NodeId),
}

/// Produces oversampled RGB rasters from the render copy.
pub trait Rasterizer {
    /// Rasterizes the flow content of `container`, `height` CSS pixels tall.
    fn rasterize_content(
        &self,
        document: &Document,
        container: NodeId,
        height: f32,
        scale: f32,
    ) -> Result<RgbImage, RasterError>;

    /// Rasterizes the page-anchored `footer` for page `page` of `pages`.
    fn rasterize_footer(
        &self,
        document: &Document,
        footer: NodeId,
        page: usize,
        pages: usize,
        scale: f32,
    ) -> Result<RgbImage, RasterError>;
}

/// `tiny-skia` backed rasterizer.
pub struct SkiaRasterizer {
    fonts: Option<FontSet>,
}

impl Default for SkiaRasterizer {
    fn default() -> Self {
        Self::with_default_fonts()
    }
}

impl SkiaRasterizer {
    pub fn new(fonts: Option<FontSet>) -> Self {
        Self { fonts }
    }

    /// Uses the bundled fonts; text is skipped with a warning when none are found.
    pub fn with_default_fonts() -> Self {
        match fonts::default_font_set() {
            Ok(fonts) => {
                debug!("rasterizing text with the '{}' family", fonts.family());
                Self::new(Some(fonts))
            }
            Err(err) => {
                warn!("No fonts available, text will be omitted from exports: {}", err);
                Self::new(None)
            }
        }
    }

    /// Paints boxes and images only.
    pub fn without_text() -> Self {
        Self::new(None)
    }

    pub fn has_text(&self) -> bool {
        self.fonts.is_some()
    }
}

impl Rasterizer for SkiaRasterizer {
    fn rasterize_content(
        &self,
        document: &Document,
        container: NodeId,
        height: f32,
        scale: f32,
    ) -> Result<RgbImage, RasterError> {
        let frame = document
            .layout(container)
            .ok_or(RasterError::MissingNode(container))?;
        let mut canvas = Canvas::new(
            LayoutBox::new(frame.x, frame.y, frame.width, height),
            scale,
            self.fonts.as_ref(),
            None,
        )?;
        canvas.paint(document, container, &ComputedStyle::default(), true);
        Ok(canvas.into_rgb())
    }

    fn rasterize_footer(
        &self,
        document: &Document,
        footer: NodeId,
        page: usize,
        pages: usize,
        scale: f32,
    ) -> Result<RgbImage, RasterError> {
        let frame = document
            .layout(footer)
            .ok_or(RasterError::MissingNode(footer))?;
        let mut canvas = Canvas::new(frame, scale, self.fonts.as_ref(), Some((page, pages)))?;
        canvas.paint(document, footer, &ComputedStyle::default(), true);
        Ok(canvas.into_rgb())
    }
}

struct Canvas<'a> {
    pixmap: Pixmap,
    frame: LayoutBox,
    scale: f32,
    transform: Transform,
    fonts: Option<&'a FontSet>,
    /// Page number and count when painting a footer.
    page: Option<(usize, usize)>,
}

impl<'a> Canvas<'a> {
    fn new(
        frame: LayoutBox,
        scale: f32,
        fonts: Option<&'a FontSet>,
        page: Option<(usize, usize)>,
    ) -> Result<Self, RasterError> {
        let width = (frame.width * scale).ceil().max(0.0) as u32;
        let height = (frame.height * scale).ceil().max(1.0) as u32;
        let mut pixmap = Pixmap::new(width, height).ok_or(RasterError::Canvas { width, height })?;
        pixmap.fill(tiny_skia::Color::WHITE);
        debug!("allocated {}x{} canvas at scale {}", width, height, scale);

        Ok(Self {
            pixmap,
            frame,
            scale,
            transform: Transform::from_row(
                scale,
                0.0,
                0.0,
                scale,
                -frame.x * scale,
                -frame.y * scale,
            ),
            fonts,
            page,
        })
    }

    fn paint(&mut self, document: &Document, node: NodeId, inherited: &ComputedStyle, is_root: bool) {
        let Some(layout) = document.layout(node) else {
            return;
        };
        match document.data(node) {
            Some(NodeData::Text(text)) => self.paint_text(text, layout, inherited),
            Some(NodeData::Element(element)) => {
                let style = element.style();
                if !style.display
                    || element.tag() == "style"
                    || (style.position == Positioning::PageAnchored && !is_root)
                {
                    return;
                }
                self.paint_background(layout, style);
                if let Some(source) = element.image() {
                    self.paint_image(source, layout, style);
                }
                self.paint_border(layout, style);
                for child in document.children(node) {
                    self.paint(document, *child, style, false);
                }
            }
            None => {}
        }
    }

    fn paint_background(&mut self, layout: LayoutBox, style: &ComputedStyle) {
        if style.print_color_adjust != PrintColorAdjust::Exact {
            return;
        }
        let radius = style.border_radius.resolve(layout.width, layout.height);
        {
            let shader = match style.background {
                Background::Transparent => None,
                Background::Solid { color } => Some(Shader::SolidColor(to_skia(color, style.opacity))),
                Background::LinearGradient { from, to } => LinearGradient::new(
                    Point::from_xy(layout.x, layout.y),
                    Point::from_xy(layout.x, layout.bottom()),
                    vec![
                        GradientStop::new(0.0, to_skia(from, style.opacity)),
                        GradientStop::new(1.0, to_skia(to, style.opacity)),
                    ],
                    SpreadMode::Pad,
                    Transform::identity(),
                ),
            };
            if let (Some(shader), Some(path)) = (shader, rounded_rect(layout, radius)) {
                let paint = Paint {
                    shader,
                    anti_alias: style.edges == EdgeRendering::Smooth,
                    ..Paint::default()
                };
                self.pixmap
                    .fill_path(&path, &paint, FillRule::Winding, self.transform, None);
            }
        }
    }

    fn paint_border(&mut self, layout: LayoutBox, style: &ComputedStyle) {
        let radius = style.border_radius.resolve(layout.width, layout.height);
        if let Some(border) = style.border.filter(|border| border.width > 0.0) {
            let half = border.width / 2.0;
            let (outline, radius) = match style.box_sizing {
                BoxSizing::BorderBox => (inset(layout, half), (radius - half).max(0.0)),
                BoxSizing::ContentBox => (inset(layout, -half), radius + half),
            };
            if let Some(path) = rounded_rect(outline, radius) {
                let mut paint = Paint::default();
                paint.set_color(to_skia(border.color, style.opacity));
                paint.anti_alias = style.edges == EdgeRendering::Smooth;
                let stroke = Stroke {
                    width: border.width,
                    ..Stroke::default()
                };
                self.pixmap
                    .stroke_path(&path, &paint, &stroke, self.transform, None);
            }
        }
    }

    fn paint_image(&mut self, source: &ImageSource, layout: LayoutBox, style: &ComputedStyle) {
        let decoded = match decode_image(source) {
            Ok(image) => image,
            Err(err) => {
                warn!("Skipping image that could not be decoded: {}", err);
                return;
            }
        };
        let Some(pixels) = pixmap_from_image(&decoded) else {
            return;
        };
        if layout.width <= 0.0 || layout.height <= 0.0 {
            return;
        }

        let radius = if style.clip_content || style.border_radius != Default::default() {
            style.border_radius.resolve(layout.width, layout.height)
        } else {
            0.0
        };
        let Some(path) = rounded_rect(layout, radius) else {
            return;
        };
        let placement = Transform::from_row(
            layout.width / pixels.width() as f32,
            0.0,
            0.0,
            layout.height / pixels.height() as f32,
            layout.x,
            layout.y,
        );
        let paint = Paint {
            shader: Pattern::new(
                pixels.as_ref(),
                SpreadMode::Pad,
                FilterQuality::Bicubic,
                style.opacity.clamp(0.0, 1.0),
                placement,
            ),
            anti_alias: true,
            ..Paint::default()
        };
        self.pixmap
            .fill_path(&path, &paint, FillRule::Winding, self.transform, None);
    }

    fn paint_text(&mut self, text: &str, layout: LayoutBox, style: &ComputedStyle) {
        let Some(fonts) = self.fonts else {
            return;
        };
        let text = match self.page {
            Some((page, pages)) => fill_page_placeholders(text, page, pages),
            None => text.to_owned(),
        };
        let font = fonts.face(style.font_weight);
        let size = style.font_size.max(1.0);
        let line_height = size * style.line_height.max(1.0);
        let ascent = font.v_metrics(Scale::uniform(size)).ascent;
        let color = Color {
            a: (style.color.a as f32 * style.opacity.clamp(0.0, 1.0)).round() as u8,
            ..style.color
        };

        let device_size = Scale::uniform(size * self.scale);
        for (index, line) in wrap_words(font, size, &text, layout.width).iter().enumerate() {
            let baseline_y = layout.y + index as f32 * line_height + ascent;
            let origin = point(
                (layout.x - self.frame.x) * self.scale,
                (baseline_y - self.frame.y) * self.scale,
            );
            for glyph in font.layout(line, device_size, origin) {
                let Some(bounds) = glyph.pixel_bounding_box() else {
                    continue;
                };
                let pixmap = &mut self.pixmap;
                glyph.draw(|gx, gy, coverage| {
                    blend_pixel(
                        pixmap,
                        bounds.min.x + gx as i32,
                        bounds.min.y + gy as i32,
                        color,
                        coverage,
                    );
                });
            }
        }
    }

    fn into_rgb(self) -> RgbImage {
        let mut image = RgbImage::new(self.pixmap.width(), self.pixmap.height());
        for (target, source) in image.pixels_mut().zip(self.pixmap.pixels()) {
            let color = source.demultiply();
            *target = Rgb([color.red(), color.green(), color.blue()]);
        }
        image
    }
}

fn to_skia(color: Color, opacity: f32) -> tiny_skia::Color {
    let alpha = (color.a as f32 * opacity.clamp(0.0, 1.0)).round() as u8;
    tiny_skia::Color::from_rgba8(color.r, color.g, color.b, alpha)
}

fn inset(layout: LayoutBox, by: f32) -> LayoutBox {
    LayoutBox::new(
        layout.x + by,
        layout.y + by,
        layout.width - 2.0 * by,
        layout.height - 2.0 * by,
    )
}

fn rounded_rect(layout: LayoutBox, radius: f32) -> Option<SkPath> {
    let LayoutBox {
        x,
        y,
        width: w,
        height: h,
    } = layout;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let r = radius.min(w / 2.0).min(h / 2.0).max(0.0);
    if r <= 0.0 {
        return Rect::from_xywh(x, y, w, h).map(PathBuilder::from_rect);
    }

    let k = KAPPA * r;
    let mut builder = PathBuilder::new();
    builder.move_to(x + r, y);
    builder.line_to(x + w - r, y);
    builder.cubic_to(x + w - r + k, y, x + w, y + r - k, x + w, y + r);
    builder.line_to(x + w, y + h - r);
    builder.cubic_to(x + w, y + h - r + k, x + w - r + k, y + h, x + w - r, y + h);
    builder.line_to(x + r, y + h);
    builder.cubic_to(x + r - k, y + h, x, y + h - r + k, x, y + h - r);
    builder.line_to(x, y + r);
    builder.cubic_to(x, y + r - k, x + r - k, y, x + r, y);
    builder.close();
    builder.finish()
}

/// Alpha-blends a straight colour with `coverage` into the premultiplied pixmap.
fn blend_pixel(pixmap: &mut Pixmap, x: i32, y: i32, color: Color, coverage: f32) {
    let (width, height) = (pixmap.width() as i32, pixmap.height() as i32);
    if x < 0 || y < 0 || x >= width || y >= height {
        return;
    }
    let alpha = coverage.clamp(0.0, 1.0) * color.a as f32 / 255.0;
    if alpha <= 0.0 {
        return;
    }

    let index = y as usize * width as usize + x as usize;
    let pixels = pixmap.pixels_mut();
    let dst = pixels[index];
    let out_alpha = (255.0 * alpha + dst.alpha() as f32 * (1.0 - alpha)).round() as u8;
    let mix = |src: u8, dst: u8| {
        ((src as f32 * alpha + dst as f32 * (1.0 - alpha)).round() as u8).min(out_alpha)
    };
    if let Some(blended) = PremultipliedColorU8::from_rgba(
        mix(color.r, dst.red()),
        mix(color.g, dst.green()),
        mix(color.b, dst.blue()),
        out_alpha,
    ) {
        pixels[index] = blended;
    }
}

fn text_width(font: &Font<'static>, size: f32, text: &str) -> f32 {
    font.layout(text, Scale::uniform(size), point(0.0, 0.0))
        .last()
        .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
        .unwrap_or(0.0)
}

/// Greedy word wrap of `text` into lines no wider than `max_width` CSS pixels.
fn wrap_words(font: &Font<'static>, size: f32, text: &str, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_owned()
            } else {
                format!("{line} {word}")
            };
            if !line.is_empty() && text_width(font, size, &candidate) > max_width {
                lines.push(std::mem::replace(&mut line, word.to_owned()));
            } else {
                line = candidate;
            }
        }
        lines.push(line);
    }
    lines
}

/// Loads the image referenced by an element.
pub fn decode_image(source: &ImageSource) -> image::ImageResult<DynamicImage> {
    match source {
        ImageSource::Bytes(bytes) => image::load_from_memory(bytes),
        ImageSource::Path(path) => image::io::Reader::open(Path::new(path))?
            .with_guessed_format()?
            .decode(),
    }
}

fn pixmap_from_image(image: &DynamicImage) -> Option<Pixmap> {
    let rgba = image.to_rgba8();
    let mut pixmap = Pixmap::new(rgba.width(), rgba.height())?;
    for (target, source) in pixmap.pixels_mut().iter_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = source.0;
        *target = tiny_skia::ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementData;
    use crate::style::{Border, Radius};
    use image::{ImageBuffer, ImageOutputFormat};

    fn exact(background: Background) -> ComputedStyle {
        ComputedStyle {
            background,
            print_color_adjust: PrintColorAdjust::Exact,
            ..ComputedStyle::default()
        }
    }

    fn container(document: &mut Document, width: f32) -> NodeId {
        let container = document.create_element(ElementData::new("div"));
        document.set_layout(container, LayoutBox::new(-10_000.0, 0.0, width, 0.0));
        document
            .append_child(document.body(), container)
            .expect("attach container");
        container
    }

    fn child(document: &mut Document, parent: NodeId, element: ElementData, layout: LayoutBox) -> NodeId {
        let id = document.create_element(element);
        document.set_layout(id, layout);
        document.append_child(parent, id).expect("append child");
        id
    }

    fn red_png() -> Vec<u8> {
        let image = ImageBuffer::from_pixel(8, 8, Rgb([255u8, 0, 0]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .expect("encode png");
        bytes
    }

    #[test]
    fn paints_solid_backgrounds_at_scale() {
        let mut document = Document::new();
        let container = container(&mut document, 100.0);
        child(
            &mut document,
            container,
            ElementData::new("div").with_style(exact(Background::Solid {
                color: Color::rgb(200, 0, 0),
            })),
            LayoutBox::new(-10_000.0, 10.0, 50.0, 20.0),
        );

        let raster = SkiaRasterizer::without_text()
            .rasterize_content(&document, container, 40.0, 2.0)
            .expect("rasterize");
        assert_eq!(raster.dimensions(), (200, 80));
        assert_eq!(raster.get_pixel(10, 30), &Rgb([200, 0, 0]));
        assert_eq!(raster.get_pixel(150, 30), &Rgb([255, 255, 255]));
        assert_eq!(raster.get_pixel(10, 5), &Rgb([255, 255, 255]));
    }

    #[test]
    fn economy_print_mode_drops_backgrounds() {
        let mut document = Document::new();
        let container = container(&mut document, 100.0);
        child(
            &mut document,
            container,
            ElementData::new("div").with_style(ComputedStyle {
                background: Background::Solid {
                    color: Color::rgb(0, 0, 200),
                },
                ..ComputedStyle::default()
            }),
            LayoutBox::new(-10_000.0, 0.0, 100.0, 40.0),
        );
        let raster = SkiaRasterizer::without_text()
            .rasterize_content(&document, container, 40.0, 1.0)
            .expect("rasterize");
        assert_eq!(raster.get_pixel(50, 20), &Rgb([255, 255, 255]));
    }

    #[test]
    fn page_anchored_blocks_are_left_out_of_content() {
        let mut document = Document::new();
        let container = container(&mut document, 100.0);
        child(
            &mut document,
            container,
            ElementData::new("footer").with_style(ComputedStyle {
                position: Positioning::PageAnchored,
                ..exact(Background::Solid { color: Color::BLACK })
            }),
            LayoutBox::new(-10_000.0, 0.0, 100.0, 40.0),
        );
        let rasterizer = SkiaRasterizer::without_text();
        let content = rasterizer
            .rasterize_content(&document, container, 40.0, 1.0)
            .expect("rasterize content");
        assert_eq!(content.get_pixel(50, 20), &Rgb([255, 255, 255]));

        let footer = document.children(container)[0];
        let strip = rasterizer
            .rasterize_footer(&document, footer, 1, 2, 1.0)
            .expect("rasterize footer");
        assert_eq!(strip.dimensions(), (100, 40));
        assert_eq!(strip.get_pixel(50, 20), &Rgb([0, 0, 0]));
    }

    #[test]
    fn circular_images_are_clipped_and_bordered() {
        let mut document = Document::new();
        let container = container(&mut document, 100.0);
        child(
            &mut document,
            container,
            ElementData::new("img")
                .with_image(ImageSource::from_bytes(red_png()))
                .with_style(ComputedStyle {
                    border_radius: Radius::Percent(50.0),
                    clip_content: true,
                    border: Some(Border::new(4.0, Color::rgb(0, 0, 255))),
                    box_sizing: BoxSizing::BorderBox,
                    ..exact(Background::Transparent)
                }),
            LayoutBox::new(-10_000.0, 0.0, 100.0, 100.0),
        );
        let raster = SkiaRasterizer::without_text()
            .rasterize_content(&document, container, 100.0, 1.0)
            .expect("rasterize");
        let center = raster.get_pixel(50, 50);
        assert!(center[0] > 240 && center[1] < 20, "expected red photo, got {center:?}");
        assert_eq!(raster.get_pixel(2, 2), &Rgb([255, 255, 255]));
        let ring = raster.get_pixel(50, 1);
        assert!(ring[2] > 200 && ring[0] < 60, "expected blue border, got {ring:?}");
    }

    #[test]
    fn undecodable_images_are_skipped() {
        let mut document = Document::new();
        let container = container(&mut document, 20.0);
        child(
            &mut document,
            container,
            ElementData::new("img").with_image(ImageSource::from_bytes(b"nope".to_vec())),
            LayoutBox::new(-10_000.0, 0.0, 20.0, 20.0),
        );
        let raster = SkiaRasterizer::without_text()
            .rasterize_content(&document, container, 20.0, 1.0)
            .expect("broken images must not fail rasterization");
        assert_eq!(raster.get_pixel(10, 10), &Rgb([255, 255, 255]));
    }

    #[test]
    fn zero_width_container_fails_to_allocate() {
        let mut document = Document::new();
        let container = container(&mut document, 0.0);
        let error = SkiaRasterizer::without_text()
            .rasterize_content(&document, container, 100.0, 2.0)
            .unwrap_err();
        assert!(matches!(error, RasterError::Canvas { width: 0, .. }));
    }

    #[test]
    fn wrapped_text_is_drawn_inside_its_box() {
        let Ok(fonts) = fonts::default_font_set() else {
            eprintln!("skipping text rasterization: no fonts found");
            return;
        };
        let mut document = Document::new();
        let container = container(&mut document, 200.0);
        let text_box = LayoutBox::new(-9_990.0, 20.0, 120.0, 100.0);
        let paragraph = child(&mut document, container, ElementData::new("p"), text_box);
        let text = document.create_text("Engines weave algebra as looms weave flowers");
        document.set_layout(text, text_box);
        document.append_child(paragraph, text).expect("append text");

        let raster = SkiaRasterizer::new(Some(fonts))
            .rasterize_content(&document, container, 140.0, 1.0)
            .expect("rasterize");
        let dark: Vec<(u32, u32)> = raster
            .enumerate_pixels()
            .filter(|(_, _, pixel)| pixel[0] < 128)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(dark.len() > 100, "expected glyph pixels, found {}", dark.len());

        let (min_x, max_x) = dark.iter().fold((u32::MAX, 0), |(lo, hi), (x, _)| (lo.min(*x), hi.max(*x)));
        let (min_y, max_y) = dark.iter().fold((u32::MAX, 0), |(lo, hi), (_, y)| (lo.min(*y), hi.max(*y)));
        assert!(min_x >= 8 && max_x <= 132, "glyphs escape the box horizontally: {min_x}..{max_x}");
        assert!(min_y >= 20 && max_y <= 122, "glyphs escape the box vertically: {min_y}..{max_y}");

        let line_height = ComputedStyle::default().font_size * ComputedStyle::default().line_height;
        assert!(
            (max_y - min_y) as f32 > line_height,
            "text should wrap onto several lines, spans {min_y}..{max_y}"
        );
    }

    #[test]
    fn blending_respects_coverage() {
        let mut pixmap = Pixmap::new(2, 1).expect("pixmap");
        pixmap.fill(tiny_skia::Color::WHITE);
        blend_pixel(&mut pixmap, 0, 0, Color::BLACK, 1.0);
        blend_pixel(&mut pixmap, 1, 0, Color::BLACK, 0.5);
        blend_pixel(&mut pixmap, 5, 0, Color::BLACK, 1.0);
        let pixels = pixmap.pixels();
        assert_eq!(pixels[0].red(), 0);
        assert_eq!(pixels[1].red(), 128);
        assert_eq!(pixels[1].alpha(), 255);
    }
}
