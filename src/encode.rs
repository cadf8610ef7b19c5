//! PDF encoding of rasterized pages.
//!
//! Every page becomes one A4 portrait page holding a single JPEG (DCT) compressed
//! image. The content slice and the footer strip are composed into one raster that
//! spans the printable area, content at the top and footer at the bottom. Image
//! resolution is derived from the raster width so that it exactly spans the
//! printable width.

use std::io::BufWriter;

use image::{imageops, DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use log::debug;
use printpdf::{
    ColorBits, ColorSpace, Image, ImageFilter, ImageXObject, Mm, PdfDocument,
    PdfLayerReference, Px,
};
use thiserror::Error;

use crate::config::{PageLayout, MM_PER_INCH};

const LAYER_NAME: &str = "Page";
const PAPER: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("nothing to encode: the export produced no pages")]
    NoPages,
    #[error("page {page} has an empty raster")]
    EmptyRaster { page: usize },
    #[error("failed to compress page {page} as JPEG")]
    Jpeg {
        page: usize,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write the PDF document: {0}")]
    Pdf(String),
}

/// Rasters of a single physical page.
#[derive(Clone, Debug)]
pub struct PageRaster {
    pub content: RgbImage,
    pub footer: Option<RgbImage>,
}

impl PageRaster {
    pub fn new(content: RgbImage) -> Self {
        Self {
            content,
            footer: None,
        }
    }

    pub fn with_footer(mut self, footer: RgbImage) -> Self {
        self.footer = Some(footer);
        self
    }

    /// Pixels per inch at which the content spans the printable width.
    fn dpi(&self, layout: &PageLayout) -> f64 {
        self.content.width() as f64 / (layout.printable_width_mm() / MM_PER_INCH)
    }

    /// Flattens content and footer into the single image placed on the page.
    ///
    /// Without a footer the content is returned as is. With one, the canvas covers
    /// the printable height so the footer lands on the bottom margin.
    pub fn compose(&self, layout: &PageLayout) -> RgbImage {
        let Some(footer) = &self.footer else {
            return self.content.clone();
        };
        let rows = (layout.printable_height_mm() / MM_PER_INCH * self.dpi(layout)).round() as u32;
        let height = rows.max(self.content.height() + footer.height());
        let mut canvas = RgbImage::from_pixel(self.content.width(), height, PAPER);
        imageops::replace(&mut canvas, &self.content, 0, 0);
        imageops::replace(&mut canvas, footer, 0, height - footer.height());
        canvas
    }
}

/// Encodes `pages` into a PDF document titled `title`.
pub fn encode_pages(
    pages: &[PageRaster],
    layout: &PageLayout,
    quality: u8,
    title: &str,
) -> Result<Vec<u8>, EncodeError> {
    if pages.is_empty() {
        return Err(EncodeError::NoPages);
    }

    let width = Mm(layout.format.width_mm);
    let height = Mm(layout.format.height_mm);
    let (document, first_page, first_layer) = PdfDocument::new(title, width, height, LAYER_NAME);

    for (index, page) in pages.iter().enumerate() {
        let number = index + 1;
        if page.content.width() == 0 || page.content.height() == 0 {
            return Err(EncodeError::EmptyRaster { page: number });
        }
        let layer = if index == 0 {
            document.get_page(first_page).get_layer(first_layer)
        } else {
            let (page_index, layer_index) =
                document.add_page(width, height, format!("{LAYER_NAME} {number}"));
            document.get_page(page_index).get_layer(layer_index)
        };

        let raster = page.compose(layout);
        let dpi = page.dpi(layout);
        place_raster(&raster, number, quality, dpi, layout, &layer)?;
        debug!(
            "encoded page {} ({}x{} px at {:.1} dpi)",
            number,
            raster.width(),
            raster.height(),
            dpi
        );
    }

    let mut writer = BufWriter::new(Vec::new());
    document
        .save(&mut writer)
        .map_err(|err| EncodeError::Pdf(err.to_string()))?;
    writer
        .into_inner()
        .map_err(|err| EncodeError::Pdf(err.error().to_string()))
}

/// Places `raster` on `layer`, its top edge on the top margin.
fn place_raster(
    raster: &RgbImage,
    page: usize,
    quality: u8,
    dpi: f64,
    layout: &PageLayout,
    layer: &PdfLayerReference,
) -> Result<(), EncodeError> {
    let height_mm = raster.height() as f64 / dpi * MM_PER_INCH;
    let y = layout.format.height_mm - layout.margins.top - height_mm;

    let image = Image::from(ImageXObject {
        width: Px(raster.width() as usize),
        height: Px(raster.height() as usize),
        color_space: ColorSpace::Rgb,
        bits_per_component: ColorBits::Bit8,
        interpolate: false,
        image_data: jpeg_bytes(raster, page, quality)?,
        image_filter: Some(ImageFilter::DCT),
        clipping_bbox: None,
    });
    image.add_to_layer(
        layer.clone(),
        Some(Mm(layout.margins.left)),
        Some(Mm(y)),
        None,
        None,
        None,
        Some(dpi),
    );
    Ok(())
}

fn jpeg_bytes(raster: &RgbImage, page: usize, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(raster.clone())
        .write_to(&mut bytes, ImageOutputFormat::Jpeg(quality.clamp(1, 100)))
        .map_err(|source| EncodeError::Jpeg { page, source })?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportConfig, PageFormat};
    use image::Rgb;

    fn layout() -> PageLayout {
        ExportConfig::default().page_layout(PageFormat::A4)
    }

    fn page(height: u32) -> PageRaster {
        PageRaster::new(RgbImage::from_pixel(190, height, Rgb([30, 60, 90])))
            .with_footer(RgbImage::from_pixel(190, 8, Rgb([255, 255, 255])))
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            encode_pages(&[], &layout(), 90, "Empty"),
            Err(EncodeError::NoPages)
        ));
    }

    #[test]
    fn empty_rasters_are_rejected() {
        let pages = [PageRaster::new(RgbImage::new(0, 0))];
        assert!(matches!(
            encode_pages(&pages, &layout(), 90, "Broken"),
            Err(EncodeError::EmptyRaster { page: 1 })
        ));
    }

    #[test]
    fn produces_one_pdf_page_per_raster() {
        let bytes = encode_pages(&[page(260), page(120), page(40)], &layout(), 80, "Pages")
            .expect("encode pdf");
        assert!(bytes.starts_with(b"%PDF"));

        let document = lopdf::Document::load_mem(&bytes).expect("parse pdf");
        assert_eq!(document.get_pages().len(), 3);
    }

    #[test]
    fn footer_is_composed_onto_the_bottom_of_the_page_image() {
        let layout = layout();
        let composed = PageRaster::new(RgbImage::from_pixel(190, 260, Rgb([30, 60, 90])))
            .with_footer(RgbImage::from_pixel(190, 8, Rgb([200, 0, 0])))
            .compose(&layout);
        let dpi = 190.0 / (layout.printable_width_mm() / MM_PER_INCH);
        let rows = (layout.printable_height_mm() / MM_PER_INCH * dpi).round() as u32;
        assert_eq!(composed.dimensions(), (190, rows));
        assert_eq!(composed.get_pixel(5, 0), &Rgb([30, 60, 90]));
        assert_eq!(composed.get_pixel(5, 259), &Rgb([30, 60, 90]));
        assert_eq!(composed.get_pixel(5, 260), &PAPER);
        assert_eq!(composed.get_pixel(5, rows - 9), &PAPER);
        assert_eq!(composed.get_pixel(5, rows - 8), &Rgb([200, 0, 0]));
        assert_eq!(composed.get_pixel(5, rows - 1), &Rgb([200, 0, 0]));

        let bare = PageRaster::new(RgbImage::from_pixel(190, 40, Rgb([1, 2, 3])));
        assert_eq!(bare.compose(&layout).dimensions(), (190, 40));
    }

    #[test]
    fn each_page_holds_a_single_image() {
        let bytes = encode_pages(&[page(260), page(120)], &layout(), 80, "Single")
            .expect("encode pdf");
        let document = lopdf::Document::load_mem(&bytes).expect("parse pdf");
        let images = document
            .objects
            .values()
            .filter(|object| match object {
                lopdf::Object::Stream(stream) => stream
                    .dict
                    .get(b"Subtype")
                    .and_then(lopdf::Object::as_name)
                    .map(|name| name == b"Image")
                    .unwrap_or(false),
                _ => false,
            })
            .count();
        assert_eq!(images, 2);
    }

    #[test]
    fn page_images_are_dct_compressed() {
        let bytes = encode_pages(&[page(100)], &layout(), 90, "Jpeg").expect("encode pdf");
        let needle = b"/DCTDecode";
        assert!(bytes.windows(needle.len()).any(|window| window == needle));
    }
}
