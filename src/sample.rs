//! A laid-out sample resume.
//!
//! Used by the `sample` CLI command and the integration tests. Layout is computed
//! with a simple top-down cursor: every block starts below the previous one and text
//! heights are estimated from an average glyph width.

use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};

use crate::dom::{Document, DomError, ElementData, ImageSource, LayoutBox, NodeId};
use crate::export::DocumentMetadata;
use crate::style::{Background, Color, ComputedStyle, FontWeight};

const PAGE_WIDTH: f32 = 700.0;
const PADDING: f32 = 24.0;
const AVATAR_SIZE: f32 = 96.0;
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

const ROLES: [(&str, &str); 4] = [
    ("Senior Software Engineer", "Analytical Engines Ltd · 2021 – present"),
    ("Software Engineer", "Difference Works · 2018 – 2021"),
    ("Research Assistant", "Royal Institution · 2016 – 2018"),
    ("Technical Writer", "Notes & Translations · 2014 – 2016"),
];

const ACHIEVEMENTS: [&str; 3] = [
    "Designed the batch scheduling pipeline that cut nightly processing time by 40%.",
    "Mentored four engineers and introduced design reviews across the platform team.",
    "Replaced a hand-rolled report generator with a typed, tested rendering service.",
];

const SKILLS: [&str; 6] = ["Rust", "Distributed systems", "PostgreSQL", "Tokio", "PDF tooling", "Technical writing"];

/// Knobs for [`build_sample_resume`].
#[derive(Clone, Debug)]
pub struct SampleOptions {
    pub owner: String,
    pub email: String,
    pub entries: usize,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            owner: "Ada Lovelace".to_owned(),
            email: "ada@example.com".to_owned(),
            entries: 4,
        }
    }
}

/// A sample document together with the metadata of its owner.
#[derive(Debug)]
pub struct SampleResume {
    pub document: Document,
    pub metadata: DocumentMetadata,
    pub root: NodeId,
}

struct Cursor<'d> {
    document: &'d mut Document,
    y: f32,
}

impl Cursor<'_> {
    fn element(
        &mut self,
        parent: NodeId,
        element: ElementData,
        layout: LayoutBox,
    ) -> Result<NodeId, DomError> {
        let id = self.document.create_element(element);
        self.document.set_layout(id, layout);
        self.document.append_child(parent, id)?;
        Ok(id)
    }

    /// Appends a text block below the cursor and returns its element.
    fn text_block(
        &mut self,
        parent: NodeId,
        tag: &str,
        text: &str,
        style: ComputedStyle,
        x: f32,
        width: f32,
    ) -> Result<NodeId, DomError> {
        let height = estimated_text_height(text, &style, width);
        let layout = LayoutBox::new(x, self.y, width, height);
        let block = self.element(parent, ElementData::new(tag).with_style(style), layout)?;
        let text = self.document.create_text(text);
        self.document.set_layout(text, layout);
        self.document.append_child(block, text)?;
        self.y += height;
        Ok(block)
    }

    /// Extends `node` down to the cursor.
    fn close(&mut self, node: NodeId, bottom_padding: f32) {
        self.y += bottom_padding;
        if let Some(mut layout) = self.document.layout(node) {
            layout.height = self.y - layout.y;
            self.document.set_layout(node, layout);
        }
    }
}

fn estimated_text_height(text: &str, style: &ComputedStyle, width: f32) -> f32 {
    let per_line = (width / (style.font_size * AVERAGE_GLYPH_WIDTH)).max(1.0).floor();
    let lines = (text.chars().count() as f32 / per_line).ceil().max(1.0);
    lines * style.font_size * style.line_height
}

fn text_style(font_size: f32, font_weight: FontWeight, color: Color) -> ComputedStyle {
    ComputedStyle {
        font_size,
        font_weight,
        color,
        ..ComputedStyle::default()
    }
}

/// Renders a round-friendly gradient portrait as PNG bytes.
fn portrait_png() -> Vec<u8> {
    let size = 128u32;
    let image = ImageBuffer::from_fn(size, size, |x, y| {
        let shade = ((x + y) * 255 / (2 * size)) as u8;
        Rgb([90u8.saturating_add(shade / 2), 120, 200u8.saturating_sub(shade / 3)])
    });
    let mut bytes = Vec::new();
    match DynamicImage::ImageRgb8(image).write_to(&mut bytes, ImageOutputFormat::Png) {
        Ok(()) => bytes,
        Err(err) => {
            log::warn!("failed to encode sample portrait: {}", err);
            Vec::new()
        }
    }
}

/// Builds a resume for `template` with `options.entries` experience entries.
pub fn build_sample_resume(template: &str, options: &SampleOptions) -> Result<SampleResume, DomError> {
    let mut document = Document::new();
    let body = document.body();
    let root = document.create_element(
        ElementData::new("main")
            .with_class("resume")
            .with_class(format!("template-{template}"))
            .with_attribute("data-template-root", template)
            .with_style(ComputedStyle {
                margin: 32.0,
                background: Background::Solid { color: Color::WHITE },
                ..ComputedStyle::default()
            }),
    );
    document.set_layout(root, LayoutBox::new(32.0, 32.0, PAGE_WIDTH, 0.0));
    document.append_child(body, root)?;

    let mut cursor = Cursor {
        document: &mut document,
        y: 32.0,
    };
    let left = 32.0 + PADDING;
    let inner = PAGE_WIDTH - 2.0 * PADDING;

    let header = cursor.element(
        root,
        ElementData::new("header")
            .with_class("resume-header")
            .with_style(ComputedStyle {
                background: Background::LinearGradient {
                    from: Color::rgb(0x1e, 0x3a, 0x8a),
                    to: Color::rgb(0x3b, 0x82, 0xf6),
                },
                ..ComputedStyle::default()
            }),
        LayoutBox::new(32.0, cursor.y, PAGE_WIDTH, 0.0),
    )?;
    cursor.element(
        header,
        ElementData::new("img")
            .with_class("avatar")
            .with_attribute("alt", options.owner.as_str())
            .with_image(ImageSource::from_bytes(portrait_png())),
        LayoutBox::new(32.0 + PAGE_WIDTH - PADDING - AVATAR_SIZE, cursor.y + PADDING, AVATAR_SIZE, AVATAR_SIZE + 6.5),
    )?;
    cursor.y += PADDING;
    let header_text = inner - AVATAR_SIZE - PADDING;
    cursor.text_block(
        header,
        "h1",
        &options.owner,
        text_style(30.0, FontWeight::Bold, Color::WHITE),
        left,
        header_text,
    )?;
    for (icon, line) in [("mail", options.email.as_str()), ("phone", "+44 20 7946 0000")] {
        cursor.element(
            header,
            ElementData::new("span")
                .with_class("icon")
                .with_attribute("data-icon", icon)
                .with_style(ComputedStyle {
                    background: Background::Solid {
                        color: Color::rgba(255, 255, 255, 200),
                    },
                    ..ComputedStyle::default()
                }),
            LayoutBox::new(left, cursor.y + 3.3, 11.6, 11.6),
        )?;
        cursor.text_block(
            header,
            "p",
            line,
            text_style(12.0, FontWeight::Normal, Color::WHITE),
            left + 18.0,
            header_text - 18.0,
        )?;
    }
    cursor.y = cursor.y.max(32.0 + PADDING + AVATAR_SIZE + 6.5);
    cursor.close(header, PADDING);

    if template == "oslo" {
        let sidebar = cursor.element(
            root,
            ElementData::new("aside").with_class("sidebar"),
            LayoutBox::new(32.0, cursor.y, PAGE_WIDTH, 0.0),
        )?;
        cursor.y += 12.0;
        cursor.text_block(
            sidebar,
            "p",
            "Engineer focused on dependable data pipelines and document tooling.",
            text_style(12.0, FontWeight::Normal, Color::rgb(0x37, 0x41, 0x51)),
            left,
            inner,
        )?;
        cursor.close(sidebar, 12.0);
    }

    let section_style = text_style(18.0, FontWeight::Bold, Color::rgb(0x11, 0x18, 0x27));
    let body_style = text_style(12.0, FontWeight::Normal, Color::rgb(0x37, 0x41, 0x51));

    let experience = section(&mut cursor, root, "Experience", &section_style, left, inner)?;
    for index in 0..options.entries {
        let (role, company) = ROLES[index % ROLES.len()];
        let entry = cursor.element(
            experience,
            ElementData::new("div")
                .with_class("entry")
                .with_class("experience-item"),
            LayoutBox::new(left, cursor.y, inner, 0.0),
        )?;
        cursor.text_block(entry, "h3", role, text_style(14.0, FontWeight::Bold, Color::BLACK), left, inner)?;
        cursor.text_block(entry, "p", company, body_style.clone(), left, inner)?;
        let list = cursor.element(entry, ElementData::new("ul"), LayoutBox::new(left, cursor.y, inner, 0.0))?;
        for achievement in ACHIEVEMENTS {
            cursor.text_block(list, "li", achievement, body_style.clone(), left + 16.0, inner - 16.0)?;
        }
        cursor.close(list, 0.0);
        cursor.close(entry, 14.0);
    }
    cursor.close(experience, 8.0);

    let education = section(&mut cursor, root, "Education", &section_style, left, inner)?;
    for (degree, school) in [
        ("MSc Mathematics", "University of London · 2014"),
        ("BSc Mathematics", "University of London · 2012"),
    ] {
        let item = cursor.element(
            education,
            ElementData::new("div").with_class("education-item"),
            LayoutBox::new(left, cursor.y, inner, 0.0),
        )?;
        cursor.text_block(item, "h3", degree, text_style(14.0, FontWeight::Bold, Color::BLACK), left, inner)?;
        cursor.text_block(item, "p", school, body_style.clone(), left, inner)?;
        cursor.close(item, 10.0);
    }
    cursor.close(education, 8.0);

    let skills = section(&mut cursor, root, "Skills", &section_style, left, inner)?;
    let list = cursor.element(skills, ElementData::new("ul"), LayoutBox::new(left, cursor.y, inner, 0.0))?;
    for skill in SKILLS {
        cursor.text_block(list, "li", skill, body_style.clone(), left + 16.0, inner - 16.0)?;
    }
    cursor.close(list, 0.0);
    cursor.close(skills, 0.0);

    cursor.close(root, PADDING);

    Ok(SampleResume {
        document,
        metadata: DocumentMetadata::new(options.owner.as_str()).with_email(options.email.as_str()),
        root,
    })
}

fn section(
    cursor: &mut Cursor<'_>,
    root: NodeId,
    title: &str,
    heading: &ComputedStyle,
    left: f32,
    width: f32,
) -> Result<NodeId, DomError> {
    let section = cursor.element(
        root,
        ElementData::new("section").with_attribute("data-section", title),
        LayoutBox::new(left, cursor.y, width, 0.0),
    )?;
    cursor.text_block(section, "h2", title, heading.clone(), left, width)?;
    cursor.y += 6.0;
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    #[test]
    fn sample_has_root_sections_and_entries() {
        let sample = build_sample_resume("classic", &SampleOptions::default()).expect("sample");
        let document = &sample.document;
        let body = document.body();
        assert_eq!(
            document.query(body, &Selector::attribute("data-template-root")),
            Some(sample.root)
        );
        assert_eq!(document.query_all(body, &Selector::attribute("data-section")).len(), 3);
        assert_eq!(document.query_all(body, &Selector::class("entry")).len(), 4);
        assert_eq!(sample.metadata.contact(), "ada@example.com");
    }

    #[test]
    fn blocks_are_stacked_inside_the_root() {
        let options = SampleOptions {
            entries: 9,
            ..SampleOptions::default()
        };
        let sample = build_sample_resume("oslo", &options).expect("sample");
        let document = &sample.document;
        let root = document.layout(sample.root).expect("root layout");
        assert!(root.height > 1_200.0);

        let entries: Vec<_> = document
            .query_all(sample.root, &Selector::class("entry"))
            .into_iter()
            .filter_map(|entry| document.layout(entry))
            .collect();
        assert_eq!(entries.len(), 9);
        assert!(entries.windows(2).all(|pair| pair[0].bottom() <= pair[1].y));
        assert!(entries.iter().all(|entry| entry.bottom() <= root.bottom()));
        assert!(document.query(sample.root, &Selector::class("sidebar")).is_some());
    }
}
