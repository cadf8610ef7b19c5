//! Computed styles and the print-override stylesheet.
//!
//! Elements in the render tree carry an already computed [`ComputedStyle`]. The export
//! pipeline never re-runs layout; instead it injects a small set of typed [`StyleRule`]s
//! into the detached render copy and cascades them over the matching elements before
//! rasterization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dom::{Document, NodeId};
use crate::selector::Selector;

/// Class attached to the `style` element injected into the render copy.
pub const OVERRIDE_STYLE_CLASS: &str = "export-print-overrides";

/// Error returned when a colour string cannot be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid colour `{0}`, expected #rgb, #rrggbb or #rrggbbaa")]
pub struct ColorParseError(String);

/// An sRGB colour with straight (non premultiplied) alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    /// Creates an opaque colour.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Creates a colour with an explicit alpha channel.
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn is_opaque(self) -> bool {
        self.a == 255
    }

    /// Linear interpolation between two colours, `t` in `0.0..=1.0`.
    pub fn mix(self, other: Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Color::rgba(
            lerp(self.r, other.r),
            lerp(self.g, other.g),
            lerp(self.b, other.b),
            lerp(self.a, other.a),
        )
    }

    /// Composites the colour over `backdrop`, producing an opaque colour.
    pub fn over(self, backdrop: Color) -> Color {
        let alpha = self.a as f32 / 255.0;
        let blend = |fg: u8, bg: u8| (fg as f32 * alpha + bg as f32 * (1.0 - alpha)).round() as u8;
        Color::rgb(
            blend(self.r, backdrop.r),
            blend(self.g, backdrop.g),
            blend(self.b, backdrop.b),
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let error = || ColorParseError(value.to_owned());
        let hex = value.trim().strip_prefix('#').ok_or_else(error)?;
        if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(error());
        }
        let channel = |index: usize| u8::from_str_radix(&hex[index..index + 2], 16);
        let short = |index: usize| u8::from_str_radix(&hex[index..index + 1], 16).map(|v| v * 17);
        let parsed = match hex.len() {
            3 => (short(0), short(1), short(2), Ok(255)),
            6 => (channel(0), channel(2), channel(4), Ok(255)),
            8 => (channel(0), channel(2), channel(4), channel(6)),
            _ => return Err(error()),
        };
        match parsed {
            (Ok(r), Ok(g), Ok(b), Ok(a)) => Ok(Color::rgba(r, g, b, a)),
            _ => Err(error()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_opaque() {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Background fill of an element box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Background {
    #[default]
    Transparent,
    Solid {
        color: Color,
    },
    /// Top to bottom linear gradient.
    LinearGradient {
        from: Color,
        to: Color,
    },
}

/// Uniform border around an element box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Border {
    pub width: f32,
    pub color: Color,
}

impl Border {
    pub fn new(width: f32, color: Color) -> Self {
        Self { width, color }
    }
}

/// Corner radius, either absolute or relative to the shorter box side.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Radius {
    Px(f32),
    Percent(f32),
}

impl Radius {
    /// Resolves the radius for a box of the given size.
    pub fn resolve(self, width: f32, height: f32) -> f32 {
        let limit = width.min(height) / 2.0;
        match self {
            Radius::Px(px) => px.clamp(0.0, limit),
            Radius::Percent(percent) => (width.min(height) * percent / 100.0).clamp(0.0, limit),
        }
    }
}

impl Default for Radius {
    fn default() -> Self {
        Radius::Px(0.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxSizing {
    #[default]
    ContentBox,
    BorderBox,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakInside {
    #[default]
    Auto,
    Avoid,
}

/// Mirrors `print-color-adjust`: economy output drops backgrounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintColorAdjust {
    #[default]
    Economy,
    Exact,
}

/// Edge rendering for backgrounds, borders and vector shapes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRendering {
    #[default]
    Smooth,
    Crisp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Positioning {
    #[default]
    Flow,
    /// Repeated at the bottom of every physical page instead of flowing with content.
    PageAnchored,
}

/// Style values resolved for an element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputedStyle {
    pub display: bool,
    pub background: Background,
    pub color: Color,
    pub border: Option<Border>,
    pub border_radius: Radius,
    pub clip_content: bool,
    pub margin: f32,
    pub box_sizing: BoxSizing,
    pub font_size: f32,
    pub font_weight: FontWeight,
    pub line_height: f32,
    pub opacity: f32,
    pub break_inside: BreakInside,
    pub print_color_adjust: PrintColorAdjust,
    pub edges: EdgeRendering,
    pub position: Positioning,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: true,
            background: Background::Transparent,
            color: Color::BLACK,
            border: None,
            border_radius: Radius::default(),
            clip_content: false,
            margin: 0.0,
            box_sizing: BoxSizing::ContentBox,
            font_size: 14.0,
            font_weight: FontWeight::Normal,
            line_height: 1.3,
            opacity: 1.0,
            break_inside: BreakInside::Auto,
            print_color_adjust: PrintColorAdjust::Economy,
            edges: EdgeRendering::Smooth,
            position: Positioning::Flow,
        }
    }
}

impl ComputedStyle {
    /// Scales every length in the style by `factor`.
    pub fn scale_lengths(&mut self, factor: f32) {
        self.font_size *= factor;
        self.margin *= factor;
        if let Some(border) = &mut self.border {
            border.width *= factor;
        }
        if let Radius::Px(px) = &mut self.border_radius {
            *px *= factor;
        }
    }
}

/// A single typed declaration of a style rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Declaration {
    Margin(f32),
    BoxSizing(BoxSizing),
    PrintColorAdjust(PrintColorAdjust),
    Edges(EdgeRendering),
    BreakInside(BreakInside),
    Position(Positioning),
}

impl Declaration {
    fn apply(self, style: &mut ComputedStyle) {
        match self {
            Declaration::Margin(margin) => style.margin = margin,
            Declaration::BoxSizing(sizing) => style.box_sizing = sizing,
            Declaration::PrintColorAdjust(adjust) => style.print_color_adjust = adjust,
            Declaration::Edges(edges) => style.edges = edges,
            Declaration::BreakInside(rule) => style.break_inside = rule,
            Declaration::Position(position) => style.position = position,
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Margin(margin) => write!(f, "margin: {margin}px"),
            Declaration::BoxSizing(BoxSizing::BorderBox) => f.write_str("box-sizing: border-box"),
            Declaration::BoxSizing(BoxSizing::ContentBox) => {
                f.write_str("box-sizing: content-box")
            }
            Declaration::PrintColorAdjust(PrintColorAdjust::Exact) => {
                f.write_str("print-color-adjust: exact; -webkit-print-color-adjust: exact")
            }
            Declaration::PrintColorAdjust(PrintColorAdjust::Economy) => {
                f.write_str("print-color-adjust: economy")
            }
            Declaration::Edges(EdgeRendering::Crisp) => f.write_str("shape-rendering: crispEdges"),
            Declaration::Edges(EdgeRendering::Smooth) => {
                f.write_str("shape-rendering: geometricPrecision")
            }
            Declaration::BreakInside(BreakInside::Avoid) => {
                f.write_str("break-inside: avoid; page-break-inside: avoid")
            }
            Declaration::BreakInside(BreakInside::Auto) => f.write_str("break-inside: auto"),
            Declaration::Position(Positioning::PageAnchored) => {
                f.write_str("position: fixed; bottom: 0")
            }
            Declaration::Position(Positioning::Flow) => f.write_str("position: static"),
        }
    }
}

/// A selector together with the declarations it forces on matching elements.
#[derive(Clone, Debug, PartialEq)]
pub struct StyleRule {
    selector: Selector,
    declarations: Vec<Declaration>,
}

impl StyleRule {
    pub fn new(selector: Selector, declarations: impl Into<Vec<Declaration>>) -> Self {
        Self {
            selector,
            declarations: declarations.into(),
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }
}

/// An ordered list of rules; later rules win.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stylesheet {
    rules: Vec<StyleRule>,
}

impl Stylesheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: StyleRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[StyleRule] {
        &self.rules
    }

    /// Rules injected into every render copy before rasterization.
    ///
    /// They neutralise margins and box sizing differences, keep colours and crisp
    /// edges in print output, and mark atomic content units as unbreakable.
    pub fn print_overrides() -> Self {
        let atomic = ["h1", "h2", "h3", "h4", "h5", "h6", "li"]
            .into_iter()
            .map(Selector::tag)
            .chain(
                ["entry", "experience-item", "education-item", "project-item"]
                    .into_iter()
                    .map(Selector::class),
            )
            .fold(Selector::attribute("data-atomic"), Selector::or);

        Self::new()
            .with_rule(StyleRule::new(
                Selector::any(),
                [
                    Declaration::Margin(0.0),
                    Declaration::BoxSizing(BoxSizing::BorderBox),
                    Declaration::Edges(EdgeRendering::Crisp),
                    Declaration::PrintColorAdjust(PrintColorAdjust::Exact),
                ],
            ))
            .with_rule(StyleRule::new(
                atomic,
                [Declaration::BreakInside(BreakInside::Avoid)],
            ))
    }

    /// Cascades the rules over `root` and all its element descendants.
    ///
    /// Returns the number of elements that matched at least one rule.
    pub fn apply(&self, document: &mut Document, root: NodeId) -> usize {
        let mut touched = 0;
        for node in document.descendants(root) {
            let Some(element) = document.element_mut(node) else {
                continue;
            };
            let mut matched = false;
            for rule in &self.rules {
                if rule.selector.matches(element) {
                    matched = true;
                    let style = element.style_mut();
                    for declaration in &rule.declarations {
                        declaration.apply(style);
                    }
                }
            }
            touched += usize::from(matched);
        }
        touched
    }

    /// Serializes the sheet in CSS syntax for the injected `style` element.
    pub fn to_css(&self) -> String {
        let mut css = String::new();
        for rule in &self.rules {
            css.push_str(&rule.selector.to_string());
            css.push_str(" {");
            for declaration in &rule.declarations {
                css.push(' ');
                css.push_str(&declaration.to_string());
                css.push_str(" !important;");
            }
            css.push_str(" }\n");
        }
        css
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, ElementData, LayoutBox};

    #[test]
    fn parses_and_formats_colours() {
        assert_eq!("#fff".parse::<Color>(), Ok(Color::WHITE));
        assert_eq!("#1f2937".parse::<Color>(), Ok(Color::rgb(0x1f, 0x29, 0x37)));
        assert_eq!(
            "#00000080".parse::<Color>(),
            Ok(Color::rgba(0, 0, 0, 0x80))
        );
        assert!("1f2937".parse::<Color>().is_err());
        assert!("#12345".parse::<Color>().is_err());
        assert_eq!(Color::rgba(1, 2, 3, 4).to_string(), "#01020304");
    }

    #[test]
    fn composites_translucent_colours_over_white() {
        let half_black = Color::rgba(0, 0, 0, 128);
        let composited = half_black.over(Color::WHITE);
        assert!(composited.is_opaque());
        assert_eq!(composited.r, 127);
    }

    #[test]
    fn percent_radius_resolves_against_shorter_side() {
        assert_eq!(Radius::Percent(50.0).resolve(80.0, 60.0), 30.0);
        assert_eq!(Radius::Px(100.0).resolve(20.0, 20.0), 10.0);
    }

    #[test]
    fn print_overrides_mark_atomic_units() {
        let mut document = Document::new();
        let root = document.create_element(ElementData::new("section"));
        let heading = document.create_element(ElementData::new("h2"));
        let entry = document.create_element(ElementData::new("div").with_class("entry"));
        let plain = document.create_element(ElementData::new("p"));
        for child in [heading, entry, plain] {
            document.append_child(root, child).expect("append");
            document.set_layout(child, LayoutBox::new(0.0, 0.0, 10.0, 10.0));
        }

        let touched = Stylesheet::print_overrides().apply(&mut document, root);
        assert_eq!(touched, 4);

        let style = |node| document.element(node).expect("element").style().clone();
        assert_eq!(style(heading).break_inside, BreakInside::Avoid);
        assert_eq!(style(entry).break_inside, BreakInside::Avoid);
        assert_eq!(style(plain).break_inside, BreakInside::Auto);
        assert_eq!(style(plain).box_sizing, BoxSizing::BorderBox);
        assert_eq!(style(plain).print_color_adjust, PrintColorAdjust::Exact);
    }

    #[test]
    fn css_serialization_lists_every_rule() {
        let css = Stylesheet::print_overrides().to_css();
        assert!(css.starts_with("* {"));
        assert!(css.contains("break-inside: avoid"));
        assert!(css.contains(".experience-item"));
        assert_eq!(css.lines().count(), 2);
    }
}
