//! Template-specific rasterization hardening.
//!
//! Some template styling does not survive rasterization well: gradients band after
//! JPEG compression, translucent fills pick up seams, icons drawn at fractional offsets
//! blur and profile photos lose their round clipping. A [`CorrectionTable`] maps
//! template identifiers to a list of [`Correction`]s and always has a default entry
//! for identifiers it does not know. Corrections are idempotent and never fail: a
//! correction whose targets are missing simply touches nothing.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::dom::{Document, NodeId};
use crate::selector::Selector;
use crate::style::{Background, Border, Color, EdgeRendering, Radius};

/// A single correction applied to the render copy.
pub trait Correction: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Applies the correction under `root` and returns how many nodes it touched.
    fn apply(&self, document: &mut Document, root: NodeId) -> usize;
}

/// Replaces gradients and translucent fills with solid colours.
pub struct SolidBackgrounds {
    target: Selector,
    fill: Option<Color>,
}

impl SolidBackgrounds {
    pub fn new(target: Selector) -> Self {
        Self { target, fill: None }
    }

    /// Also paints transparent backgrounds of the targets with `fill`.
    pub fn with_fill(mut self, fill: Color) -> Self {
        self.fill = Some(fill);
        self
    }
}

impl Correction for SolidBackgrounds {
    fn name(&self) -> &'static str {
        "solid-backgrounds"
    }

    fn apply(&self, document: &mut Document, root: NodeId) -> usize {
        let mut touched = 0;
        for node in document.query_all(root, &self.target) {
            let Some(element) = document.element_mut(node) else {
                continue;
            };
            let style = element.style_mut();
            let solid = match style.background {
                Background::LinearGradient { from, to } => Some(from.mix(to, 0.5).over(Color::WHITE)),
                Background::Solid { color } if !color.is_opaque() => Some(color.over(Color::WHITE)),
                Background::Transparent => self.fill,
                Background::Solid { .. } => None,
            };
            if let Some(color) = solid {
                style.background = Background::Solid { color };
                touched += 1;
            }
        }
        touched
    }
}

/// Snaps icons and vector shapes to whole pixels and disables edge smoothing.
pub struct CrispVectors {
    target: Selector,
}

impl CrispVectors {
    pub fn new(target: Selector) -> Self {
        Self { target }
    }
}

impl Correction for CrispVectors {
    fn name(&self) -> &'static str {
        "crisp-vectors"
    }

    fn apply(&self, document: &mut Document, root: NodeId) -> usize {
        let targets = document.query_all(root, &self.target);
        for node in &targets {
            if let Some(layout) = document.layout(*node) {
                document.set_layout(*node, layout.snapped());
            }
            if let Some(element) = document.element_mut(*node) {
                element.style_mut().edges = EdgeRendering::Crisp;
            }
        }
        targets.len()
    }
}

/// Keeps profile photos square, round-clipped and bordered.
pub struct CircularPortraits {
    target: Selector,
    border: Option<Border>,
}

impl CircularPortraits {
    pub fn new(target: Selector) -> Self {
        Self {
            target,
            border: None,
        }
    }

    pub fn with_border(mut self, border: Border) -> Self {
        self.border = Some(border);
        self
    }
}

impl Correction for CircularPortraits {
    fn name(&self) -> &'static str {
        "circular-portraits"
    }

    fn apply(&self, document: &mut Document, root: NodeId) -> usize {
        let targets = document.query_all(root, &self.target);
        for node in &targets {
            if let Some(mut layout) = document.layout(*node) {
                let side = layout.width.min(layout.height);
                layout.width = side;
                layout.height = side;
                document.set_layout(*node, layout);
            }
            if let Some(element) = document.element_mut(*node) {
                let style = element.style_mut();
                style.border_radius = Radius::Percent(50.0);
                style.clip_content = true;
                if let Some(border) = self.border {
                    style.border = Some(border);
                }
            }
        }
        targets.len()
    }
}

/// Ordered corrections for one template.
#[derive(Clone, Default)]
pub struct Strategy {
    corrections: Vec<Arc<dyn Correction>>,
}

impl Strategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, correction: impl Correction + 'static) -> Self {
        self.corrections.push(Arc::new(correction));
        self
    }

    /// Appends every correction of `other`.
    pub fn extend(mut self, other: &Strategy) -> Self {
        self.corrections.extend(other.corrections.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }

    fn run(&self, document: &mut Document, root: NodeId) -> usize {
        self.corrections
            .iter()
            .map(|correction| {
                let touched = correction.apply(document, root);
                debug!("correction {} touched {} node(s)", correction.name(), touched);
                touched
            })
            .sum()
    }
}

fn icon_selector() -> Selector {
    Selector::tag("svg")
        .or(Selector::class("icon"))
        .or(Selector::attribute("data-icon"))
}

fn portrait_selector() -> Selector {
    Selector::class("avatar")
        .or(Selector::class("profile-photo"))
        .or(Selector::attribute("data-profile-photo"))
}

/// Corrections applied to templates without a dedicated entry.
pub fn generic_strategy() -> Strategy {
    Strategy::new()
        .with(SolidBackgrounds::new(Selector::any()))
        .with(CrispVectors::new(icon_selector()))
        .with(CircularPortraits::new(portrait_selector()))
}

/// Template identifier to strategy table with a mandatory default.
#[derive(Clone)]
pub struct CorrectionTable {
    strategies: HashMap<String, Strategy>,
    default: Strategy,
}

impl CorrectionTable {
    /// Creates a table that only knows the given default strategy.
    pub fn new(default: Strategy) -> Self {
        Self {
            strategies: HashMap::new(),
            default,
        }
    }

    /// Registers (or replaces) the strategy of a template.
    pub fn register(&mut self, template: impl Into<String>, strategy: Strategy) -> &mut Self {
        self.strategies.insert(template.into(), strategy);
        self
    }

    /// Strategy for `template`, or the default one.
    pub fn strategy_for(&self, template: &str) -> &Strategy {
        self.strategies.get(template).unwrap_or(&self.default)
    }

    pub fn knows(&self, template: &str) -> bool {
        self.strategies.contains_key(template)
    }

    /// Applies the template's corrections to the render copy rooted at `root`.
    pub fn optimize(&self, document: &mut Document, root: NodeId, template: &str) -> NodeId {
        if !self.knows(template) {
            debug!("no corrections registered for template '{template}', using defaults");
        }
        let touched = self.strategy_for(template).run(document, root);
        debug!("template corrections for '{template}' touched {touched} node(s)");
        root
    }
}

impl Default for CorrectionTable {
    /// The built-in templates on top of the generic corrections.
    fn default() -> Self {
        let generic = generic_strategy();
        let mut table = CorrectionTable::new(generic.clone());
        table
            .register(
                "oslo",
                generic
                    .clone()
                    .with(
                        SolidBackgrounds::new(Selector::class("sidebar"))
                            .with_fill(Color::rgb(0xf3, 0xf4, 0xf6)),
                    )
                    .with(
                        CircularPortraits::new(Selector::class("oslo-photo"))
                            .with_border(Border::new(3.0, Color::WHITE)),
                    ),
            )
            .register(
                "stockholm",
                generic.clone().with(
                    SolidBackgrounds::new(Selector::class("resume-header"))
                        .with_fill(Color::rgb(0x25, 0x63, 0xeb)),
                ),
            )
            .register("classic", Strategy::new().extend(&generic));
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementData, LayoutBox};
    use crate::style::ComputedStyle;

    fn copy_with(elements: Vec<(ElementData, LayoutBox)>) -> (Document, NodeId, Vec<NodeId>) {
        let mut document = Document::new();
        let root = document.create_element(ElementData::new("div"));
        document.set_layout(root, LayoutBox::new(0.0, 0.0, 700.0, 900.0));
        let ids = elements
            .into_iter()
            .map(|(element, layout)| {
                let id = document.create_element(element);
                document.set_layout(id, layout);
                document.append_child(root, id).expect("append");
                id
            })
            .collect();
        (document, root, ids)
    }

    fn gradient_header() -> ElementData {
        ElementData::new("header")
            .with_class("resume-header")
            .with_style(ComputedStyle {
                background: Background::LinearGradient {
                    from: Color::rgb(0, 0, 0),
                    to: Color::rgb(200, 100, 50),
                },
                ..ComputedStyle::default()
            })
    }

    #[test]
    fn unknown_template_falls_back_to_generic_corrections() {
        let (mut document, root, ids) = copy_with(vec![
            (gradient_header(), LayoutBox::new(0.0, 0.0, 700.0, 120.0)),
            (
                ElementData::new("i").with_class("icon"),
                LayoutBox::new(10.3, 20.6, 15.4, 15.2),
            ),
            (
                ElementData::new("img").with_class("avatar"),
                LayoutBox::new(600.0, 10.0, 90.0, 80.0),
            ),
        ]);

        let table = CorrectionTable::default();
        assert!(!table.knows("does-not-exist"));
        assert_eq!(table.optimize(&mut document, root, "does-not-exist"), root);

        let header = document.element(ids[0]).expect("header").style().background;
        assert_eq!(
            header,
            Background::Solid {
                color: Color::rgb(100, 50, 25)
            }
        );
        assert_eq!(
            document.layout(ids[1]),
            Some(LayoutBox::new(10.0, 21.0, 16.0, 15.0))
        );
        let avatar = document.element(ids[2]).expect("avatar").style();
        assert_eq!(avatar.border_radius, Radius::Percent(50.0));
        assert!(avatar.clip_content);
        assert_eq!(document.layout(ids[2]).map(|l| (l.width, l.height)), Some((80.0, 80.0)));
    }

    #[test]
    fn optimization_is_idempotent() {
        let (mut document, root, _) = copy_with(vec![
            (gradient_header(), LayoutBox::new(0.0, 0.0, 700.0, 120.0)),
            (
                ElementData::new("aside").with_class("sidebar"),
                LayoutBox::new(0.0, 120.0, 200.0, 700.0),
            ),
            (
                ElementData::new("img").with_class("oslo-photo"),
                LayoutBox::new(20.5, 140.0, 100.0, 120.0),
            ),
        ]);
        let table = CorrectionTable::default();
        table.optimize(&mut document, root, "oslo");
        let once = document.snapshot(root);
        table.optimize(&mut document, root, "oslo");
        assert_eq!(document.snapshot(root), once);
    }

    #[test]
    fn template_specific_fill_applies_to_transparent_targets() {
        let (mut document, root, ids) = copy_with(vec![(
            ElementData::new("aside").with_class("sidebar"),
            LayoutBox::new(0.0, 0.0, 200.0, 700.0),
        )]);
        CorrectionTable::default().optimize(&mut document, root, "oslo");
        assert_eq!(
            document.element(ids[0]).expect("sidebar").style().background,
            Background::Solid {
                color: Color::rgb(0xf3, 0xf4, 0xf6)
            }
        );
    }

    #[test]
    fn missing_targets_are_a_no_op() {
        let (mut document, root, _) = copy_with(Vec::new());
        let before = document.snapshot(root);
        for template in ["oslo", "stockholm", "classic", ""] {
            CorrectionTable::default().optimize(&mut document, root, template);
        }
        assert_eq!(document.snapshot(root), before);
        assert!(!CorrectionTable::default().strategy_for("classic").is_empty());
    }
}
