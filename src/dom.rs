//! The renderable document: an arena-backed visual tree with computed layout.
//!
//! The UI layer owns a [`Document`] whose nodes already carry final layout boxes and
//! computed styles. The export pipeline reads it, appends a temporary container to
//! `body`, clones the template subtree into that container and removes everything it
//! added before returning. Removal frees the arena slots so no node created by an
//! export outlives it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selector::Selector;
use crate::style::ComputedStyle;

/// Handle to a node stored in a [`Document`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Errors raised by tree mutations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} does not exist in this document")]
    UnknownNode(NodeId),
    #[error("node {0:?} is a text node and cannot have children")]
    NotAnElement(NodeId),
    #[error("node {0:?} already has a parent")]
    AlreadyAttached(NodeId),
    #[error("appending {child:?} to {parent:?} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
}

/// Border box of a node in CSS pixels, in document coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl LayoutBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn translated(self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }

    /// Scales the box around `(origin_x, origin_y)`.
    pub fn scaled_from(self, origin_x: f32, origin_y: f32, factor: f32) -> Self {
        Self {
            x: origin_x + (self.x - origin_x) * factor,
            y: origin_y + (self.y - origin_y) * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Rounds every edge to the nearest whole pixel.
    pub fn snapped(self) -> Self {
        let x = self.x.round();
        let y = self.y.round();
        Self {
            x,
            y,
            width: self.right().round() - x,
            height: self.bottom().round() - y,
        }
    }
}

/// Source of an image element's pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Encoded image bytes held in memory.
    #[serde(skip)]
    Bytes(Vec<u8>),
    /// Image referenced by a file path.
    Path(String),
}

impl ImageSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}

/// Element payload: tag, classes, attributes, computed style and image source.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementData {
    tag: String,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    style: ComputedStyle,
    image: Option<ImageSource>,
}

impl ElementData {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            classes: Vec::new(),
            attributes: BTreeMap::new(),
            style: ComputedStyle::default(),
            image: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|candidate| candidate == class)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn style(&self) -> &ComputedStyle {
        &self.style
    }

    pub fn style_mut(&mut self) -> &mut ComputedStyle {
        &mut self.style
    }

    pub fn image(&self) -> Option<&ImageSource> {
        self.image.as_ref()
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        if !self.has_class(&class) {
            self.classes.push(class);
        }
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_style(mut self, style: ComputedStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_image(mut self, image: ImageSource) -> Self {
        self.image = Some(image);
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
    Element(ElementData),
    Text(String),
}

#[derive(Clone, Debug)]
struct Node {
    data: NodeData,
    layout: LayoutBox,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            layout: LayoutBox::default(),
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Structural copy of a subtree without node identities, used to compare trees.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSnapshot {
    pub data: NodeData,
    pub layout: LayoutBox,
    pub children: Vec<NodeSnapshot>,
}

/// Arena-backed document tree rooted at a `body` element.
#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates an empty document containing only `body`.
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node::new(NodeData::Element(ElementData::new("body"))))],
            free: Vec::new(),
            body: NodeId(0),
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Creates a detached element node.
    pub fn create_element(&mut self, element: ElementData) -> NodeId {
        self.insert(Node::new(NodeData::Element(element)))
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.insert(Node::new(NodeData::Text(text.into())))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of nodes currently allocated, attached or not.
    pub fn live_nodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.node(id).map(|node| &node.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.data(id) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match self.node_mut(id).map(|node| &mut node.data) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            Some(NodeData::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn layout(&self, id: NodeId) -> Option<LayoutBox> {
        self.node(id).map(|node| node.layout)
    }

    pub fn set_layout(&mut self, id: NodeId, layout: LayoutBox) {
        if let Some(node) = self.node_mut(id) {
            node.layout = layout;
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Returns whether the node is connected to `body`.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.body {
                return self.contains(node);
            }
            current = self.parent(node);
        }
        false
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.parent(candidate);
        }
        false
    }

    /// Appends a detached node as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        match self.data(parent) {
            None => return Err(DomError::UnknownNode(parent)),
            Some(NodeData::Text(_)) => return Err(DomError::NotAnElement(parent)),
            Some(NodeData::Element(_)) => {}
        }
        let Some(node) = self.node(child) else {
            return Err(DomError::UnknownNode(child));
        };
        if node.parent.is_some() {
            return Err(DomError::AlreadyAttached(child));
        }
        if self.is_ancestor(child, parent) {
            return Err(DomError::Cycle { parent, child });
        }

        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
        Ok(())
    }

    /// Detaches a node from its parent. Returns `false` when it was not attached.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.parent(id) else {
            return false;
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|child| *child != id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }
        true
    }

    /// Detaches the node and frees it together with all its descendants.
    ///
    /// Unknown or already removed nodes are ignored. Returns the number of freed nodes.
    pub fn remove_subtree(&mut self, id: NodeId) -> usize {
        if !self.contains(id) || id == self.body {
            return 0;
        }
        self.detach(id);
        let doomed = self.descendants(id);
        for node in &doomed {
            self.nodes[node.0] = None;
            self.free.push(node.0);
        }
        doomed.len()
    }

    /// Pre-order list of `root` and all its descendants.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if !self.contains(root) {
            return order;
        }
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        order
    }

    /// Deep-copies the subtree rooted at `source` into new, detached nodes.
    pub fn deep_clone(&mut self, source: NodeId) -> Option<NodeId> {
        let node = self.node(source)?;
        let data = node.data.clone();
        let layout = node.layout;
        let children = node.children.clone();

        let copy = self.insert(Node {
            data,
            layout,
            parent: None,
            children: Vec::with_capacity(children.len()),
        });
        for child in children {
            if let Some(child_copy) = self.deep_clone(child) {
                if let Some(node) = self.node_mut(child_copy) {
                    node.parent = Some(copy);
                }
                if let Some(node) = self.node_mut(copy) {
                    node.children.push(child_copy);
                }
            }
        }
        Some(copy)
    }

    /// First element in `root`'s subtree (including `root`) matching the selector.
    pub fn query(&self, root: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(root).into_iter().find(|node| {
            self.element(*node)
                .map(|element| selector.matches(element))
                .unwrap_or(false)
        })
    }

    /// All elements in `root`'s subtree matching the selector, in document order.
    pub fn query_all(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|node| {
                self.element(*node)
                    .map(|element| selector.matches(element))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Moves every box in the subtree by `(dx, dy)`.
    pub fn translate_subtree(&mut self, root: NodeId, dx: f32, dy: f32) {
        for node in self.descendants(root) {
            if let Some(node) = self.node_mut(node) {
                node.layout = node.layout.translated(dx, dy);
            }
        }
    }

    /// Scales geometry and style lengths of the subtree around `(origin_x, origin_y)`.
    pub fn scale_subtree(&mut self, root: NodeId, origin_x: f32, origin_y: f32, factor: f32) {
        for node in self.descendants(root) {
            if let Some(node) = self.node_mut(node) {
                node.layout = node.layout.scaled_from(origin_x, origin_y, factor);
                if let NodeData::Element(element) = &mut node.data {
                    element.style.scale_lengths(factor);
                }
            }
        }
    }

    /// Captures the subtree's structure, payloads and layout.
    pub fn snapshot(&self, root: NodeId) -> Option<NodeSnapshot> {
        let node = self.node(root)?;
        Some(NodeSnapshot {
            data: node.data.clone(),
            layout: node.layout,
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        })
    }

    /// Builds a document from a serialized description of `body`'s children.
    pub fn from_spec(spec: &DocumentSpec) -> Result<Self, DomError> {
        let mut document = Document::new();
        if let Some(layout) = spec.body_layout {
            document.set_layout(document.body, layout);
        }
        for child in &spec.children {
            let id = document.build_node(child)?;
            document.append_child(document.body, id)?;
        }
        Ok(document)
    }

    fn build_node(&mut self, spec: &NodeSpec) -> Result<NodeId, DomError> {
        match spec {
            NodeSpec::Text { text, layout } => {
                let id = self.create_text(text.clone());
                self.set_layout(id, *layout);
                Ok(id)
            }
            NodeSpec::Element {
                tag,
                classes,
                attributes,
                style,
                layout,
                image,
                children,
            } => {
                let mut element = ElementData::new(tag.clone()).with_style(style.clone());
                for class in classes {
                    element = element.with_class(class.clone());
                }
                for (name, value) in attributes {
                    element.set_attribute(name.clone(), value.clone());
                }
                if let Some(image) = image {
                    element = element.with_image(image.clone());
                }
                let id = self.create_element(element);
                self.set_layout(id, *layout);
                for child in children {
                    let child = self.build_node(child)?;
                    self.append_child(id, child)?;
                }
                Ok(id)
            }
        }
    }
}

/// Serialized form of a laid-out document, as produced by a UI layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocumentSpec {
    #[serde(default)]
    pub body_layout: Option<LayoutBox>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Element {
        tag: String,
        #[serde(default)]
        classes: Vec<String>,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        #[serde(default)]
        style: ComputedStyle,
        #[serde(default)]
        layout: LayoutBox,
        #[serde(default)]
        image: Option<ImageSource>,
        #[serde(default)]
        children: Vec<NodeSpec>,
    },
    Text {
        text: String,
        #[serde(default)]
        layout: LayoutBox,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut document = Document::new();
        let root = document.create_element(
            ElementData::new("div")
                .with_class("resume")
                .with_attribute("data-template-root", ""),
        );
        document.set_layout(root, LayoutBox::new(40.0, 80.0, 600.0, 300.0));
        let title = document.create_element(ElementData::new("h1"));
        document.set_layout(title, LayoutBox::new(40.0, 80.0, 600.0, 40.0));
        let text = document.create_text("Ada Lovelace");
        document.set_layout(text, LayoutBox::new(40.0, 80.0, 200.0, 40.0));
        document.append_child(title, text).expect("append text");
        document.append_child(root, title).expect("append title");
        document
            .append_child(document.body(), root)
            .expect("append root");
        (document, root, title)
    }

    #[test]
    fn deep_clone_is_independent() {
        let (mut document, root, _) = sample();
        let before = document.snapshot(root);
        let copy = document.deep_clone(root).expect("clone");

        assert_eq!(document.snapshot(copy), before);
        assert_eq!(document.parent(copy), None);

        document.translate_subtree(copy, -100.0, 0.0);
        if let Some(element) = document.element_mut(copy) {
            element.style_mut().margin = 12.0;
        }
        assert_eq!(document.snapshot(root), before);
    }

    #[test]
    fn remove_subtree_frees_slots_and_tolerates_repeats() {
        let (mut document, root, _) = sample();
        let baseline = document.live_nodes();
        let copy = document.deep_clone(root).expect("clone");
        document
            .append_child(document.body(), copy)
            .expect("attach copy");
        assert_eq!(document.live_nodes(), baseline * 2 - 1);

        assert_eq!(document.remove_subtree(copy), 3);
        assert_eq!(document.remove_subtree(copy), 0);
        assert!(!document.detach(copy));
        assert_eq!(document.live_nodes(), baseline);
        assert_eq!(document.children(document.body()), &[root]);
    }

    #[test]
    fn append_rejects_cycles_and_double_parents() {
        let (mut document, root, title) = sample();
        assert_eq!(
            document.append_child(title, root),
            Err(DomError::AlreadyAttached(root))
        );
        document.detach(root);
        assert_eq!(
            document.append_child(title, root),
            Err(DomError::Cycle {
                parent: title,
                child: root
            })
        );
        let text = document.children(title)[0];
        let orphan = document.create_element(ElementData::new("span"));
        assert_eq!(
            document.append_child(text, orphan),
            Err(DomError::NotAnElement(text))
        );
    }

    #[test]
    fn queries_follow_document_order() {
        let (document, root, title) = sample();
        let selector = Selector::attribute("data-template-root");
        assert_eq!(document.query(document.body(), &selector), Some(root));
        assert_eq!(
            document.query_all(document.body(), &Selector::tag("h1")),
            vec![title]
        );
        assert!(document.is_attached(title));
    }

    #[test]
    fn loads_json_specs() {
        let json = r##"{
            "children": [{
                "type": "element",
                "tag": "div",
                "classes": ["resume"],
                "attributes": {"data-template-root": ""},
                "style": {"background": {"kind": "solid", "color": "#f3f4f6"}},
                "layout": {"x": 0, "y": 0, "width": 700, "height": 200},
                "children": [
                    {"type": "text", "text": "Hello", "layout": {"x": 0, "y": 0, "width": 100, "height": 20}}
                ]
            }]
        }"##;
        let spec: DocumentSpec = serde_json::from_str(json).expect("valid spec");
        let document = Document::from_spec(&spec).expect("build document");
        let root = document
            .query(document.body(), &Selector::class("resume"))
            .expect("root");
        assert_eq!(document.layout(root).map(|layout| layout.width), Some(700.0));
        let text = document.children(root)[0];
        assert_eq!(document.text(text), Some("Hello"));
    }
}
