//! Minimal selector matching for the render tree.
//!
//! Only what the export pipeline needs is supported: a comma separated list of
//! compound selectors, each made of an optional tag name (or `*`) followed by any
//! number of `.class`, `#id`, `[attr]` and `[attr=value]` conditions. Combinators
//! are not supported; queries are always scoped to a subtree instead.

use std::fmt;

use thiserror::Error;

use crate::dom::ElementData;

/// Errors produced by [`Selector::parse`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid selector `{input}` at byte {index}: {message}")]
pub struct SelectorError {
    input: String,
    index: usize,
    message: &'static str,
}

impl SelectorError {
    fn new(input: &str, index: usize, message: &'static str) -> Self {
        Self {
            input: input.to_owned(),
            index,
            message,
        }
    }

    /// Byte offset where parsing stopped.
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Condition {
    Class(String),
    Id(String),
    Attribute { name: String, value: Option<String> },
}

impl Condition {
    fn matches(&self, element: &ElementData) -> bool {
        match self {
            Condition::Class(class) => element.has_class(class),
            Condition::Id(id) => element.attribute("id") == Some(id.as_str()),
            Condition::Attribute { name, value } => match (element.attribute(name), value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            },
        }
    }
}

/// A single compound selector such as `img.avatar[data-profile-photo]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Compound {
    tag: Option<String>,
    conditions: Vec<Condition>,
}

impl Compound {
    fn matches(&self, element: &ElementData) -> bool {
        if let Some(tag) = &self.tag {
            if !tag.eq_ignore_ascii_case(element.tag()) {
                return false;
            }
        }
        self.conditions.iter().all(|condition| condition.matches(element))
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => f.write_str(tag)?,
            None if self.conditions.is_empty() => f.write_str("*")?,
            None => {}
        }
        for condition in &self.conditions {
            match condition {
                Condition::Class(class) => write!(f, ".{class}")?,
                Condition::Id(id) => write!(f, "#{id}")?,
                Condition::Attribute { name, value: None } => write!(f, "[{name}]")?,
                Condition::Attribute {
                    name,
                    value: Some(value),
                } => write!(f, "[{name}=\"{value}\"]")?,
            }
        }
        Ok(())
    }
}

/// A selector list. An element matches when any compound matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Compound>,
}

impl Selector {
    /// Matches every element.
    pub fn any() -> Self {
        Self {
            alternatives: vec![Compound::default()],
        }
    }

    /// Matches elements with the given tag name.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::single(Compound {
            tag: Some(tag.into()),
            conditions: Vec::new(),
        })
    }

    /// Matches elements carrying the given class.
    pub fn class(class: impl Into<String>) -> Self {
        Self::single(Compound {
            tag: None,
            conditions: vec![Condition::Class(class.into())],
        })
    }

    /// Matches elements that have the given attribute, whatever its value.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self::single(Compound {
            tag: None,
            conditions: vec![Condition::Attribute {
                name: name.into(),
                value: None,
            }],
        })
    }

    /// Matches elements whose attribute equals `value`.
    pub fn attribute_eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::single(Compound {
            tag: None,
            conditions: vec![Condition::Attribute {
                name: name.into(),
                value: Some(value.into()),
            }],
        })
    }

    fn single(compound: Compound) -> Self {
        Self {
            alternatives: vec![compound],
        }
    }

    /// Returns a selector matching either `self` or `other`.
    pub fn or(mut self, other: Selector) -> Self {
        self.alternatives.extend(other.alternatives);
        self
    }

    /// Returns whether the element matches any alternative.
    pub fn matches(&self, element: &ElementData) -> bool {
        self.alternatives
            .iter()
            .any(|compound| compound.matches(element))
    }

    /// Parses a selector list like `h1, li, .entry, [data-atomic]`.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut alternatives = Vec::new();
        let mut offset = 0;

        for part in input.split(',') {
            let trimmed = part.trim();
            let leading = part.len() - part.trim_start().len();
            if trimmed.is_empty() {
                return Err(SelectorError::new(input, offset, "empty selector"));
            }
            alternatives.push(parse_compound(input, trimmed, offset + leading)?);
            offset += part.len() + 1;
        }

        Ok(Self { alternatives })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, compound) in self.alternatives.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{compound}")?;
        }
        Ok(())
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

fn take_ident(text: &str) -> (&str, &str) {
    let end = text
        .char_indices()
        .find(|(_, ch)| !is_ident_char(*ch))
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    text.split_at(end)
}

fn parse_compound(input: &str, text: &str, base: usize) -> Result<Compound, SelectorError> {
    let mut compound = Compound::default();
    let mut rest = text;

    if let Some(stripped) = rest.strip_prefix('*') {
        rest = stripped;
    } else {
        let (tag, remainder) = take_ident(rest);
        if !tag.is_empty() {
            compound.tag = Some(tag.to_ascii_lowercase());
            rest = remainder;
        }
    }

    while let Some(marker) = rest.chars().next() {
        let position = base + text.len() - rest.len();
        match marker {
            '.' | '#' => {
                let (ident, remainder) = take_ident(&rest[1..]);
                if ident.is_empty() {
                    return Err(SelectorError::new(input, position, "expected identifier"));
                }
                compound.conditions.push(if marker == '.' {
                    Condition::Class(ident.to_owned())
                } else {
                    Condition::Id(ident.to_owned())
                });
                rest = remainder;
            }
            '[' => {
                let close = rest
                    .find(']')
                    .ok_or_else(|| SelectorError::new(input, position, "unterminated `[`"))?;
                let body = &rest[1..close];
                let (name, value) = match body.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim().trim_matches(|ch| ch == '"' || ch == '\'');
                        (name.trim(), Some(value.to_owned()))
                    }
                    None => (body.trim(), None),
                };
                if name.is_empty() || !name.chars().all(is_ident_char) {
                    return Err(SelectorError::new(
                        input,
                        position,
                        "invalid attribute name",
                    ));
                }
                compound.conditions.push(Condition::Attribute {
                    name: name.to_owned(),
                    value,
                });
                rest = &rest[close + 1..];
            }
            _ => {
                return Err(SelectorError::new(
                    input,
                    position,
                    "unsupported selector syntax",
                ))
            }
        }
    }

    Ok(compound)
}

#[cfg(test)]
mod tests {
    use super::Selector;
    use crate::dom::ElementData;

    #[test]
    fn parses_compound_lists() {
        let selector = Selector::parse("h1, li.entry , [data-atomic], img#me[alt=\"x\"]")
            .expect("valid selector");
        assert_eq!(
            selector.to_string(),
            "h1, li.entry, [data-atomic], img#me[alt=\"x\"]"
        );
    }

    #[test]
    fn matches_tags_classes_and_attributes() {
        let selector = Selector::parse("div.entry[data-kind=job]").expect("valid selector");
        let element = ElementData::new("DIV")
            .with_class("entry")
            .with_attribute("data-kind", "job");
        assert!(selector.matches(&element));

        let other = ElementData::new("div").with_class("entry");
        assert!(!selector.matches(&other));
        assert!(Selector::any().matches(&other));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("h1,,h2").is_err());
        assert!(Selector::parse("div > p").is_err());
        let error = Selector::parse("div[data").unwrap_err();
        assert_eq!(error.index(), 3);
    }
}
