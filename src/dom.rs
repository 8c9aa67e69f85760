//! Structural page tree as captured from the live document.
//!
//! The browser serializes `document.documentElement` into this shape; the
//! simplifier and scraper only ever read it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Subtrees that never carry decision-relevant content.
const NOISE_TAGS: &[&str] = &[
    "script", "style", "svg", "path", "head", "meta", "noscript", "footer", "link", "iframe",
    "template", "canvas",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageTree {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub root: Element,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomNode {
    Element(Element),
    Text { text: String },
}

impl DomNode {
    pub fn text(text: impl Into<String>) -> Self {
        DomNode::Text { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    /// The live document holds more than one element with this id, some of
    /// which may not appear in the captured tree.
    #[serde(default)]
    pub shared_id: bool,
    #[serde(default)]
    pub children: Vec<DomNode>,
}

fn visible_by_default() -> bool {
    true
}

impl From<Element> for DomNode {
    fn from(el: Element) -> Self {
        DomNode::Element(el)
    }
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            visible: true,
            shared_id: false,
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, node: impl Into<DomNode>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.child(DomNode::text(text))
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_shared_id(mut self) -> Self {
        self.shared_id = true;
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// True for subtrees the agent never looks into.
    pub fn is_noise(&self) -> bool {
        !self.visible || NOISE_TAGS.contains(&self.tag.as_str())
    }

    /// Child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            DomNode::Element(el) => Some(el),
            DomNode::Text { .. } => None,
        })
    }

    /// Visible text of the subtree with whitespace collapsed.
    pub fn text_content(&self) -> String {
        let mut raw = String::new();
        self.collect_text(&mut raw);
        collapse_whitespace(&raw)
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                DomNode::Text { text } => {
                    out.push_str(text);
                    out.push(' ');
                }
                DomNode::Element(el) if !el.is_noise() => el.collect_text(out),
                DomNode::Element(_) => {}
            }
        }
    }

    /// `href` of the first visible anchor below this element.
    pub fn first_descendant_href(&self) -> Option<&str> {
        for el in self.elements() {
            if el.is_noise() {
                continue;
            }
            if let Some(href) = el.navigable_href() {
                return Some(href);
            }
            if let Some(href) = el.first_descendant_href() {
                return Some(href);
            }
        }
        None
    }

    /// `href` of this element when it is an anchor pointing somewhere real.
    pub fn navigable_href(&self) -> Option<&str> {
        if self.tag != "a" {
            return None;
        }
        let href = self.get("href")?.trim();
        let lower = href.to_ascii_lowercase();
        if href.is_empty() || href == "#" || lower.starts_with("javascript:") {
            return None;
        }
        Some(href)
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `s` to at most `max` chars, marking the cut with an ellipsis.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Resolve `href` against the page URL; falls back to the raw value.
pub fn resolve_link(base: &str, href: &str) -> String {
    url::Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}
