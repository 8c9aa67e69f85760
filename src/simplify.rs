//! Projection of a live page onto the compact form the planner reasons over.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, warn};

use crate::action::{Action, Locator};
use crate::agent::Computer;
use crate::dom::{collapse_whitespace, resolve_link, truncate_chars, DomNode, Element, PageTree};
use crate::error::{ComputerError, PlanningError, SimplificationError};

/// ARIA roles that make an arbitrary element interactive.
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "radio", "textbox", "combobox", "listbox", "option",
    "menuitem", "tab", "switch", "searchbox", "slider", "spinbutton", "treeitem",
];

/// Form controls whose inner text is a label, not page content.
const CONTROL_TAGS: &[&str] = &["button", "select", "textarea", "option", "input"];

#[derive(Clone, Debug)]
pub struct SimplifierConfig {
    pub max_elements: usize,
    pub max_fragments: usize,
    pub max_label_chars: usize,
    pub max_fragment_chars: usize,
    /// Wait before the single retry of an unreadable page.
    pub retry_delay: Duration,
    pub capture_timeout: Duration,
}

impl Default for SimplifierConfig {
    fn default() -> Self {
        Self {
            max_elements: 150,
            max_fragments: 200,
            max_label_chars: 80,
            max_fragment_chars: 200,
            retry_delay: Duration::from_millis(750),
            capture_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub index: usize,
    pub role: String,
    pub locator: Locator,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFragment {
    pub text: String,
    pub link: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedPage {
    pub url: String,
    pub title: Option<String>,
    pub elements: Vec<InteractiveElement>,
    pub fragments: Vec<ContentFragment>,
    /// Set when elements or fragments were dropped to respect the size bounds.
    pub truncated: bool,
}

impl SimplifiedPage {
    pub fn contains(&self, locator: &Locator) -> bool {
        self.elements.iter().any(|e| &e.locator == locator)
    }

    /// Rejects actions that name a locator this snapshot never offered.
    pub fn validate(&self, action: &Action) -> Result<(), PlanningError> {
        match action.target() {
            Some(locator) if !self.contains(locator) => {
                Err(PlanningError::InvalidReference(locator.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Text form submitted to the reasoning service.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "URL: {}", self.url);
        if let Some(title) = &self.title {
            let _ = writeln!(out, "TITLE: {title}");
        }
        out.push_str("\nINTERACTIVE ELEMENTS (use the locator exactly as shown):\n");
        if self.elements.is_empty() {
            out.push_str("(none)\n");
        }
        for el in &self.elements {
            let _ = writeln!(out, "[{}] {} {:?} locator=`{}`", el.index, el.role, el.label, el.locator);
        }
        out.push_str("\nPAGE TEXT:\n");
        for frag in &self.fragments {
            match &frag.link {
                Some(link) => {
                    let _ = writeln!(out, "- {} (link: {})", frag.text, link);
                }
                None => {
                    let _ = writeln!(out, "- {}", frag.text);
                }
            }
        }
        if self.truncated {
            out.push_str("\n(page truncated to fit the size limit)\n");
        }
        out
    }
}

pub struct PageSimplifier {
    cfg: SimplifierConfig,
}

impl Default for PageSimplifier {
    fn default() -> Self {
        Self::new(SimplifierConfig::default())
    }
}

impl PageSimplifier {
    pub fn new(cfg: SimplifierConfig) -> Self {
        Self { cfg }
    }

    /// Capture and simplify the live page, retrying once after a short wait.
    pub async fn observe<C>(&self, computer: &C) -> Result<SimplifiedPage, SimplificationError>
    where
        C: Computer + ?Sized,
    {
        match self.capture(computer).await {
            Ok(tree) => return Ok(self.simplify(&tree)),
            Err(err) => {
                warn!(error = %err, "page unreadable, retrying once");
                tokio::time::sleep(self.cfg.retry_delay).await;
            }
        }
        let tree = self
            .capture(computer)
            .await
            .map_err(|e| SimplificationError::PageUnavailable(e.to_string()))?;
        Ok(self.simplify(&tree))
    }

    async fn capture<C>(&self, computer: &C) -> Result<PageTree, ComputerError>
    where
        C: Computer + ?Sized,
    {
        tokio::time::timeout(self.cfg.capture_timeout, computer.page_tree())
            .await
            .map_err(|_| ComputerError::Timeout(self.cfg.capture_timeout))?
    }

    /// Pure projection of a captured tree. Same tree in, same page out.
    pub fn simplify(&self, tree: &PageTree) -> SimplifiedPage {
        let mut id_counts = HashMap::new();
        count_ids(&tree.root, &mut id_counts);

        let mut walk = Walk {
            cfg: &self.cfg,
            base_url: &tree.url,
            id_counts,
            elements: Vec::new(),
            fragments: Vec::new(),
            truncated: false,
        };
        let root_path = walk.own_selector(&tree.root, None, &tree.root.tag);
        walk.visit(&tree.root, &root_path, None, false);

        debug!(
            url = %tree.url,
            elements = walk.elements.len(),
            fragments = walk.fragments.len(),
            truncated = walk.truncated,
            "page simplified"
        );
        SimplifiedPage {
            url: tree.url.clone(),
            title: tree.title.as_deref().map(collapse_whitespace).filter(|t| !t.is_empty()),
            elements: walk.elements,
            fragments: walk.fragments,
            truncated: walk.truncated,
        }
    }
}

fn count_ids(el: &Element, counts: &mut HashMap<String, usize>) {
    if let Some(id) = el.get("id") {
        *counts.entry(id.to_string()).or_default() += 1;
    }
    for child in el.elements() {
        count_ids(child, counts);
    }
}

/// Ids usable verbatim as `#id` without escaping.
fn is_plain_ident(id: &str) -> bool {
    let mut chars = id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

struct Walk<'a> {
    cfg: &'a SimplifierConfig,
    base_url: &'a str,
    id_counts: HashMap<String, usize>,
    elements: Vec<InteractiveElement>,
    fragments: Vec<ContentFragment>,
    truncated: bool,
}

impl Walk<'_> {
    fn own_selector(&self, el: &Element, parent_path: Option<&str>, step: &str) -> String {
        if let Some(id) = el.get("id") {
            if !el.shared_id && is_plain_ident(id) && self.id_counts.get(id) == Some(&1) {
                return format!("#{id}");
            }
        }
        match parent_path {
            Some(parent) => format!("{parent} > {step}"),
            None => step.to_string(),
        }
    }

    fn visit(&mut self, el: &Element, path: &str, link: Option<&str>, in_control: bool) {
        if el.is_noise() {
            return;
        }
        let link = el.navigable_href().or(link);
        let in_control = in_control || CONTROL_TAGS.contains(&el.tag.as_str());

        if let Some(role) = interactive_role(el) {
            self.push_element(el, role, path);
        }

        // Anchors contribute their whole text as one linked fragment.
        if let Some(href) = el.navigable_href() {
            if !in_control {
                let text = el.text_content();
                self.push_fragment(&text, Some(href));
            }
            self.visit_children(el, path, link, in_control, false);
            return;
        }
        self.visit_children(el, path, link, in_control, !in_control);
    }

    fn visit_children(
        &mut self,
        el: &Element,
        path: &str,
        link: Option<&str>,
        in_control: bool,
        collect_text: bool,
    ) {
        let mut tag_totals: HashMap<&str, usize> = HashMap::new();
        for child in el.elements() {
            *tag_totals.entry(child.tag.as_str()).or_default() += 1;
        }
        let mut tag_seen: HashMap<&str, usize> = HashMap::new();

        for child in &el.children {
            match child {
                DomNode::Text { text } => {
                    if collect_text {
                        self.push_fragment(text, link);
                    }
                }
                DomNode::Element(child) => {
                    let tag = child.tag.as_str();
                    let nth = tag_seen.entry(tag).or_default();
                    *nth += 1;
                    let step = if tag_totals.get(tag).copied().unwrap_or(0) > 1 {
                        format!("{tag}:nth-of-type({nth})")
                    } else {
                        tag.to_string()
                    };
                    let child_path = self.own_selector(child, Some(path), &step);
                    if collect_text {
                        self.visit(child, &child_path, link, in_control);
                    } else {
                        self.visit_no_text(child, &child_path, link, in_control);
                    }
                }
            }
        }
    }

    /// Inside an anchor: keep indexing controls, skip text already captured.
    fn visit_no_text(&mut self, el: &Element, path: &str, link: Option<&str>, in_control: bool) {
        if el.is_noise() {
            return;
        }
        if let Some(role) = interactive_role(el) {
            self.push_element(el, role, path);
        }
        self.visit_children(el, path, link, in_control, false);
    }

    fn push_element(&mut self, el: &Element, role: &str, path: &str) {
        if self.elements.len() >= self.cfg.max_elements {
            self.truncated = true;
            return;
        }
        self.elements.push(InteractiveElement {
            index: self.elements.len(),
            role: role.to_string(),
            locator: Locator::new(path),
            label: truncate_chars(&label_of(el), self.cfg.max_label_chars),
        });
    }

    fn push_fragment(&mut self, raw: &str, link: Option<&str>) {
        let text = collapse_whitespace(raw);
        if text.is_empty() {
            return;
        }
        if self.fragments.len() >= self.cfg.max_fragments {
            self.truncated = true;
            return;
        }
        self.fragments.push(ContentFragment {
            text: truncate_chars(&text, self.cfg.max_fragment_chars),
            link: link.map(|href| resolve_link(self.base_url, href)),
        });
    }
}

fn interactive_role(el: &Element) -> Option<&'static str> {
    if let Some(role) = el.get("role") {
        let role = role.trim().to_ascii_lowercase();
        if let Some(known) = INTERACTIVE_ROLES.iter().copied().find(|r| *r == role) {
            return Some(known);
        }
    }
    let role = match el.tag.as_str() {
        "a" if el.get("href").is_some() || el.get("onclick").is_some() => "link",
        "button" | "summary" => "button",
        "select" => "combobox",
        "textarea" => "textbox",
        "input" => {
            let kind = el.get("type").unwrap_or("text").to_ascii_lowercase();
            match kind.as_str() {
                "hidden" => return None,
                "submit" | "button" | "reset" | "image" => "button",
                "checkbox" => "checkbox",
                "radio" => "radio",
                "search" => "searchbox",
                _ => "textbox",
            }
        }
        _ if el.get("onclick").is_some() => "button",
        _ if matches!(el.get("contenteditable"), Some("") | Some("true")) => "textbox",
        _ => return None,
    };
    Some(role)
}

fn label_of(el: &Element) -> String {
    if let Some(aria) = el.get("aria-label").map(collapse_whitespace).filter(|s| !s.is_empty()) {
        return aria;
    }
    let text = el.text_content();
    if !text.is_empty() {
        return text;
    }
    let is_password = el.get("type").is_some_and(|t| t.eq_ignore_ascii_case("password"));
    for key in ["placeholder", "value", "title", "alt", "name"] {
        if key == "value" && is_password {
            continue;
        }
        if let Some(v) = el.get(key).map(collapse_whitespace).filter(|s| !s.is_empty()) {
            return v;
        }
    }
    el.elements()
        .find_map(|c| c.get("alt").map(collapse_whitespace).filter(|s| !s.is_empty()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_page() -> PageTree {
        PageTree {
            url: "https://www.wikipedia.org/".into(),
            title: Some("Wikipedia".into()),
            root: Element::new("html")
                .child(Element::new("head").child(Element::new("title").with_text("Wikipedia")))
                .child(
                    Element::new("body")
                        .child(Element::new("script").with_text("track()"))
                        .child(
                            Element::new("form")
                                .child(
                                    Element::new("input")
                                        .attr("id", "searchInput")
                                        .attr("name", "search")
                                        .attr("placeholder", "Search Wikipedia"),
                                )
                                .child(Element::new("button").attr("type", "submit").with_text("Search")),
                        )
                        .child(
                            Element::new("div")
                                .child(Element::new("a").attr("href", "/wiki/English").with_text("English"))
                                .child(Element::new("a").attr("href", "/wiki/Deutsch").with_text("Deutsch")),
                        )
                        .child(Element::new("div").hidden().child(Element::new("button").with_text("Ghost")))
                        .child(Element::new("p").with_text("The free encyclopedia"))
                        .child(Element::new("footer").with_text("Terms of use")),
                ),
        }
    }

    #[test]
    fn keeps_controls_links_and_text_but_drops_noise() {
        let page = PageSimplifier::default().simplify(&search_page());

        let summary: Vec<_> = page
            .elements
            .iter()
            .map(|e| (e.role.as_str(), e.label.as_str(), e.locator.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("textbox", "Search Wikipedia", "#searchInput"),
                ("button", "Search", "html > body > form > button"),
                ("link", "English", "html > body > div:nth-of-type(1) > a:nth-of-type(1)"),
                ("link", "Deutsch", "html > body > div:nth-of-type(1) > a:nth-of-type(2)"),
            ]
        );

        let texts: Vec<_> = page.fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["English", "Deutsch", "The free encyclopedia"]);
        assert_eq!(
            page.fragments[0].link.as_deref(),
            Some("https://www.wikipedia.org/wiki/English")
        );
        assert_eq!(page.title.as_deref(), Some("Wikipedia"));
        assert!(!page.truncated);
    }

    #[test]
    fn simplifying_twice_is_identical() {
        let simplifier = PageSimplifier::default();
        let tree = search_page();
        assert_eq!(simplifier.simplify(&tree), simplifier.simplify(&tree));
    }

    #[test]
    fn duplicate_ids_fall_back_to_positional_paths() {
        let tree = PageTree {
            url: "https://example.com/".into(),
            title: None,
            root: Element::new("html").child(
                Element::new("body")
                    .child(Element::new("button").attr("id", "go").with_text("One"))
                    .child(Element::new("button").attr("id", "go").with_text("Two")),
            ),
        };
        let page = PageSimplifier::default().simplify(&tree);
        assert_eq!(page.elements[0].locator.as_str(), "html > body > button:nth-of-type(1)");
        assert_eq!(page.elements[1].locator.as_str(), "html > body > button:nth-of-type(2)");
    }

    #[test]
    fn ids_shared_with_pruned_subtrees_are_not_used() {
        // The hidden menu's copy of #q was pruned at capture; the live page flagged the id.
        let tree = PageTree {
            url: "https://example.com/".into(),
            title: None,
            root: Element::new("html").child(
                Element::new("body")
                    .child(Element::new("div").attr("id", "menu").hidden())
                    .child(Element::new("input").attr("id", "q").with_shared_id())
                    .child(Element::new("button").attr("id", "go").with_text("Go")),
            ),
        };
        let page = PageSimplifier::default().simplify(&tree);
        let locators: Vec<_> = page.elements.iter().map(|e| e.locator.as_str()).collect();
        assert_eq!(locators, vec!["html > body > input", "#go"]);
    }

    #[test]
    fn oversized_pages_truncate_in_document_order() {
        let mut list = Element::new("ul");
        for i in 0..10 {
            list = list.child(
                Element::new("li").child(Element::new("a").attr("href", format!("/r/{i}")).with_text(format!("Result {i}"))),
            );
        }
        let tree = PageTree {
            url: "https://example.com/".into(),
            title: None,
            root: Element::new("html").child(Element::new("body").child(list)),
        };
        let simplifier = PageSimplifier::new(SimplifierConfig {
            max_elements: 3,
            max_fragments: 4,
            ..Default::default()
        });
        let page = simplifier.simplify(&tree);
        assert!(page.truncated);
        assert_eq!(page.elements.len(), 3);
        assert_eq!(page.elements[2].label, "Result 2");
        assert_eq!(page.fragments.len(), 4);
        assert_eq!(page.fragments[3].text, "Result 3");
    }

    #[test]
    fn validation_rejects_unknown_locators() {
        let page = PageSimplifier::default().simplify(&search_page());
        let ok = Action::Click { target: Locator::new("#searchInput") };
        let bad = Action::Click { target: Locator::new("#nope") };
        assert!(page.validate(&ok).is_ok());
        assert_eq!(
            page.validate(&bad),
            Err(PlanningError::InvalidReference(Locator::new("#nope")))
        );
        assert!(page.validate(&Action::Scrape { finish_after: false }).is_ok());
    }

    #[test]
    fn render_lists_locators_verbatim() {
        let rendered = PageSimplifier::default().simplify(&search_page()).render();
        assert!(rendered.contains("[0] textbox \"Search Wikipedia\" locator=`#searchInput`"));
        assert!(rendered.contains("- The free encyclopedia"));
        assert!(!rendered.contains("Terms of use"));
        assert!(!rendered.contains("Ghost"));
    }
}
