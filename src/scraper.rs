use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::Computer;
use crate::dom::{collapse_whitespace, resolve_link, DomNode, Element, PageTree};
use crate::error::ComputerError;

/// Elements that form one record on their own (search hits, rows, list items).
const RECORD_TAGS: &[&str] = &[
    "li", "p", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "dt", "dd", "figcaption", "blockquote",
    "article",
];

/// Controls whose text is chrome, not content.
const SKIPPED_TAGS: &[&str] = &["button", "select", "option", "textarea", "input", "nav"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub text: String,
    pub link: Option<String>,
}

#[derive(Default)]
struct Harvest {
    items: Vec<ScrapedItem>,
    dropped: usize,
}

#[derive(Clone, Debug)]
pub struct Scraper {
    pub capture_timeout: Duration,
    pub max_items: usize,
}

impl Default for Scraper {
    fn default() -> Self {
        Self { capture_timeout: Duration::from_secs(10), max_items: 500 }
    }
}

impl Scraper {
    /// Read the live page and extract its records. An empty page yields no items.
    pub async fn scrape<C>(&self, computer: &C) -> Result<Vec<ScrapedItem>, ComputerError>
    where
        C: Computer + ?Sized,
    {
        let tree = tokio::time::timeout(self.capture_timeout, computer.page_tree())
            .await
            .map_err(|_| ComputerError::Timeout(self.capture_timeout))??;
        Ok(self.extract(&tree))
    }

    pub fn extract(&self, tree: &PageTree) -> Vec<ScrapedItem> {
        let harvest = self.harvest(tree);
        if harvest.dropped > 0 {
            warn!(
                url = %tree.url,
                kept = harvest.items.len(),
                dropped = harvest.dropped,
                "scrape hit the item cap, later records were dropped"
            );
        } else {
            debug!(url = %tree.url, items = harvest.items.len(), "scraped page");
        }
        harvest.items
    }

    fn harvest(&self, tree: &PageTree) -> Harvest {
        let mut out = Harvest::default();
        self.walk(&tree.root, &tree.url, None, &mut out);
        out
    }

    fn walk(&self, el: &Element, base: &str, link: Option<&str>, out: &mut Harvest) {
        if el.is_noise() || SKIPPED_TAGS.contains(&el.tag.as_str()) {
            return;
        }
        let link = el.navigable_href().or(link);

        if RECORD_TAGS.contains(&el.tag.as_str()) || el.navigable_href().is_some() {
            let text = el.text_content();
            if !text.is_empty() {
                // Own or enclosing anchor first, then the first anchor inside.
                let href = link.or_else(|| el.first_descendant_href());
                self.push(out, text, href.map(|h| resolve_link(base, h)));
            }
            return;
        }

        for child in &el.children {
            match child {
                DomNode::Text { text } => {
                    let text = collapse_whitespace(text);
                    if !text.is_empty() {
                        self.push(out, text, link.map(|h| resolve_link(base, h)));
                    }
                }
                DomNode::Element(child) => self.walk(child, base, link, out),
            }
        }
    }

    fn push(&self, out: &mut Harvest, text: String, link: Option<String>) {
        if out.items.len() < self.max_items {
            out.items.push(ScrapedItem { text, link });
        } else {
            out.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: Element) -> PageTree {
        PageTree {
            url: "https://shop.example/search?q=shoes".into(),
            title: None,
            root: Element::new("html").child(body),
        }
    }

    #[test]
    fn associates_links_from_self_ancestor_or_descendant() {
        let tree = page(
            Element::new("body")
                .child(
                    Element::new("ul")
                        .child(Element::new("li").child(
                            Element::new("a").attr("href", "/p/1").child(Element::new("span").with_text("Red shoe")),
                        ))
                        .child(
                            Element::new("li")
                                .with_text("Blue shoe")
                                .child(Element::new("a").attr("href", "/p/2").with_text("details")),
                        ),
                )
                .child(Element::new("h3").with_text("No link here"))
                .child(Element::new("a").attr("href", "https://other.example/").with_text("Partner")),
        );
        let items = Scraper::default().extract(&tree);
        assert_eq!(
            items,
            vec![
                ScrapedItem { text: "Red shoe".into(), link: Some("https://shop.example/p/1".into()) },
                ScrapedItem { text: "Blue shoe details".into(), link: Some("https://shop.example/p/2".into()) },
                ScrapedItem { text: "No link here".into(), link: None },
                ScrapedItem { text: "Partner".into(), link: Some("https://other.example/".into()) },
            ]
        );
    }

    #[test]
    fn text_inside_an_anchor_wrapper_inherits_its_link() {
        let tree = page(Element::new("body").child(
            Element::new("a").attr("href", "/card").child(Element::new("div").child(Element::new("p").with_text("Card title"))),
        ));
        let items = Scraper::default().extract(&tree);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link.as_deref(), Some("https://shop.example/card"));
    }

    #[test]
    fn item_cap_keeps_the_first_records_and_counts_the_rest() {
        let mut list = Element::new("ul");
        for i in 0..5 {
            list = list.child(Element::new("li").with_text(format!("Item {i}")));
        }
        let tree = page(Element::new("body").child(list));
        let scraper = Scraper { max_items: 3, ..Default::default() };

        let harvest = scraper.harvest(&tree);
        assert_eq!(harvest.dropped, 2);
        let texts: Vec<_> = scraper.extract(&tree).into_iter().map(|i| i.text).collect();
        assert_eq!(texts, vec!["Item 0", "Item 1", "Item 2"]);
    }

    #[test]
    fn empty_page_yields_no_items() {
        let tree = page(Element::new("body").child(Element::new("script").with_text("x()")).child(Element::new("div")));
        assert!(Scraper::default().extract(&tree).is_empty());
    }

    #[test]
    fn hidden_content_and_controls_are_ignored() {
        let tree = page(
            Element::new("body")
                .child(Element::new("p").hidden().with_text("invisible"))
                .child(Element::new("button").with_text("Add to cart"))
                .with_text("loose text"),
        );
        let items = Scraper::default().extract(&tree);
        assert_eq!(items, vec![ScrapedItem { text: "loose text".into(), link: None }]);
    }
}
