/// Link rewriting for published notes.
///
/// Internal links to other documents point at their public URL when the
/// target is published, and collapse to plain text when it is not, so a
/// shared page never links to something readers cannot open.
use std::collections::HashMap;

use tracing::debug;

use super::{Element, Node, Rewrite};
use crate::index::PublishIndex;

/// Counts from one rewrite pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub published: usize,
    pub unpublished: usize,
    pub anchors: usize,
    pub external: usize,
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Give every `data-heading` element an `id`; returns heading -> id.
fn assign_heading_ids(content: &mut Element) -> HashMap<String, String> {
    let mut ids = HashMap::new();
    content.for_each_mut(&mut |el| {
        let Some(heading) = el.attr("data-heading").map(str::to_string) else {
            return;
        };
        let existing = el.attr("id").filter(|id| !id.is_empty()).map(str::to_string);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = slugify(&heading);
                el.set_attr("id", id.clone());
                id
            }
        };
        ids.entry(heading).or_insert(id);
    });
    ids
}

fn link_target(el: &Element) -> Option<String> {
    el.attr("data-href")
        .or_else(|| el.attr("href"))
        .map(|target| {
            urlencoding::decode(target)
                .map(|t| t.into_owned())
                .unwrap_or_else(|_| target.to_string())
        })
}

/// Rewrite every link in `content` against the publish index.
pub fn rewrite_links(content: &mut Element, index: &PublishIndex) -> LinkStats {
    let headings = assign_heading_ids(content);
    let mut stats = LinkStats::default();

    content.rewrite(&mut |el| {
        if el.tag != "a" {
            return Rewrite::Keep;
        }

        if el.has_class("internal-link") {
            let Some(target) = link_target(el) else {
                return Rewrite::Keep;
            };

            if let Some(heading) = target.strip_prefix('#') {
                stats.anchors += 1;
                match headings.get(heading) {
                    Some(id) => el.set_attr("href", format!("#{id}")),
                    None => {
                        el.remove_attr("href");
                    }
                }
                el.remove_attr("data-href");
                el.remove_attr("target");
                return Rewrite::Keep;
            }

            return match index.resolve(&target) {
                Some(published) => {
                    stats.published += 1;
                    el.set_attr("href", published.share_link());
                    el.remove_attr("data-href");
                    el.remove_attr("target");
                    el.remove_attr("rel");
                    Rewrite::Keep
                }
                None => {
                    debug!(target = %target, "Unpublished link target, replacing with text");
                    stats.unpublished += 1;
                    Rewrite::Replace(Node::text(el.text_content()))
                }
            };
        }

        if el.remove_attr("target").is_some() {
            stats.external += 1;
        }
        Rewrite::Keep
    });

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PublishedLink;

    fn internal(target: &str, text: &str) -> Element {
        Element::new("a")
            .with_attr("class", "internal-link")
            .with_attr("data-href", target)
            .with_attr("href", target)
            .with_attr("target", "_blank")
            .with_text(text)
    }

    fn index() -> PublishIndex {
        let mut index = PublishIndex::new();
        index.insert(
            "Published Note.md",
            PublishedLink {
                filename: "abc".into(),
                decryption_key: "key".into(),
                url: "https://share.test/abc".into(),
            },
        );
        index
    }

    #[test]
    fn test_rewrite_links() {
        let mut content = Element::new("div")
            .with_child(Element::new("h2").with_attr("data-heading", "My Section").with_text("My Section"))
            .with_child(
                Element::new("p")
                    .with_child(internal("Published%20Note", "see this"))
                    .with_child(internal("Draft", "draft"))
                    .with_child(internal("#My Section", "jump"))
                    .with_child(internal("#Missing", "nowhere"))
                    .with_child(
                        Element::new("a")
                            .with_attr("class", "external-link")
                            .with_attr("href", "https://example.com")
                            .with_attr("target", "_blank")
                            .with_text("ext"),
                    ),
            );

        let stats = rewrite_links(&mut content, &index());
        assert_eq!(
            stats,
            LinkStats {
                published: 1,
                unpublished: 1,
                anchors: 2,
                external: 1
            }
        );

        let html = content.to_html();
        assert!(html.contains("href=\"https://share.test/abc#key\""));
        assert!(!html.contains("Draft"));
        assert!(content.text_content().contains("draft"));
        assert!(html.contains("id=\"my-section\""));
        assert!(html.contains("href=\"#my-section\""));
        assert!(!html.contains("target="));
        assert!(!html.contains("data-href"));

        let anchors: Vec<_> = content.descendants().into_iter().filter(|e| e.tag == "a").collect();
        assert_eq!(anchors.len(), 4);
        assert_eq!(anchors[2].attr("href"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Ünïcode  heading "), "ünïcode-heading");
    }
}
