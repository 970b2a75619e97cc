/// The document value object handed over by the host editor.
///
/// The host renders a note and captures it as a `DocumentSnapshot`: a small
/// element tree, the page stylesheet text, the styles of a few wrapper
/// elements, and the note's stored share metadata. The pipeline mutates the
/// snapshot in place and serializes it to HTML at the end; it never reaches
/// back into the host.
pub mod links;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text children are emitted verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// A node in the captured document tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Element(Element),
    Text { text: String },
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text { text: text.into() }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

/// What to do with an element visited by [`Element::rewrite`].
pub enum Rewrite {
    /// Keep the element and descend into its children.
    Keep,
    /// Drop the element and its subtree.
    Remove,
    /// Swap the element for another node; the replacement is not visited.
    Replace(Node),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_child(Node::text(text))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// Simple `tag.class` match; an empty class matches any element of the tag.
    pub fn is(&self, tag: &str, class: &str) -> bool {
        self.tag == tag && (class.is_empty() || self.has_class(class))
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text { text } => out.push_str(text),
                Node::Element(el) => el.collect_text(out),
            }
        }
    }

    /// Visit every descendant element, depth first, in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect_descendants(&mut out);
        out
    }

    fn collect_descendants<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if let Node::Element(el) = child {
                out.push(el);
                el.collect_descendants(out);
            }
        }
    }

    /// First descendant matching `pred`.
    pub fn find(&self, pred: impl Fn(&Element) -> bool) -> Option<&Element> {
        self.descendants().into_iter().find(|el| pred(el))
    }

    /// Mutably visit every descendant element in document order.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        for child in &mut self.children {
            if let Node::Element(el) = child {
                f(el);
                el.for_each_mut(f);
            }
        }
    }

    /// Rewrite descendants in place. `f` decides per element whether it is
    /// kept (and descended into), removed, or replaced.
    pub fn rewrite(&mut self, f: &mut impl FnMut(&mut Element) -> Rewrite) {
        let children = std::mem::take(&mut self.children);
        for child in children {
            match child {
                Node::Element(mut el) => match f(&mut el) {
                    Rewrite::Keep => {
                        el.rewrite(f);
                        self.children.push(Node::Element(el));
                    }
                    Rewrite::Remove => {}
                    Rewrite::Replace(node) => self.children.push(node),
                },
                text => self.children.push(text),
            }
        }
    }

    /// Serialize the children of this element (like `innerHTML`).
    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        let raw = RAW_TEXT_ELEMENTS.contains(&self.tag.as_str());
        for child in &self.children {
            write_node(child, raw, &mut out);
        }
        out
    }

    /// Serialize the element itself (like `outerHTML`).
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }
}

fn write_node(node: &Node, raw: bool, out: &mut String) {
    match node {
        Node::Text { text } if raw => out.push_str(text),
        Node::Text { text } => escape_into(text, false, out),
        Node::Element(el) => write_element(el, out),
    }
}

fn write_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &el.attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(value, true, out);
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&el.tag.as_str()) {
        return;
    }
    out.push_str(&el.inner_html());
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

/// Classes and inline style captured from a wrapper element of the host UI
/// (`html`, `body`, the preview container, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementStyle {
    pub element: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub style: String,
}

/// Share metadata stored alongside the note by the host (frontmatter).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMetadata {
    /// Share link from the previous publish, including any key fragment.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    /// Title property, used when titles come from frontmatter.
    #[serde(default)]
    pub title: Option<String>,
}

/// Everything the pipeline needs from the host about one note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Host-side identifier of the note (vault path).
    pub path: String,
    /// Root container of the rendered note body.
    pub content: Element,
    /// Concatenated stylesheet text of the rendering context.
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub elements: Vec<ElementStyle>,
    #[serde(default)]
    pub metadata: NoteMetadata,
}

impl DocumentSnapshot {
    pub fn new(path: impl Into<String>, content: Element) -> Self {
        Self {
            path: path.into(),
            content,
            css: String::new(),
            elements: Vec::new(),
            metadata: NoteMetadata::default(),
        }
    }

    /// File name of the note without directories or extension.
    pub fn basename(&self) -> &str {
        let name = self.path.rsplit(['/', '\\']).next().unwrap_or(&self.path);
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// Drop frontmatter/property blocks so private metadata is not shared.
    pub fn strip_frontmatter(&mut self) {
        self.content.rewrite(&mut |el| {
            if el.is("div", "metadata-container")
                || el.is("pre", "frontmatter")
                || el.is("div", "frontmatter-container")
            {
                Rewrite::Remove
            } else {
                Rewrite::Keep
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        Element::new("div")
            .with_child(
                Element::new("pre")
                    .with_attr("class", "frontmatter language-yaml")
                    .with_text("secret: yes"),
            )
            .with_child(Element::new("h1").with_text("Title & <more>"))
            .with_child(
                Element::new("p")
                    .with_text("See ")
                    .with_child(Element::new("img").with_attr("src", "a\"b.png")),
            )
    }

    #[test]
    fn test_html_serialization_escapes() {
        let html = sample().to_html();
        assert!(html.contains("<h1>Title &amp; &lt;more&gt;</h1>"));
        assert!(html.contains("<img src=\"a&quot;b.png\">"));
        assert!(!html.contains("</img>"));
    }

    #[test]
    fn test_raw_text_elements_not_escaped() {
        let el = Element::new("style").with_text("a > b { color: red }");
        assert_eq!(el.to_html(), "<style>a > b { color: red }</style>");
    }

    #[test]
    fn test_strip_frontmatter() {
        let mut doc = DocumentSnapshot::new("notes/My Note.md", sample());
        doc.strip_frontmatter();
        assert!(!doc.content.to_html().contains("secret"));
        assert_eq!(doc.content.children.len(), 2);
    }

    #[test]
    fn test_rewrite_replace_and_text_content() {
        let mut el = sample();
        el.rewrite(&mut |e| {
            if e.tag == "h1" {
                Rewrite::Replace(Node::text("plain"))
            } else {
                Rewrite::Keep
            }
        });
        assert!(el.text_content().contains("plain"));
        assert!(el.find(|e| e.tag == "h1").is_none());
        assert!(el.find(|e| e.tag == "img").is_some());
    }

    #[test]
    fn test_basename() {
        assert_eq!(DocumentSnapshot::new("a/b/My Note.md", Element::new("div")).basename(), "My Note");
        assert_eq!(DocumentSnapshot::new("plain", Element::new("div")).basename(), "plain");
        assert_eq!(DocumentSnapshot::new(".hidden", Element::new("div")).basename(), ".hidden");
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let doc = DocumentSnapshot::new("n.md", sample());
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("\"type\":\"element\""));
        let back: DocumentSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
