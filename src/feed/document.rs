// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small owned element tree with namespace-tolerant lookups.
//!
//! Names passed to the lookup methods are qualified names as they appear in
//! feeds (`itunes:duration`, `title`). A lookup first tries the exact
//! qualified name and then falls back to the local name alone, so
//! `itunes:author` still finds `<author>` and `duration` finds
//! `<itunes:duration>`.

use xml::reader::{ParserConfig, XmlEvent};

use crate::error::ParseError;

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Attribute {
    name: String,
    value: String,
}

/// An XML element with its attributes and child nodes
#[derive(Debug, Clone)]
pub struct Element {
    prefix: Option<String>,
    name: String,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
}

/// Parse a document and return its root element
pub fn parse_document(text: &str) -> Result<Element, ParseError> {
    let reader = ParserConfig::new()
        .cdata_to_characters(true)
        .ignore_comments(true)
        .create_reader(text.as_bytes());

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    for event in reader {
        match event? {
            XmlEvent::StartElement {
                name, attributes, ..
            } => {
                stack.push(Element {
                    prefix: name.prefix,
                    name: name.local_name,
                    attributes: attributes
                        .into_iter()
                        .map(|attr| Attribute {
                            name: attr.name.local_name,
                            value: attr.value,
                        })
                        .collect(),
                    children: Vec::new(),
                });
            }
            XmlEvent::EndElement { .. } => {
                if let Some(element) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(element)),
                        None => root = Some(element),
                    }
                }
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) | XmlEvent::Whitespace(text) => {
                if let Some(current) = stack.last_mut() {
                    current.children.push(Node::Text(text));
                }
            }
            _ => {}
        }
    }

    root.ok_or(ParseError::UnrecognizedFormat)
}

fn split_qualified(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

impl Element {
    /// Local name without prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }

    fn matches_exact(&self, qname: &str) -> bool {
        let (prefix, local) = split_qualified(qname);
        self.prefix.as_deref() == prefix && self.name == local
    }

    fn matches_local(&self, qname: &str) -> bool {
        self.name == split_qualified(qname).1
    }

    fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// First direct child with the given name
    pub fn child(&self, qname: &str) -> Option<&Element> {
        self.child_elements()
            .find(|el| el.matches_exact(qname))
            .or_else(|| self.child_elements().find(|el| el.matches_local(qname)))
    }

    /// Direct children whose local name matches, in document order
    pub fn children_named<'a>(&'a self, qname: &'a str) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |el| el.matches_local(qname))
    }

    /// First descendant (pre-order, self excluded) with the given name
    pub fn descendant(&self, qname: &str) -> Option<&Element> {
        self.find_descendant(&|el| el.matches_exact(qname))
            .or_else(|| self.find_descendant(&|el| el.matches_local(qname)))
    }

    fn find_descendant(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        for child in self.child_elements() {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_descendant(pred) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants whose local name matches, in document order
    pub fn descendants_named(&self, qname: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect_named(split_qualified(qname).1, &mut found);
        found
    }

    fn collect_named<'a>(&'a self, local: &str, found: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            if child.name == local {
                found.push(child);
            }
            child.collect_named(local, found);
        }
    }

    /// Attribute value by local name
    pub fn attr(&self, name: &str) -> Option<&str> {
        let local = split_qualified(name).1;
        self.attributes
            .iter()
            .find(|attr| attr.name == local)
            .map(|attr| attr.value.as_str())
    }

    /// Non-empty, trimmed attribute value
    pub fn attr_value(&self, name: &str) -> Option<String> {
        self.attr(name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
    }

    /// Concatenated text of this element and all its descendants, trimmed
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out.trim().to_string()
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => element.collect_text(out),
            }
        }
    }

    /// Text directly inside this element, ignoring child elements
    pub fn own_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Trimmed text of the named direct child, if present and non-empty
    pub fn child_text(&self, qname: &str) -> Option<String> {
        self.child(qname)
            .map(Element::text)
            .filter(|text| !text.is_empty())
    }
}
