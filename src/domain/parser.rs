//! Attribute dump parser
//!
//! Turns the XML written by the dump tool into a [`MetadataTree`]. The dump
//! looks like:
//!
//! ```text
//! <file-format>
//!   <meta-header> <element name=".." ...>text</element> ... </meta-header>
//!   <data-set>
//!     <element tag="0010,0010" vr="PN" name="PatientName">Doe^John</element>
//!     <sequence name="DirectoryRecordSequence">
//!       <item> <element ...>..</element> </item>
//!     </sequence>
//!   </data-set>
//! </file-format>
//! ```
//!
//! The XML is first read into a small element tree, which is then filtered
//! and converted recursively.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::attribute::{AttributeNode, MetadataTree, ITEM_KEY, RECORD_SEQUENCE};
use super::filter::ExclusionRules;

/// Names the dump tool uses for attributes it could not identify
const UNREADABLE_NAMES: &[&str] = &["?", "Unknown Tag & Data", "Unknown Tag"];

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Malformed attribute dump at byte {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("Attribute dump ended inside <{0}>")]
    Unclosed(String),

    #[error("Attribute dump has no data set")]
    MissingDataSet,
}

/// An XML element as read from the dump, before filtering
#[derive(Debug, Default)]
struct RawElement {
    tag: String,
    attrs: HashMap<String, String>,
    text: String,
    children: Vec<RawElement>,
}

impl RawElement {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let mut attrs = HashMap::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = match attr.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).to_string(),
            };
            attrs.insert(key, value);
        }

        Self {
            tag: String::from_utf8_lossy(e.name().as_ref()).to_string(),
            attrs,
            ..Self::default()
        }
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    fn child(&self, tag: &str) -> Option<&RawElement> {
        self.children.iter().find(|child| child.tag == tag)
    }
}

/// Reads the dump into a list of root elements
fn read_elements(dump: &str) -> Result<Vec<RawElement>, ParseError> {
    let mut reader = Reader::from_str(dump);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<RawElement> = Vec::new();
    let mut roots = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(RawElement::from_start(&e)),
            Ok(Event::Empty(e)) => attach(&mut stack, &mut roots, RawElement::from_start(&e)),
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| ParseError::Xml {
                    position: reader.buffer_position(),
                    message: err.to_string(),
                })?;
                if let Some(open) = stack.last_mut() {
                    if !open.text.is_empty() {
                        open.text.push(' ');
                    }
                    open.text.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                // Mismatched end tags are rejected by the reader itself
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut roots, element);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    match stack.pop() {
        Some(open) => Err(ParseError::Unclosed(open.tag)),
        None => Ok(roots),
    }
}

fn attach(stack: &mut [RawElement], roots: &mut Vec<RawElement>, element: RawElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => roots.push(element),
    }
}

/// Collapses whitespace and control runs to single spaces
pub fn collapse_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the attribute name, or None for unreadable attributes
fn readable_name(element: &RawElement) -> Option<&str> {
    element
        .attr("name")
        .map(str::trim)
        .filter(|name| !name.is_empty() && !UNREADABLE_NAMES.contains(name))
}

fn sort_by_key(nodes: &mut [AttributeNode]) {
    // Stable: items (all keyed `Item`) keep their source order
    nodes.sort_by(|a, b| a.key.cmp(&b.key));
}

/// Converts one element, applying the filters
fn parse_node(element: &RawElement, rules: &ExclusionRules) -> Option<AttributeNode> {
    let name = readable_name(element)?;
    if rules.is_excluded(name) {
        return None;
    }

    match element.tag.as_str() {
        "element" => {
            if element.attr("binary") == Some("hidden") {
                return None;
            }
            Some(AttributeNode::leaf(name, collapse_whitespace(&element.text)))
        }
        "sequence" => {
            let mut items = parse_items(element, rules);
            if items.is_empty() {
                return None;
            }
            sort_by_key(&mut items);
            Some(AttributeNode::sequence(name, items))
        }
        // Pixel sequences and anything else carry no displayable text
        _ => None,
    }
}

/// Converts the items of a sequence, dropping items left empty
fn parse_items(sequence: &RawElement, rules: &ExclusionRules) -> Vec<AttributeNode> {
    sequence
        .children
        .iter()
        .filter(|child| child.tag == "item")
        .filter_map(|item| {
            let attributes = parse_attributes(&item.children, rules);
            (!attributes.is_empty()).then(|| AttributeNode::sequence(ITEM_KEY, attributes))
        })
        .collect()
}

fn parse_attributes(elements: &[RawElement], rules: &ExclusionRules) -> Vec<AttributeNode> {
    let mut nodes: Vec<_> = elements
        .iter()
        .filter_map(|element| parse_node(element, rules))
        .collect();
    sort_by_key(&mut nodes);
    nodes
}

/// Parses an attribute dump into a filtered tree
pub fn parse(dump: &str, rules: &ExclusionRules) -> Result<MetadataTree, ParseError> {
    let roots = read_elements(dump)?;

    let (meta_header, data_set) = match roots.iter().find(|root| root.tag == "file-format") {
        Some(file_format) => (file_format.child("meta-header"), file_format.child("data-set")),
        None => (None, roots.iter().find(|root| root.tag == "data-set")),
    };
    let data_set = data_set.ok_or(ParseError::MissingDataSet)?;

    let mut tree = MetadataTree::default();
    for element in meta_header
        .into_iter()
        .chain(std::iter::once(data_set))
        .flat_map(|section| section.children.iter())
    {
        let is_listing = element.tag == "sequence" && readable_name(element) == Some(RECORD_SEQUENCE);
        if is_listing && !rules.is_excluded(RECORD_SEQUENCE) {
            tree.directory = true;
            tree.records.extend(parse_items(element, rules));
            continue;
        }

        if let Some(node) = parse_node(element, rules) {
            tree.attributes.push(node);
        }
    }
    sort_by_key(&mut tree.attributes);

    Ok(tree)
}
