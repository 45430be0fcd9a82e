//! Attribute tree model
//!
//! A parsed dump is a [`MetadataTree`]: the file's top-level attributes plus,
//! for directory files (`DICOMDIR`), the flat listing of directory records.
//!
//! Tree shape:
//! - a plain attribute is a leaf holding its text value
//! - a sequence attribute holds one `Item` node per sequence item
//! - an `Item` node holds that item's attributes, sorted by name

use serde::{Deserialize, Serialize};

/// Key of the nodes standing for sequence items
pub const ITEM_KEY: &str = "Item";

/// Marker attribute that turns an item into a directory record
pub const RECORD_TYPE: &str = "DirectoryRecordType";

/// File reference of image records (backslash separated, relative)
pub const REFERENCED_FILE: &str = "ReferencedFileID";

/// Sequence holding the directory records of a `DICOMDIR`
pub const RECORD_SEQUENCE: &str = "DirectoryRecordSequence";

/// A single attribute: a leaf value or a list of child attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeNode {
    pub key: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Sequence(Vec<AttributeNode>),
}

impl AttributeNode {
    pub fn leaf(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AttributeValue::Text(text.into()),
        }
    }

    pub fn sequence(key: impl Into<String>, children: Vec<AttributeNode>) -> Self {
        Self {
            key: key.into(),
            value: AttributeValue::Sequence(children),
        }
    }

    /// Returns the leaf text, if this is a leaf
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            AttributeValue::Text(text) => Some(text),
            AttributeValue::Sequence(_) => None,
        }
    }

    /// Returns the children (empty for leaves)
    pub fn children(&self) -> &[AttributeNode] {
        match &self.value {
            AttributeValue::Text(_) => &[],
            AttributeValue::Sequence(children) => children,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.value, AttributeValue::Sequence(_))
    }

    /// Text of the direct child leaf with the given key
    pub fn child_text(&self, key: &str) -> Option<&str> {
        self.children()
            .iter()
            .find(|child| child.key == key)
            .and_then(AttributeNode::text)
    }

    /// Classifies the node for rendering
    pub fn classify(&self) -> NodeKind<'_> {
        match &self.value {
            AttributeValue::Text(text) => NodeKind::Leaf {
                key: &self.key,
                text,
            },
            AttributeValue::Sequence(children) => match self.child_text(RECORD_TYPE) {
                Some(marker) => {
                    let kind = RecordKind::from_marker(marker);
                    match (kind, self.child_text(REFERENCED_FILE)) {
                        (RecordKind::Image, Some(file)) if !file.is_empty() => {
                            NodeKind::Image { node: self, file }
                        }
                        _ => NodeKind::Record {
                            kind,
                            marker,
                            node: self,
                        },
                    }
                }
                None => NodeKind::Sequence {
                    key: &self.key,
                    children,
                },
            },
        }
    }
}

/// Shape of a node as seen by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind<'a> {
    Leaf {
        key: &'a str,
        text: &'a str,
    },
    Sequence {
        key: &'a str,
        children: &'a [AttributeNode],
    },
    Record {
        kind: RecordKind,
        marker: &'a str,
        node: &'a AttributeNode,
    },
    Image {
        node: &'a AttributeNode,
        file: &'a str,
    },
}

/// Kind of a directory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Patient,
    Study,
    Series,
    Image,
    Other,
}

impl RecordKind {
    pub fn from_marker(marker: &str) -> Self {
        match marker.trim().to_ascii_uppercase().as_str() {
            "PATIENT" => RecordKind::Patient,
            "STUDY" => RecordKind::Study,
            "SERIES" => RecordKind::Series,
            "IMAGE" => RecordKind::Image,
            _ => RecordKind::Other,
        }
    }

    /// Heading depth of records of this kind
    pub fn level(self) -> usize {
        match self {
            RecordKind::Patient => 1,
            RecordKind::Study => 2,
            RecordKind::Series => 3,
            RecordKind::Image | RecordKind::Other => 4,
        }
    }

    /// Attributes summarizing a record in its heading, in priority order
    pub fn summary_keys(self) -> &'static [&'static str] {
        match self {
            RecordKind::Patient => &["PatientName", "PatientID"],
            RecordKind::Study => &["StudyDescription", "StudyDate"],
            RecordKind::Series => &["Modality", "SeriesDescription"],
            RecordKind::Image => &["InstanceNumber"],
            RecordKind::Other => &[],
        }
    }
}

/// A parsed attribute dump
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTree {
    /// Top-level attributes, sorted by key
    pub attributes: Vec<AttributeNode>,

    /// Directory records in source order
    pub records: Vec<AttributeNode>,

    /// Whether the dump held a directory record sequence
    pub directory: bool,
}

impl MetadataTree {
    /// Text of a top-level leaf attribute
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|node| node.key == key)
            .and_then(AttributeNode::text)
    }

    fn get_number<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        // Multi-valued attributes are backslash separated; use the first value
        self.get(key)
            .and_then(|text| text.split('\\').next())
            .and_then(|text| text.trim().parse().ok())
    }

    /// Image size as (columns, rows), if the file carries pixel geometry
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let columns = self.get_number::<u32>("Columns")?;
        let rows = self.get_number::<u32>("Rows")?;
        (columns > 0 && rows > 0).then_some((columns, rows))
    }

    /// Number of frames (1 when unspecified)
    pub fn frame_count(&self) -> u32 {
        self.get_number::<u32>("NumberOfFrames").unwrap_or(1).max(1)
    }

    pub fn is_multi_frame(&self) -> bool {
        self.frame_count() > 1
    }

    /// Playback rate recorded in the file, if any
    pub fn frame_rate(&self) -> Option<f64> {
        ["RecommendedDisplayFrameRate", "CineRate"]
            .iter()
            .filter_map(|key| self.get_number::<f64>(key))
            .find(|rate| *rate > 0.0)
    }
}
