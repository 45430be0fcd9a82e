//! Domain models for dcmview
//!
//! The attribute tree and the parser that builds it, without any I/O
//! concerns. Reading the dump from the external tool lives in
//! [`crate::convert`].

mod attribute;
mod filter;
mod parser;

pub use attribute::{
    AttributeNode, AttributeValue, MetadataTree, NodeKind, RecordKind, ITEM_KEY, RECORD_SEQUENCE,
    RECORD_TYPE, REFERENCED_FILE,
};
pub use filter::{ExclusionRules, FilterError, DEFAULT_PATTERNS};
pub use parser::{collapse_whitespace, parse, ParseError};
