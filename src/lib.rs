//! dcmview - DICOM metadata and thumbnail renderer
//!
//! Reads the attribute dump of a DICOM file or `DICOMDIR`, filters it into a
//! tree and renders it as a document whose image slots are filled in by
//! external conversion tools running in a bounded pool. Converted artifacts
//! are kept in a shared on-disk cache.

pub mod cli;
pub mod convert;
pub mod domain;
pub mod render;
pub mod session;
pub mod storage;

pub use domain::{AttributeNode, MetadataTree, NodeKind};
pub use render::{Document, RenderSlot, View};
pub use session::{LoadError, PlayStatus, Session, SetupError};
