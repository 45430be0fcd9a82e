//! # Rendering
//!
//! Turns a [`MetadataTree`](crate::domain::MetadataTree) into a [`Document`]
//! of headings, attribute lines and image slots.
//!
//! Slots start either ready (cache hit) or pending with a placeholder; a
//! pending slot is patched in place when its conversion succeeds and stays
//! a placeholder otherwise.

mod binder;
mod document;

pub use binder::{conversion_job, resolve_reference, Binder, View};
pub use document::{
    ArtifactKind, Document, Line, Placeholder, RenderSlot, SlotId, SlotState, ELLIPSIS,
};
