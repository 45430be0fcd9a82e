//! Rendered document: lines plus the image slots embedded in them
//!
//! A document is built once per load. Afterwards only slots change, and a
//! slot changes at most once (pending placeholder to ready artifact).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Marker appended to truncated attribute names
pub const ELLIPSIS: char = '…';

/// Index of a slot within its document
pub type SlotId = usize;

/// Artifact variants produced from a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Small PNG shown next to a directory record
    Thumbnail,
    /// Large PNG shown at the top of a single-file view
    Image,
    /// MP4 preview of a multi-frame file
    Video,
}

impl ArtifactKind {
    pub fn ext(self) -> &'static str {
        match self {
            ArtifactKind::Thumbnail | ArtifactKind::Image => "png",
            ArtifactKind::Video => "mp4",
        }
    }

    /// Cache key of this variant of a source file
    pub fn cache_key(self, source: &Path) -> String {
        let path = source.to_string_lossy();
        match self {
            ArtifactKind::Thumbnail => path.into_owned(),
            ArtifactKind::Image => format!("{path}:large"),
            ArtifactKind::Video => format!("{path}:video"),
        }
    }
}

/// Blank image standing in for an artifact that is not converted yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placeholder {
    pub width: u32,
    pub height: u32,
}

impl Placeholder {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }

    /// Placeholder `height` pixels tall with the aspect of a `columns` x `rows` image
    pub fn scaled(height: u32, (columns, rows): (u32, u32)) -> Self {
        let width = (u64::from(height) * u64::from(columns) + u64::from(rows) / 2) / u64::from(rows.max(1));
        Self {
            width: width.clamp(1, u64::from(u32::MAX)) as u32,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Pending { placeholder: Placeholder },
    Ready { artifact: PathBuf },
}

/// A position in the document bound to an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderSlot {
    /// Line holding the slot
    pub line: usize,
    pub source: PathBuf,
    pub kind: ArtifactKind,
    pub state: SlotState,
}

impl RenderSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, SlotState::Ready { .. })
    }

    pub fn artifact(&self) -> Option<&Path> {
        match &self.state {
            SlotState::Ready { artifact } => Some(artifact),
            SlotState::Pending { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Line {
    Heading { level: usize, text: String },
    Field {
        key: String,
        value: String,
        /// Untruncated name, present when `key` was shortened
        #[serde(skip_serializing_if = "Option::is_none")]
        full_key: Option<String>,
    },
    Note { text: String },
    Slot { slot: SlotId },
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    lines: Vec<Line>,
    slots: Vec<RenderSlot>,

    #[serde(skip)]
    field_width: usize,
}

impl Document {
    pub fn new(field_width: usize) -> Self {
        Self {
            lines: Vec::new(),
            slots: Vec::new(),
            field_width: field_width.max(2),
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn slots(&self) -> &[RenderSlot] {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<&RenderSlot> {
        self.slots.get(id)
    }

    /// Line the next push will occupy
    pub fn cursor(&self) -> usize {
        self.lines.len()
    }

    fn push(&mut self, line: Line) -> usize {
        self.lines.push(line);
        self.lines.len() - 1
    }

    pub fn push_heading(&mut self, level: usize, text: impl Into<String>) -> usize {
        self.push(Line::Heading {
            level: level.max(1),
            text: text.into(),
        })
    }

    /// Adds an attribute line, truncating long names
    pub fn push_field(&mut self, key: &str, value: &str) -> usize {
        let (shown, full_key) = if key.chars().count() > self.field_width {
            let mut short: String = key.chars().take(self.field_width - 1).collect();
            short.push(ELLIPSIS);
            (short, Some(key.to_string()))
        } else {
            (key.to_string(), None)
        };

        self.push(Line::Field {
            key: shown,
            value: value.to_string(),
            full_key,
        })
    }

    pub fn push_note(&mut self, text: impl Into<String>) -> usize {
        self.push(Line::Note { text: text.into() })
    }

    pub fn push_slot(&mut self, source: PathBuf, kind: ArtifactKind, state: SlotState) -> SlotId {
        let id = self.slots.len();
        let line = self.push(Line::Slot { slot: id });
        self.slots.push(RenderSlot {
            line,
            source,
            kind,
            state,
        });
        id
    }

    /// Binds a pending slot to its artifact
    ///
    /// Returns false if the slot does not exist or was already bound.
    pub fn patch(&mut self, id: SlotId, artifact: PathBuf) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) if !slot.is_ready() => {
                slot.state = SlotState::Ready { artifact };
                true
            }
            _ => false,
        }
    }

    /// Full attribute name of a field line
    pub fn full_key(&self, line: usize) -> Option<&str> {
        match self.lines.get(line)? {
            Line::Field { key, full_key, .. } => Some(full_key.as_deref().unwrap_or(key)),
            _ => None,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_ready()).count()
    }

    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_ready()).count()
    }

    /// Plain-text rendering
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Heading { level, text } => {
                    let _ = writeln!(out, "{} {}", "#".repeat((*level).min(6)), text);
                }
                Line::Field { key, value, .. } => {
                    let _ = writeln!(out, "{key:<width$}  {value}", width = self.field_width);
                }
                Line::Note { text } => {
                    let _ = writeln!(out, "({text})");
                }
                Line::Slot { slot } => {
                    let Some(slot) = self.slots.get(*slot) else {
                        continue;
                    };
                    let label = match slot.kind {
                        ArtifactKind::Thumbnail => "thumbnail",
                        ArtifactKind::Image => "image",
                        ArtifactKind::Video => "video",
                    };
                    let _ = match &slot.state {
                        SlotState::Ready { artifact } => {
                            writeln!(out, "[{label}: {}]", artifact.display())
                        }
                        SlotState::Pending { placeholder } => writeln!(
                            out,
                            "[{label} pending: {}x{}]",
                            placeholder.width, placeholder.height
                        ),
                    };
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_keys_are_truncated() {
        let mut doc = Document::new(8);
        let short = doc.push_field("Modality", "CT");
        let long = doc.push_field("ReferencedFileID", "DIR\\IMG1");

        assert_eq!(
            doc.lines()[long],
            Line::Field {
                key: "Referen…".to_string(),
                value: "DIR\\IMG1".to_string(),
                full_key: Some("ReferencedFileID".to_string()),
            }
        );
        assert_eq!(doc.full_key(long), Some("ReferencedFileID"));
        assert_eq!(doc.full_key(short), Some("Modality"));
        assert_eq!(doc.full_key(99), None);
    }

    #[test]
    fn truncated_keys_keep_full_name_in_json() {
        let mut doc = Document::new(8);
        doc.push_field("Modality", "CT");
        doc.push_field("ReferencedFileID", "DIR\\IMG1");

        let json = serde_json::to_value(&doc).unwrap();
        let lines = json["lines"].as_array().unwrap();
        assert_eq!(lines[0]["key"], "Modality");
        assert!(lines[0].get("full_key").is_none());
        assert_eq!(lines[1]["key"], "Referen…");
        assert_eq!(lines[1]["full_key"], "ReferencedFileID");
    }

    #[test]
    fn slot_patches_once() {
        let mut doc = Document::new(30);
        doc.push_heading(1, "Patient");
        let id = doc.push_slot(
            PathBuf::from("/data/IMG1"),
            ArtifactKind::Thumbnail,
            SlotState::Pending {
                placeholder: Placeholder::square(128),
            },
        );

        assert_eq!(doc.slot(id).unwrap().line, 1);
        assert_eq!(doc.pending_count(), 1);

        assert!(doc.patch(id, PathBuf::from("/cache/a.png")));
        assert!(!doc.patch(id, PathBuf::from("/cache/b.png")));
        assert!(!doc.patch(7, PathBuf::from("/cache/c.png")));

        assert_eq!(doc.slot(id).unwrap().artifact(), Some(Path::new("/cache/a.png")));
        assert_eq!(doc.ready_count(), 1);
        assert_eq!(doc.pending_count(), 0);
    }

    #[test]
    fn cache_keys_distinguish_variants() {
        let source = Path::new("/data/IMG1");
        assert_eq!(ArtifactKind::Thumbnail.cache_key(source), "/data/IMG1");
        assert_eq!(ArtifactKind::Image.cache_key(source), "/data/IMG1:large");
        assert_eq!(ArtifactKind::Video.cache_key(source), "/data/IMG1:video");
        assert_eq!(ArtifactKind::Video.ext(), "mp4");
    }

    #[test]
    fn placeholder_keeps_aspect() {
        assert_eq!(
            Placeholder::scaled(512, (256, 512)),
            Placeholder {
                width: 256,
                height: 512
            }
        );
        assert_eq!(Placeholder::scaled(100, (4, 3)).width, 133);
    }

    #[test]
    fn text_rendering() {
        let mut doc = Document::new(10);
        doc.push_heading(2, "Study: CT HEAD");
        doc.push_field("StudyDate", "20240102");
        doc.push_slot(
            PathBuf::from("/data/IMG1"),
            ArtifactKind::Thumbnail,
            SlotState::Pending {
                placeholder: Placeholder::square(64),
            },
        );

        assert_eq!(
            doc.to_text(),
            "## Study: CT HEAD\nStudyDate   20240102\n[thumbnail pending: 64x64]\n"
        );
    }
}
