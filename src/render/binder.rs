//! Binds a metadata tree to a document
//!
//! The walk is depth first and runs once per load. Every image reference
//! becomes a [`RenderSlot`](super::RenderSlot): bound to the cached artifact
//! when it exists, otherwise to a placeholder plus a conversion job whose
//! callback patches every slot showing that artifact.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use super::document::{ArtifactKind, Document, Placeholder, SlotId, SlotState};
use crate::convert::{ConversionJob, JobOutcome, Launcher, Scheduler, Stage, ToolSet};
use crate::domain::{AttributeNode, MetadataTree, NodeKind, RecordKind, ITEM_KEY};
use crate::storage::{CacheEntry, CacheStore, DisplayConfig};

/// Per-view state that conversion callbacks operate on
#[derive(Debug)]
pub struct View {
    pub document: Document,

    /// Messages for the user raised after loading (player launches, failures)
    pub notices: Vec<String>,
}

impl View {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            notices: Vec::new(),
        }
    }
}

/// Settings and collaborators of one binding pass
pub struct Binder<'a, L: Launcher> {
    tools: &'a ToolSet,
    cache: &'a Rc<dyn CacheStore>,
    scheduler: &'a mut Scheduler<View, L>,
    display: &'a DisplayConfig,
    now: Instant,

    /// Slots waiting on each output submitted during this pass
    waiting: HashMap<PathBuf, Rc<RefCell<Vec<SlotId>>>>,
}

impl<'a, L: Launcher> Binder<'a, L> {
    pub fn new(
        tools: &'a ToolSet,
        cache: &'a Rc<dyn CacheStore>,
        scheduler: &'a mut Scheduler<View, L>,
        display: &'a DisplayConfig,
        now: Instant,
    ) -> Self {
        Self {
            tools,
            cache,
            scheduler,
            display,
            now,
            waiting: HashMap::new(),
        }
    }

    /// Builds the document for a parsed file, submitting conversions for
    /// every artifact missing from the cache
    pub fn bind(mut self, tree: &MetadataTree, source: &Path) -> Document {
        let mut doc = Document::new(self.display.field_width);

        if !tree.directory {
            if let Some(dimensions) = tree.dimensions() {
                let height = self.display.image_size;
                self.bind_artifact(
                    &mut doc,
                    source,
                    ArtifactKind::Image,
                    Placeholder::scaled(height, dimensions),
                    height,
                );
            }
            if tree.is_multi_frame() {
                doc.push_note(format!(
                    "{} frames; playback available",
                    tree.frame_count()
                ));
            }
        }

        for node in &tree.attributes {
            self.walk(&mut doc, node, 1, source);
        }

        for record in &tree.records {
            self.walk(&mut doc, record, 1, source);
        }

        tracing::debug!(
            source = %source.display(),
            lines = doc.lines().len(),
            slots = doc.slots().len(),
            pending = doc.pending_count(),
            "document bound"
        );
        doc
    }

    fn walk(&mut self, doc: &mut Document, node: &AttributeNode, depth: usize, source: &Path) {
        match node.classify() {
            NodeKind::Leaf { key, text } => {
                doc.push_field(key, text);
            }
            NodeKind::Sequence { key, children } => {
                doc.push_heading(depth, key);
                self.walk_items(doc, children, depth + 1, source);
            }
            NodeKind::Record { kind, marker, node } => {
                doc.push_heading(kind.level(), record_title(kind, marker, node));
                self.walk_children(doc, node, kind.level() + 1, source);
            }
            NodeKind::Image { node, file } => {
                let kind = RecordKind::Image;
                doc.push_heading(kind.level(), record_title(kind, "IMAGE", node));

                let referenced = resolve_reference(source, file);
                let size = self.display.thumbnail_size;
                self.bind_artifact(
                    doc,
                    &referenced,
                    ArtifactKind::Thumbnail,
                    Placeholder::square(size),
                    size,
                );
                self.walk_children(doc, node, kind.level() + 1, source);
            }
        }
    }

    fn walk_children(&mut self, doc: &mut Document, node: &AttributeNode, depth: usize, source: &Path) {
        for child in node.children() {
            self.walk(doc, child, depth, source);
        }
    }

    /// Lists the items of a sequence; a lone item is shown without its own heading
    fn walk_items(&mut self, doc: &mut Document, items: &[AttributeNode], depth: usize, source: &Path) {
        if let [item] = items {
            if item.key == ITEM_KEY && item.is_sequence() {
                self.walk_children(doc, item, depth, source);
                return;
            }
        }

        for (index, item) in items.iter().enumerate() {
            if item.key == ITEM_KEY && item.is_sequence() {
                doc.push_heading(depth, format!("{} {}", ITEM_KEY, index + 1));
                self.walk_children(doc, item, depth + 1, source);
            } else {
                self.walk(doc, item, depth, source);
            }
        }
    }

    /// Adds a slot for an artifact of `source`, converting it if needed
    fn bind_artifact(
        &mut self,
        doc: &mut Document,
        source: &Path,
        kind: ArtifactKind,
        placeholder: Placeholder,
        height: u32,
    ) -> SlotId {
        let pending = SlotState::Pending { placeholder };

        let entry = match self.cache.lookup(&kind.cache_key(source), kind.ext()) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(source = %source.display(), "cache unavailable: {}", e);
                return doc.push_slot(source.to_path_buf(), kind, pending);
            }
        };

        if entry.exists {
            let state = SlotState::Ready {
                artifact: entry.final_path.clone(),
            };
            return doc.push_slot(source.to_path_buf(), kind, state);
        }

        let slot = doc.push_slot(source.to_path_buf(), kind, pending);
        if let Some(slots) = self.waiting.get(&entry.final_path) {
            slots.borrow_mut().push(slot);
            return slot;
        }

        let slots = Rc::new(RefCell::new(vec![slot]));
        self.waiting.insert(entry.final_path.clone(), Rc::clone(&slots));

        let stages = self.tools.image_stages(source, height, &entry.temp_path);
        let job = conversion_job(source, stages, entry, Rc::clone(self.cache), move |view, artifact| {
            for &slot in slots.borrow().iter() {
                view.document.patch(slot, artifact.clone());
            }
        });
        self.scheduler.submit(job, self.now);
        slot
    }
}

/// Creates a job publishing its output through the cache and handing the
/// final path to `on_ready`
///
/// Failed conversions leave nothing behind: the temp output is discarded
/// and `on_ready` is not called.
pub fn conversion_job(
    source: &Path,
    stages: Vec<Stage>,
    entry: CacheEntry,
    cache: Rc<dyn CacheStore>,
    on_ready: impl FnOnce(&mut View, PathBuf) + 'static,
) -> ConversionJob<View> {
    let label = source.display().to_string();
    let temp_path = entry.temp_path.clone();
    let final_path = entry.final_path.clone();

    ConversionJob::new(
        label.clone(),
        stages,
        temp_path,
        final_path,
        move |view: &mut View, outcome: &JobOutcome| {
            if !outcome.success() {
                tracing::warn!(
                    source = %label,
                    state = outcome.state.as_str(),
                    "conversion failed"
                );
                cache.discard(&entry.temp_path);
                return;
            }

            match cache.commit(&entry) {
                Ok(()) => {
                    tracing::debug!(source = %label, elapsed = ?outcome.elapsed, "converted");
                    on_ready(view, entry.final_path);
                }
                Err(e) => {
                    tracing::warn!(source = %label, "could not publish artifact: {}", e);
                    cache.discard(&entry.temp_path);
                }
            }
        },
    )
}

/// Heading text of a directory record
fn record_title(kind: RecordKind, marker: &str, node: &AttributeNode) -> String {
    let name = match kind {
        RecordKind::Patient => "Patient",
        RecordKind::Study => "Study",
        RecordKind::Series => "Series",
        RecordKind::Image => "Image",
        RecordKind::Other => marker.trim(),
    };

    let summary: Vec<&str> = kind
        .summary_keys()
        .iter()
        .filter_map(|key| node.child_text(key))
        .filter(|text| !text.is_empty())
        .collect();

    if summary.is_empty() {
        name.to_string()
    } else {
        format!("{}: {}", name, summary.join(" "))
    }
}

/// Resolves a backslash-separated file reference against the directory of
/// the file that holds it
pub fn resolve_reference(source: &Path, reference: &str) -> PathBuf {
    let mut path = source.parent().map(Path::to_path_buf).unwrap_or_default();
    for component in reference.split('\\').map(str::trim).filter(|c| !c.is_empty()) {
        path.push(component);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ProcessHandle;
    use crate::domain::{parse, ExclusionRules, RECORD_TYPE, REFERENCED_FILE};
    use crate::render::Line;
    use crate::storage::{CacheError, ToolsConfig};
    use std::collections::HashSet;
    use std::io;

    /// In-memory cache: keys listed in `present` are converted
    #[derive(Default)]
    struct MemoryCache {
        present: RefCell<HashSet<String>>,
        committed: RefCell<Vec<PathBuf>>,
        discarded: RefCell<Vec<PathBuf>>,
    }

    impl CacheStore for MemoryCache {
        fn lookup(&self, key: &str, ext: &str) -> Result<CacheEntry, CacheError> {
            Ok(CacheEntry {
                final_path: PathBuf::from(format!("/cache/{key}.{ext}")),
                temp_path: PathBuf::from(format!("/cache/{key}.tmp.{ext}")),
                exists: self.present.borrow().contains(key),
            })
        }

        fn commit(&self, entry: &CacheEntry) -> Result<(), CacheError> {
            self.committed.borrow_mut().push(entry.final_path.clone());
            Ok(())
        }

        fn discard(&self, temp_path: &Path) {
            self.discarded.borrow_mut().push(temp_path.to_path_buf());
        }
    }

    /// Processes finish on the first poll; sources named in `failing` fail
    #[derive(Clone, Default)]
    struct InstantLauncher {
        failing: Rc<RefCell<HashSet<String>>>,
        launched: Rc<RefCell<Vec<String>>>,
    }

    struct InstantHandle(bool);

    impl ProcessHandle for InstantHandle {
        fn try_wait(&mut self) -> io::Result<Option<bool>> {
            Ok(Some(self.0))
        }
        fn terminate(&mut self) {}
        fn kill(&mut self) {}
        fn wait(&mut self) -> io::Result<bool> {
            Ok(self.0)
        }
    }

    impl Launcher for InstantLauncher {
        type Handle = InstantHandle;

        fn launch(&mut self, stages: &[Stage]) -> io::Result<InstantHandle> {
            // Source is the second-to-last argument of the image tool
            let args = &stages[0].args;
            let source = args[args.len() - 2].to_string_lossy().into_owned();
            let ok = !self.failing.borrow().contains(&source);
            self.launched.borrow_mut().push(source);
            Ok(InstantHandle(ok))
        }
    }

    fn tools() -> ToolSet {
        let config = ToolsConfig::default();
        ToolSet {
            dump: PathBuf::from(&config.dump),
            image: PathBuf::from(&config.image),
            frames: None,
            frame_args: config.frame_args,
            encoder: None,
            player: None,
            player_command: "mpv".into(),
            player_options: String::new(),
        }
    }

    fn record(marker: &str, extra: Vec<AttributeNode>) -> AttributeNode {
        let mut children = vec![AttributeNode::leaf(RECORD_TYPE, marker)];
        children.extend(extra);
        AttributeNode::sequence(ITEM_KEY, children)
    }

    fn directory() -> MetadataTree {
        MetadataTree {
            attributes: vec![AttributeNode::leaf("FileSetID", "STUDY_01")],
            records: vec![
                record("PATIENT", vec![AttributeNode::leaf("PatientName", "Doe^John")]),
                record(
                    "IMAGE",
                    vec![
                        AttributeNode::leaf("InstanceNumber", "1"),
                        AttributeNode::leaf(REFERENCED_FILE, "DIR\\IMG1"),
                    ],
                ),
                record("IMAGE", vec![AttributeNode::leaf(REFERENCED_FILE, "DIR\\IMG2")]),
            ],
            directory: true,
        }
    }

    struct Fixture {
        cache: Rc<MemoryCache>,
        launcher: InstantLauncher,
        scheduler: Scheduler<View, InstantLauncher>,
        tools: ToolSet,
        display: DisplayConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let launcher = InstantLauncher::default();
            Self {
                cache: Rc::new(MemoryCache::default()),
                scheduler: Scheduler::new(launcher.clone(), 4, None),
                launcher,
                tools: tools(),
                display: DisplayConfig::default(),
            }
        }

        fn bind(&mut self, tree: &MetadataTree, source: &str) -> View {
            let cache: Rc<dyn CacheStore> = self.cache.clone();
            let doc = Binder::new(
                &self.tools,
                &cache,
                &mut self.scheduler,
                &self.display,
                Instant::now(),
            )
            .bind(tree, Path::new(source));
            View::new(doc)
        }

        fn drain(&mut self, view: &mut View) {
            while !self.scheduler.is_idle() {
                for finished in self.scheduler.poll(Instant::now()) {
                    finished.complete(view);
                }
            }
        }
    }

    fn headings(doc: &Document) -> Vec<(usize, String)> {
        doc.lines()
            .iter()
            .filter_map(|line| match line {
                Line::Heading { level, text } => Some((*level, text.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn directory_records_in_order_with_slots() {
        let mut fx = Fixture::new();
        let mut view = fx.bind(&directory(), "/data/DICOMDIR");

        assert_eq!(
            headings(&view.document),
            vec![
                (1, "Patient: Doe^John".to_string()),
                (4, "Image: 1".to_string()),
                (4, "Image".to_string()),
            ]
        );

        let slots = view.document.slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].source, PathBuf::from("/data/DIR/IMG1"));
        assert_eq!(slots[1].source, PathBuf::from("/data/DIR/IMG2"));
        // Slot follows its record heading directly
        assert_eq!(
            view.document.lines()[slots[0].line - 1],
            Line::Heading {
                level: 4,
                text: "Image: 1".into()
            }
        );
        assert_eq!(fx.scheduler.queued_count() + fx.scheduler.running_count(), 2);
        assert_eq!(view.document.pending_count(), 2);

        fx.drain(&mut view);

        assert_eq!(view.document.pending_count(), 0);
        assert_eq!(
            view.document.slots()[0].artifact(),
            Some(Path::new("/cache//data/DIR/IMG1.png"))
        );
        assert_eq!(fx.cache.committed.borrow().len(), 2);
        assert!(fx.cache.discarded.borrow().is_empty());
    }

    #[test]
    fn two_plain_records_and_one_image() {
        let tree = MetadataTree {
            attributes: Vec::new(),
            records: vec![
                record("PATIENT", vec![AttributeNode::leaf("PatientName", "Doe^John")]),
                record("STUDY", vec![AttributeNode::leaf("StudyDate", "20240102")]),
                record("IMAGE", vec![AttributeNode::leaf(REFERENCED_FILE, "a.dcm")]),
            ],
            directory: true,
        };

        let mut fx = Fixture::new();
        let view = fx.bind(&tree, "/data/DICOMDIR");
        let doc = &view.document;

        assert_eq!(
            headings(doc),
            vec![
                (1, "Patient: Doe^John".to_string()),
                (2, "Study: 20240102".to_string()),
                (4, "Image".to_string()),
            ]
        );
        assert_eq!(doc.slots().len(), 1);
        assert_eq!(
            doc.slots()[0].state,
            SlotState::Pending {
                placeholder: Placeholder::square(128)
            }
        );
        assert_eq!(fx.scheduler.labels(), vec!["/data/a.dcm"]);
    }

    #[test]
    fn shared_reference_converts_once() {
        let tree = MetadataTree {
            attributes: Vec::new(),
            records: vec![
                record("IMAGE", vec![AttributeNode::leaf(REFERENCED_FILE, "DIR\\IMG1")]),
                record("IMAGE", vec![AttributeNode::leaf(REFERENCED_FILE, "DIR\\IMG1")]),
            ],
            directory: true,
        };

        let mut fx = Fixture::new();
        let mut view = fx.bind(&tree, "/data/DICOMDIR");

        assert_eq!(view.document.slots().len(), 2);
        assert_eq!(fx.scheduler.labels(), vec!["/data/DIR/IMG1"]);

        fx.drain(&mut view);

        assert_eq!(*fx.launcher.launched.borrow(), vec!["/data/DIR/IMG1".to_string()]);
        assert_eq!(fx.cache.committed.borrow().len(), 1);
        assert_eq!(view.document.pending_count(), 0);
        assert_eq!(
            view.document.slots()[1].artifact(),
            Some(Path::new("/cache//data/DIR/IMG1.png"))
        );
    }

    #[test]
    fn cache_hit_submits_nothing() {
        let mut fx = Fixture::new();
        fx.cache
            .present
            .borrow_mut()
            .insert("/data/DIR/IMG1".to_string());

        let view = fx.bind(&directory(), "/data/DICOMDIR");

        assert!(view.document.slots()[0].is_ready());
        assert!(!view.document.slots()[1].is_ready());
        assert_eq!(*fx.launcher.launched.borrow(), vec!["/data/DIR/IMG2".to_string()]);
        assert_eq!(fx.scheduler.labels(), vec!["/data/DIR/IMG2"]);
    }

    #[test]
    fn failed_conversion_keeps_placeholder() {
        let mut fx = Fixture::new();
        fx.launcher
            .failing
            .borrow_mut()
            .insert("/data/DIR/IMG2".to_string());

        let mut view = fx.bind(&directory(), "/data/DICOMDIR");
        fx.drain(&mut view);

        let slots = view.document.slots();
        assert!(slots[0].is_ready());
        assert_eq!(
            slots[1].state,
            SlotState::Pending {
                placeholder: Placeholder::square(128)
            }
        );
        assert_eq!(
            *fx.cache.discarded.borrow(),
            vec![PathBuf::from("/cache//data/DIR/IMG2.tmp.png")]
        );
        assert_eq!(fx.cache.committed.borrow().len(), 1);
    }

    #[test]
    fn single_image_gets_large_slot_and_fields() {
        let dump = r#"<file-format><data-set>
<element name="Rows">512</element>
<element name="Columns">256</element>
<element name="NumberOfFrames">12</element>
<element name="Modality">US</element>
<sequence name="ProcedureCodeSequence">
<item><element name="CodeMeaning">CT HEAD</element></item>
</sequence>
<sequence name="ReferencedImageSequence">
<item><element name="ReferencedFrameNumber">1</element></item>
<item><element name="ReferencedFrameNumber">2</element></item>
</sequence>
</data-set></file-format>"#;
        let tree = parse(dump, &ExclusionRules::none()).unwrap();

        let mut fx = Fixture::new();
        let view = fx.bind(&tree, "/data/scan.dcm");
        let doc = &view.document;

        assert_eq!(doc.slots().len(), 1);
        assert_eq!(doc.slots()[0].line, 0);
        assert_eq!(doc.slots()[0].kind, ArtifactKind::Image);
        assert_eq!(
            doc.slots()[0].state,
            SlotState::Pending {
                placeholder: Placeholder {
                    width: 256,
                    height: 512
                }
            }
        );
        assert_eq!(
            doc.lines()[1],
            Line::Note {
                text: "12 frames; playback available".into()
            }
        );

        // Lone item collapses, multiple items are numbered
        assert_eq!(
            headings(doc),
            vec![
                (1, "ProcedureCodeSequence".to_string()),
                (1, "ReferencedImageSequence".to_string()),
                (2, "Item 1".to_string()),
                (2, "Item 2".to_string()),
            ]
        );
        assert!(doc.lines().contains(&Line::Field {
            key: "CodeMeaning".into(),
            value: "CT HEAD".into(),
            full_key: None,
        }));
        assert_eq!(fx.launcher.launched.borrow().len(), 1);
    }

    #[test]
    fn references_resolve_next_to_directory() {
        assert_eq!(
            resolve_reference(Path::new("/media/DICOMDIR"), "IMAGES\\SER1\\IM001 "),
            PathBuf::from("/media/IMAGES/SER1/IM001")
        );
        assert_eq!(resolve_reference(Path::new("DICOMDIR"), "A"), PathBuf::from("A"));
    }
}
