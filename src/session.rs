//! Viewing session
//!
//! A [`Session`] owns everything one open view needs: resolved tools, the
//! exclusion rules, the cache, the conversion scheduler and the currently
//! loaded document. All mutation happens on the thread that owns it;
//! conversions run as external processes and their callbacks run inside
//! [`Session::pump`].

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::convert::{
    DumpError, Launcher, PlayError, Scheduler, SystemLauncher, ToolError, ToolSet,
};
use crate::domain::{parse, ExclusionRules, FilterError, MetadataTree, ParseError};
use crate::render::{conversion_job, ArtifactKind, Binder, Document, View};
use crate::storage::{CacheStore, Config, DiskCache, DisplayConfig};

/// Interval between polls while waiting for conversions
pub const PUMP_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Could not determine cache directory")]
    NoCacheDir,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read attributes of {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: DumpError,
    },

    #[error("Failed to parse attributes of {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

/// Result of a play request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// The player was started on the cached preview
    Launched { pid: u32 },
    /// The preview is being converted; the player starts when it is ready
    Converting,
}

struct Loaded {
    source: PathBuf,
    tree: MetadataTree,
    view: View,
}

pub struct Session<L: Launcher = SystemLauncher> {
    tools: ToolSet,
    rules: ExclusionRules,
    cache: Rc<dyn CacheStore>,
    scheduler: Scheduler<View, L>,
    display: DisplayConfig,
    framerate: f64,
    current: Option<Loaded>,
}

impl Session<SystemLauncher> {
    /// Creates a session from configuration, failing if a required tool is
    /// missing or an exclusion pattern is invalid
    pub fn new(config: &Config) -> Result<Self, SetupError> {
        let tools = ToolSet::discover(&config.tools, &config.player)?;
        let root = config.cache_dir().map_err(|_| SetupError::NoCacheDir)?;
        let cache: Rc<dyn CacheStore> = Rc::new(DiskCache::new(root));
        Self::with_parts(config, tools, cache, SystemLauncher)
    }
}

impl<L: Launcher> Session<L> {
    /// Creates a session from explicit collaborators
    pub fn with_parts(
        config: &Config,
        tools: ToolSet,
        cache: Rc<dyn CacheStore>,
        launcher: L,
    ) -> Result<Self, SetupError> {
        let rules = config.filter.rules()?;
        let scheduler = Scheduler::new(
            launcher,
            config.conversion.effective_jobs(),
            config.conversion.timeout(),
        );

        tracing::debug!(
            jobs = scheduler.limit(),
            timeout = ?config.conversion.timeout(),
            "session ready"
        );

        Ok(Self {
            tools,
            rules,
            cache,
            scheduler,
            display: config.display.clone(),
            framerate: config.conversion.framerate,
            current: None,
        })
    }

    /// Loads a file, replacing the current document
    ///
    /// Conversions still running for the previous document are stopped
    /// first. The attribute dump is read synchronously; conversions are
    /// only queued.
    pub fn load(&mut self, path: &Path) -> Result<&Document, LoadError> {
        self.stop();
        self.current = None;

        let source = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        tracing::debug!(source = %source.display(), "loading");

        let dump = self.tools.read_dump(&source).map_err(|e| LoadError::Read {
            path: source.clone(),
            source: e,
        })?;
        let tree = parse(&dump, &self.rules).map_err(|e| LoadError::Parse {
            path: source.clone(),
            source: e,
        })?;

        let document = Binder::new(
            &self.tools,
            &self.cache,
            &mut self.scheduler,
            &self.display,
            Instant::now(),
        )
        .bind(&tree, &source);

        let loaded = self.current.insert(Loaded {
            source,
            tree,
            view: View::new(document),
        });
        Ok(&loaded.view.document)
    }

    /// Loads the current file again
    pub fn reload(&mut self) -> Result<Option<&Document>, LoadError> {
        match self.current.as_ref().map(|loaded| loaded.source.clone()) {
            Some(source) => self.load(&source).map(Some),
            None => Ok(None),
        }
    }

    /// Polls the scheduler once and runs callbacks of finished conversions
    ///
    /// Returns the number of conversions that finished.
    pub fn pump(&mut self) -> usize {
        let finished = self.scheduler.poll(Instant::now());
        let count = finished.len();

        for done in finished {
            match self.current.as_mut() {
                Some(loaded) => done.complete(&mut loaded.view),
                None => self.cache.discard(&done.job.temp_path),
            }
        }
        count
    }

    /// Pumps until no conversion is queued or running
    ///
    /// Returns false if `limit` elapsed first.
    pub fn run_until_idle(&mut self, limit: Option<Duration>) -> bool {
        let start = Instant::now();
        loop {
            self.pump();
            if self.scheduler.is_idle() {
                return true;
            }
            if limit.is_some_and(|limit| start.elapsed() >= limit) {
                return false;
            }
            std::thread::sleep(PUMP_INTERVAL);
        }
    }

    /// Stops every conversion and removes their partial outputs
    pub fn stop(&mut self) {
        for job in self.scheduler.cancel_all() {
            self.cache.discard(&job.temp_path);
        }
    }

    /// Plays the multi-frame preview of the current file, converting it first
    /// if needed
    pub fn play(&mut self) -> Result<PlayStatus, PlayError> {
        let Some(loaded) = self.current.as_ref() else {
            return Err(PlayError::SingleFrame);
        };
        if !loaded.tree.is_multi_frame() {
            return Err(PlayError::SingleFrame);
        }
        if self.tools.player.is_none() {
            return Err(PlayError::NoPlayer(self.tools.player_command.clone()));
        }

        let source = loaded.source.clone();
        let title = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());

        let kind = ArtifactKind::Video;
        let entry = self
            .cache
            .lookup(&kind.cache_key(&source), kind.ext())?;

        if entry.exists {
            let pid = self.tools.launch_player(&entry.final_path, &title)?;
            return Ok(PlayStatus::Launched { pid });
        }

        // One preview conversion per file is enough
        let label = format!("{} (video)", source.display());
        if self.scheduler.labels().contains(&label.as_str()) {
            return Ok(PlayStatus::Converting);
        }

        let framerate = loaded.tree.frame_rate().unwrap_or(self.framerate);
        let stages = self.tools.video_stages(&source, framerate, &entry.temp_path)?;
        let tools = self.tools.clone();

        let mut job = conversion_job(&source, stages, entry, Rc::clone(&self.cache), move |view, artifact| {
            let notice = match tools.launch_player(&artifact, &title) {
                Ok(pid) => format!("Player started for {title} (pid {pid})"),
                Err(e) => e.to_string(),
            };
            view.notices.push(notice);
        });
        job.label = label;

        self.scheduler.submit(job, Instant::now());
        Ok(PlayStatus::Converting)
    }

    pub fn document(&self) -> Option<&Document> {
        self.current.as_ref().map(|loaded| &loaded.view.document)
    }

    pub fn tree(&self) -> Option<&MetadataTree> {
        self.current.as_ref().map(|loaded| &loaded.tree)
    }

    pub fn source(&self) -> Option<&Path> {
        self.current.as_ref().map(|loaded| loaded.source.as_path())
    }

    /// Returns and clears the notices raised since the last call
    pub fn take_notices(&mut self) -> Vec<String> {
        self.current
            .as_mut()
            .map(|loaded| std::mem::take(&mut loaded.view.notices))
            .unwrap_or_default()
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    /// Labels of conversions still queued or running
    pub fn pending_conversions(&self) -> Vec<String> {
        self.scheduler.labels().into_iter().map(String::from).collect()
    }
}

impl<L: Launcher> Drop for Session<L> {
    fn drop(&mut self) {
        self.stop();
    }
}
