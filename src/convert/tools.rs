//! External tool discovery and invocation
//!
//! Tools are looked up once per session, either by name on `PATH` or as an
//! explicit path. The dump and still-image tools are required; the video
//! tools and the player are optional and only needed for multi-frame files.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

use super::job::Stage;
use super::process::launch_detached;
use crate::storage::{CacheError, PlayerConfig, ToolsConfig};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Required {role} tool not found: {name}")]
    Missing { role: &'static str, name: String },
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Attribute dump failed ({status}): {stderr}")]
    ToolFailed { status: String, stderr: String },
}

#[derive(Debug, Error)]
pub enum PlayError {
    #[error("Player not found: {0}")]
    NoPlayer(String),

    #[error("Video conversion tools not found ({0})")]
    NoEncoder(String),

    #[error("File has a single frame; nothing to play")]
    SingleFrame,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to start player: {0}")]
    Launch(#[source] std::io::Error),
}

/// Resolved tool locations
#[derive(Debug, Clone)]
pub struct ToolSet {
    pub dump: PathBuf,
    pub image: PathBuf,
    pub frames: Option<PathBuf>,
    pub frame_args: Vec<String>,
    pub encoder: Option<PathBuf>,
    pub player: Option<PathBuf>,
    pub player_command: String,
    pub player_options: String,
}

impl ToolSet {
    /// Looks up every configured tool on `PATH`
    pub fn discover(tools: &ToolsConfig, player: &PlayerConfig) -> Result<Self, ToolError> {
        Self::discover_in(tools, player, std::env::var_os("PATH"))
    }

    /// Looks up tools using an explicit search path
    pub fn discover_in(
        tools: &ToolsConfig,
        player: &PlayerConfig,
        search: Option<OsString>,
    ) -> Result<Self, ToolError> {
        let dirs = search_dirs(search);
        let find = |name: &str| find_executable(name, &dirs);

        let set = Self {
            dump: find_required("dump", &tools.dump, &dirs)?,
            image: find_required("image", &tools.image, &dirs)?,
            frames: find(&tools.frames),
            frame_args: tools.frame_args.clone(),
            encoder: find(&tools.encoder),
            player: find(&player.command),
            player_command: player.command.clone(),
            player_options: player.options.clone(),
        };

        tracing::debug!(
            dump = %set.dump.display(),
            image = %set.image.display(),
            video = set.can_encode_video(),
            player = set.player.is_some(),
            "tools resolved"
        );
        Ok(set)
    }

    /// Looks up only the dump tool on `PATH`
    pub fn discover_dump(tools: &ToolsConfig) -> Result<PathBuf, ToolError> {
        Self::discover_dump_in(tools, std::env::var_os("PATH"))
    }

    pub fn discover_dump_in(
        tools: &ToolsConfig,
        search: Option<OsString>,
    ) -> Result<PathBuf, ToolError> {
        find_required("dump", &tools.dump, &search_dirs(search))
    }

    /// Whether multi-frame previews can be produced
    pub fn can_encode_video(&self) -> bool {
        self.frames.is_some() && self.encoder.is_some()
    }

    /// Runs the dump tool on a file and returns its XML output
    pub fn read_dump(&self, file: &Path) -> Result<String, DumpError> {
        read_dump(&self.dump, file)
    }

    /// Command converting a file into a PNG scaled to `height` pixels
    pub fn image_stages(&self, source: &Path, height: u32, output: &Path) -> Vec<Stage> {
        vec![Stage::new(&self.image)
            .arg("--write-png")
            .arg("--scale-y-size")
            .arg(height.to_string())
            .arg(source)
            .arg(output)]
    }

    /// Pipeline converting all frames of a file into an MP4 preview
    pub fn video_stages(
        &self,
        source: &Path,
        framerate: f64,
        output: &Path,
    ) -> Result<Vec<Stage>, PlayError> {
        let (frames, encoder) = match (&self.frames, &self.encoder) {
            (Some(frames), Some(encoder)) => (frames, encoder),
            (None, _) => return Err(PlayError::NoEncoder("frames tool missing".into())),
            (_, None) => return Err(PlayError::NoEncoder("encoder missing".into())),
        };

        Ok(vec![
            Stage::new(frames).args(&self.frame_args).arg(source),
            Stage::new(encoder)
                .args(["-loglevel", "error", "-y", "-framerate"])
                .arg(format_rate(framerate))
                .args(["-i", "-", "-pix_fmt", "yuv420p"])
                .arg(output),
        ])
    }

    /// Starts the player on an artifact without waiting for it
    pub fn launch_player(&self, artifact: &Path, title: &str) -> Result<u32, PlayError> {
        let player = self
            .player
            .as_ref()
            .ok_or_else(|| PlayError::NoPlayer(self.player_command.clone()))?;

        let args = player_args(&self.player_options, title, artifact);
        let pid = launch_detached(player, &args).map_err(PlayError::Launch)?;
        tracing::debug!(pid, artifact = %artifact.display(), "player started");
        Ok(pid)
    }
}

fn search_dirs(search: Option<OsString>) -> Vec<PathBuf> {
    search
        .as_deref()
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default()
}

fn find_required(role: &'static str, name: &str, dirs: &[PathBuf]) -> Result<PathBuf, ToolError> {
    find_executable(name, dirs).ok_or_else(|| ToolError::Missing {
        role,
        name: name.to_string(),
    })
}

/// Runs a dump tool on a file and returns its XML output
pub fn read_dump(tool: &Path, file: &Path) -> Result<String, DumpError> {
    let output = Command::new(tool)
        .args(["--quiet", "--charset-assume", "latin-1", "--convert-to-utf8"])
        .arg(file)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| DumpError::Spawn {
            tool: tool.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(DumpError::ToolFailed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Expands the player option template
///
/// `{title}` and `{file}` are substituted inside each whitespace-separated
/// option; the artifact path is appended when `{file}` does not appear.
pub fn player_args(template: &str, title: &str, file: &Path) -> Vec<OsString> {
    let file_text = file.to_string_lossy();
    let mut has_file = false;

    let mut args: Vec<OsString> = template
        .split_whitespace()
        .map(|option| {
            if option == "{file}" {
                has_file = true;
                return file.as_os_str().to_os_string();
            }
            if option.contains("{file}") {
                has_file = true;
            }
            OsString::from(
                option
                    .replace("{title}", title)
                    .replace("{file}", &file_text),
            )
        })
        .collect();

    if !has_file {
        args.push(file.as_os_str().to_os_string());
    }
    args
}

/// Frame rate as a command-line value, without a trailing `.0`
fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{}", rate as u64)
    } else {
        rate.to_string()
    }
}

/// Resolves a tool name to an executable
///
/// Names containing a path separator are used as given.
pub fn find_executable(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    dirs.iter().find_map(|dir| {
        let path = dir.join(name);
        if is_executable(&path) {
            return Some(path);
        }

        #[cfg(windows)]
        {
            let exe = path.with_extension("exe");
            if is_executable(&exe) {
                return Some(exe);
            }
        }

        None
    })
}

/// Checks if a file is executable
fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = path.metadata() {
            return meta.permissions().mode() & 0o111 != 0;
        }
    }

    #[cfg(windows)]
    {
        if let Some(ext) = path.extension().and_then(std::ffi::OsStr::to_str) {
            let ext = ext.to_ascii_lowercase();
            return ext == "exe" || ext == "bat" || ext == "cmd";
        }
    }

    false
}
