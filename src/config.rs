//! External tool discovery.
//!
//! The media and download handlers shell out to ffmpeg/ffprobe/yt-dlp, and
//! the PDF rewriting handlers shell out to qpdf. The desktop shell passes
//! explicit paths for the binaries it bundles (`FFMPEG_PATH`, `FFPROBE_PATH`);
//! everything else is found on PATH, then in the usual install locations.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

/// Resolved (or resolvable) locations of the external collaborators.
#[derive(Debug, Default, Clone)]
pub struct BackendConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub qpdf_path: Option<PathBuf>,
}

impl BackendConfig {
    pub fn ffmpeg(&self) -> Result<PathBuf> {
        resolve(self.ffmpeg_path.as_deref(), "ffmpeg")
    }

    pub fn ffprobe(&self) -> Result<PathBuf> {
        // The bundled ffprobe usually sits next to the bundled ffmpeg.
        if self.ffprobe_path.is_none() {
            if let Some(ffmpeg) = &self.ffmpeg_path {
                let sibling = sibling_tool(ffmpeg, "ffprobe");
                if sibling.exists() {
                    return Ok(sibling);
                }
            }
        }
        resolve(self.ffprobe_path.as_deref(), "ffprobe")
    }

    pub fn ytdlp(&self) -> Result<PathBuf> {
        resolve(self.ytdlp_path.as_deref(), "yt-dlp")
    }

    pub fn qpdf(&self) -> Result<PathBuf> {
        resolve(self.qpdf_path.as_deref(), "qpdf")
    }
}

fn resolve(configured: Option<&Path>, name: &str) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!(
            "{name} not found at configured path {}",
            path.display()
        ));
    }

    if let Some(found) = find_in_path(name) {
        return Ok(found);
    }

    // Common locations outside PATH (Homebrew, manual installs).
    for dir in ["/usr/local/bin", "/opt/homebrew/bin", "/usr/bin"] {
        let candidate = Path::new(dir).join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(anyhow!("{name} not found — install it or set its path"))
}

/// Walk the PATH environment variable for an executable.
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

fn sibling_tool(reference: &Path, name: &str) -> PathBuf {
    let mut sibling = reference.to_path_buf();
    sibling.set_file_name(name);
    #[cfg(windows)]
    sibling.set_extension("exe");
    sibling
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_but_missing_path_is_an_error() {
        let cfg = BackendConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ..Default::default()
        };
        assert!(cfg.ffmpeg().is_err());
    }

    #[test]
    fn sibling_replaces_file_name_only() {
        let s = sibling_tool(Path::new("/opt/tools/ffmpeg"), "ffprobe");
        assert_eq!(s, Path::new("/opt/tools/ffprobe"));
    }
}
