//! Video-site downloads through the yt-dlp command-line tool.

use std::io::{BufReader, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info as log_info, warn};

use crate::error::HandlerError;
use crate::rpc::progress::ProgressSender;
use crate::AppContext;

// ─── download.checkNetwork ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct CheckNetworkParams {
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 {
    5
}

pub fn check_network(
    _ctx: &AppContext,
    params: Value,
    _progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: CheckNetworkParams = serde_json::from_value(params)?;
    let timeout = Duration::from_secs(p.timeout);

    for host in ["www.youtube.com:443", "www.google.com:443"] {
        let Ok(addrs) = host.to_socket_addrs() else {
            continue;
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, timeout).is_ok() {
                return Ok(json!({
                    "connected": true,
                    "host": host.trim_end_matches(":443"),
                    "message": "Network connection available",
                }));
            }
        }
    }

    Ok(json!({
        "connected": false,
        "host": null,
        "message": "No network connection",
    }))
}

// ─── download.getVideoInfo ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct VideoInfoParams {
    url: String,
}

pub fn get_video_info(
    ctx: &AppContext,
    params: Value,
    _progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: VideoInfoParams = serde_json::from_value(params)?;
    log_info!(url = %p.url, "fetching video info");

    let info = fetch_info(ctx, &p.url)?;
    Ok(summarize_info(&info, &p.url))
}

/// `yt-dlp -J` metadata for a URL without downloading anything.
fn fetch_info(ctx: &AppContext, url: &str) -> Result<Value, HandlerError> {
    let ytdlp = ctx.config.ytdlp().map_err(HandlerError::Other)?;
    let output = Command::new(&ytdlp)
        .args(["-J", "--no-warnings", url])
        .output()
        .map_err(|e| HandlerError::Other(anyhow!("failed to run yt-dlp: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HandlerError::Other(anyhow!(
            "Failed to get video info: {}",
            stderr.trim()
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| HandlerError::Other(anyhow!("yt-dlp produced invalid JSON: {e}")))
}

/// Client-facing digest of the raw yt-dlp metadata: one entry per distinct
/// video resolution, best-first, plus the headline fields.
fn summarize_info(info: &Value, url: &str) -> Value {
    let empty = Vec::new();
    let raw_formats = info
        .get("formats")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut seen = std::collections::HashSet::new();
    let mut formats: Vec<(u64, Value)> = Vec::new();
    for f in raw_formats {
        let vcodec = f.get("vcodec").and_then(Value::as_str).unwrap_or("none");
        let Some(height) = f.get("height").and_then(Value::as_u64) else {
            continue;
        };
        if vcodec == "none" {
            continue;
        }
        let resolution = format!("{height}p");
        if !seen.insert(resolution.clone()) {
            continue;
        }
        let filesize = f
            .get("filesize")
            .filter(|v| !v.is_null())
            .or_else(|| f.get("filesize_approx"))
            .cloned()
            .unwrap_or(Value::Null);
        formats.push((
            height,
            json!({
                "format_id": f.get("format_id").cloned().unwrap_or(Value::Null),
                "type": "video",
                "resolution": resolution,
                "height": height,
                "ext": f.get("ext").cloned().unwrap_or(Value::Null),
                "filesize": filesize,
                "vcodec": vcodec,
                "acodec": f.get("acodec").cloned().unwrap_or(Value::Null),
            }),
        ));
    }
    formats.sort_by(|a, b| b.0.cmp(&a.0));

    let description: String = info
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .chars()
        .take(500)
        .collect();

    json!({
        "title": info.get("title").cloned().unwrap_or(Value::Null),
        "description": description,
        "duration": info.get("duration").cloned().unwrap_or(Value::Null),
        "thumbnail": info.get("thumbnail").cloned().unwrap_or(Value::Null),
        "uploader": info.get("uploader").cloned().unwrap_or(Value::Null),
        "upload_date": info.get("upload_date").cloned().unwrap_or(Value::Null),
        "view_count": info.get("view_count").cloned().unwrap_or(Value::Null),
        "formats": formats.into_iter().map(|(_, f)| f).collect::<Vec<_>>(),
        "url": url,
    })
}

// ─── download.video ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadParams {
    url: String,
    output_path: String,
    #[serde(default = "default_resolution")]
    resolution: String,
    #[serde(default = "default_video_format")]
    format: String,
    #[serde(default)]
    audio_only: bool,
    #[serde(default = "default_dl_audio_format")]
    audio_format: String,
}

fn default_resolution() -> String {
    "1080p".to_string()
}

fn default_video_format() -> String {
    "mp4".to_string()
}

fn default_dl_audio_format() -> String {
    "mp3".to_string()
}

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").unwrap());

pub fn download_video(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: DownloadParams = serde_json::from_value(params)?;
    log_info!(url = %p.url, resolution = %p.resolution, audio_only = p.audio_only, "downloading video");

    std::fs::create_dir_all(&p.output_path)?;

    progress.emit(0.0, "Preparing download...")?;
    let info = fetch_info(ctx, &p.url)?;
    let title = info.get("title").cloned().unwrap_or(Value::Null);
    let duration = info.get("duration").cloned().unwrap_or(Value::Null);

    let selector = if p.audio_only {
        "bestaudio/best".to_string()
    } else {
        format_selector(&p.resolution)?
    };

    let template = Path::new(&p.output_path)
        .join("%(title)s.%(ext)s")
        .to_string_lossy()
        .into_owned();

    let mut args = vec![
        p.url.clone(),
        "-f".to_string(),
        selector,
        "-o".to_string(),
        template,
        "--no-warnings".to_string(),
        "--force-overwrites".to_string(),
        "--newline".to_string(),
        "--progress".to_string(),
        "--no-simulate".to_string(),
        // Prints the final path on stdout once post-processing is done.
        "--print".to_string(),
        "after_move:filepath".to_string(),
    ];
    if p.audio_only {
        args.push("-x".to_string());
        args.push("--audio-format".to_string());
        args.push(p.audio_format.clone());
        args.push("--audio-quality".to_string());
        args.push("192K".to_string());
    } else {
        args.push("--merge-output-format".to_string());
        args.push(p.format.clone());
        args.push("--remux-video".to_string());
        args.push(p.format.clone());
    }
    // Point yt-dlp at the bundled ffmpeg when one is configured.
    if let Some(ffmpeg) = &ctx.config.ffmpeg_path {
        if let Some(dir) = ffmpeg.parent() {
            args.push("--ffmpeg-location".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
    }

    let output_file = run_download(ctx, &args, progress)?;
    let output_file = match output_file {
        Some(path) if Path::new(&path).exists() => path,
        _ => discover_output(&p.output_path, &title)?,
    };

    progress.emit(100.0, "Download complete!")?;
    log_info!(file = %output_file, "download complete");

    Ok(json!({
        "success": true,
        "outputPath": output_file,
        "title": title,
        "duration": duration,
        "message": "Download completed successfully",
    }))
}

/// Codec-priority selector capped at the requested height: h264 mp4 first,
/// then h264 anything, then any mp4, then best.
fn format_selector(resolution: &str) -> Result<String, HandlerError> {
    let height: u32 = resolution
        .trim_end_matches('p')
        .parse()
        .map_err(|_| HandlerError::InvalidParams(format!("invalid resolution '{resolution}'")))?;
    Ok(format!(
        "bestvideo[height<={height}][vcodec^=avc1][ext=mp4]+bestaudio[ext=m4a]/\
         bestvideo[height<={height}][vcodec^=avc1]+bestaudio/\
         bestvideo[height<={height}][ext=mp4]+bestaudio[ext=m4a]/\
         bestvideo[height<={height}]+bestaudio/\
         best[height<={height}]/best"
    ))
}

/// Run yt-dlp, forwarding download percentages as progress (scaled to
/// 0–85, post-processing fills 85–100). Returns the final file path that
/// `--print after_move:filepath` reported, if any.
fn run_download(
    ctx: &AppContext,
    args: &[String],
    progress: &ProgressSender,
) -> Result<Option<String>, HandlerError> {
    let ytdlp = ctx.config.ytdlp().map_err(HandlerError::Other)?;
    debug!(args = ?args, "yt-dlp");

    let mut child = Command::new(&ytdlp)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| HandlerError::Other(anyhow!("failed to run yt-dlp: {e}")))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| HandlerError::Other(anyhow!("yt-dlp stderr not captured")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HandlerError::Other(anyhow!("yt-dlp stdout not captured")))?;

    // stdout (the --print filepath line) is drained on its own thread so
    // the pipe cannot back up while stderr is being followed.
    let stdout_reader = std::thread::spawn(move || {
        let mut text = String::new();
        let _ = BufReader::new(stdout).read_to_string(&mut text);
        text
    });

    let mut last_pct = 0.0_f64;
    let mut last_error = String::new();
    let mut postprocessing = false;
    for line in read_lines(stderr) {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let result = if line.starts_with("[download]") {
            if let Some(caps) = PERCENT_RE.captures(&line) {
                let raw: f64 = caps[1].parse().unwrap_or(0.0);
                // Reserve the tail for merging and remuxing.
                let pct = raw * 0.85;
                if pct > last_pct {
                    last_pct = pct;
                    progress.emit(pct, &format!("Downloading: {raw:.0}%"))
                } else {
                    Ok(())
                }
            } else {
                Ok(())
            }
        } else if line.starts_with("[Merger]")
            || line.starts_with("[ExtractAudio]")
            || line.starts_with("[VideoRemuxer]")
        {
            postprocessing = true;
            progress.emit(88.0, "Processing...")
        } else if line.starts_with("ERROR") {
            last_error = line.clone();
            Ok(())
        } else {
            Ok(())
        };
        if let Err(e) = result {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    }
    if postprocessing {
        progress.emit(95.0, "Finalizing...")?;
    }

    let stdout_text = stdout_reader.join().unwrap_or_default();

    let status = child
        .wait()
        .map_err(|e| HandlerError::Other(anyhow!("yt-dlp wait failed: {e}")))?;
    if !status.success() {
        return Err(HandlerError::Other(anyhow!(
            "Download failed: {}",
            if last_error.is_empty() {
                format!("yt-dlp exited with code {}", status.code().unwrap_or(-1))
            } else {
                last_error
            }
        )));
    }

    // Last printed line is the final location after all post-processing.
    Ok(stdout_text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string()))
}

/// Lines split on either \r or \n (yt-dlp progress rewrites in place when
/// not line-buffered).
fn read_lines(reader: impl Read) -> impl Iterator<Item = String> {
    let mut reader = BufReader::new(reader);
    std::iter::from_fn(move || {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte) {
                Ok(0) => {
                    if line.is_empty() {
                        return None;
                    }
                    return Some(String::from_utf8_lossy(&line).into_owned());
                }
                Ok(_) => {
                    if byte[0] == b'\r' || byte[0] == b'\n' {
                        return Some(String::from_utf8_lossy(&line).into_owned());
                    }
                    line.push(byte[0]);
                }
                Err(_) => return None,
            }
        }
    })
}

/// Fallback when yt-dlp did not report the final path: newest file in the
/// output directory, preferring ones that start with the video title.
fn discover_output(dir: &str, title: &Value) -> Result<String, HandlerError> {
    let title = title.as_str().unwrap_or("");
    let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::UNIX_EPOCH);
        if !title.is_empty() && name.starts_with(title) {
            return Ok(path.to_string_lossy().into_owned());
        }
        candidates.push((modified, path));
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates
        .into_iter()
        .next()
        .map(|(_, path)| path.to_string_lossy().into_owned())
        .ok_or_else(|| {
            warn!(dir = %dir, "no downloaded file found");
            HandlerError::Other(anyhow!("downloaded file not found in {dir}"))
        })
}
