//! ffmpeg/ffprobe process plumbing.

use std::io::{BufReader, Read};
use std::process::{Command, Stdio};

use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::HandlerError;
use crate::rpc::progress::ProgressSender;
use crate::AppContext;

// ffmpeg rewrites its stats line with \r; the timestamp is all we need.
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})").unwrap());

/// Probe a media file with ffprobe and return the parsed JSON document
/// (`format` + `streams`).
pub fn probe(ctx: &AppContext, file: &str) -> Result<Value, HandlerError> {
    let ffprobe = ctx.config.ffprobe().map_err(HandlerError::Other)?;
    let output = Command::new(&ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            file,
        ])
        .output()
        .map_err(|e| HandlerError::Other(anyhow!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HandlerError::Other(anyhow!(
            "ffprobe error: {}",
            stderr.trim()
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| HandlerError::Other(anyhow!("ffprobe produced invalid JSON: {e}")))
}

/// Total duration in seconds from a probe document, 0 when unknown.
pub fn duration_of(probe_doc: &Value) -> f64 {
    probe_doc
        .pointer("/format/duration")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

/// Run ffmpeg, forwarding the stderr time ticker as progress against
/// `duration`. Cancellation is observed at every ticker line: the child is
/// killed and the cancellation error propagates.
pub fn run_with_progress(
    ctx: &AppContext,
    args: &[String],
    duration: f64,
    progress: &ProgressSender,
) -> Result<(), HandlerError> {
    let ffmpeg = ctx.config.ffmpeg().map_err(HandlerError::Other)?;
    debug!(args = ?args, "ffmpeg");

    let mut child = Command::new(&ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| HandlerError::Other(anyhow!("failed to run ffmpeg: {e}")))?;

    let mut stderr = BufReader::new(
        child
            .stderr
            .take()
            .ok_or_else(|| HandlerError::Other(anyhow!("ffmpeg stderr not captured")))?,
    );

    let mut last_line = String::new();
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stderr.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                // Stats lines end with \r, everything else with \n.
                if byte[0] == b'\r' || byte[0] == b'\n' {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    line.clear();
                    if text.trim().is_empty() {
                        continue;
                    }
                    last_line = text.clone();
                    if duration > 0.0 {
                        if let Some(caps) = TIME_RE.captures(&text) {
                            let h: f64 = caps[1].parse().unwrap_or(0.0);
                            let m: f64 = caps[2].parse().unwrap_or(0.0);
                            let s: f64 = caps[3].parse().unwrap_or(0.0);
                            let current = h * 3600.0 + m * 60.0 + s;
                            let pct = (current / duration * 100.0).min(100.0);
                            if let Err(e) = progress.emit(pct, "Processing...") {
                                let _ = child.kill();
                                let _ = child.wait();
                                return Err(e);
                            }
                        }
                    }
                } else {
                    line.push(byte[0]);
                }
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HandlerError::Other(anyhow!("ffmpeg read error: {e}")));
            }
        }
    }

    let status = child
        .wait()
        .map_err(|e| HandlerError::Other(anyhow!("ffmpeg wait failed: {e}")))?;
    if !status.success() {
        return Err(HandlerError::Other(anyhow!(
            "FFmpeg error (code {}): {}",
            status.code().unwrap_or(-1),
            last_line.trim()
        )));
    }
    Ok(())
}
