//! Video and audio operations, all delegated to ffmpeg.

pub mod ffmpeg;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info as log_info;

use crate::error::HandlerError;
use crate::rpc::progress::ProgressSender;
use crate::AppContext;

/// Encoder and canonical container extension per audio format.
fn audio_codec(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "aac" | "m4a" => "aac",
        "wav" => "pcm_s16le",
        "flac" => "flac",
        "ogg" => "libvorbis",
        "opus" => "libopus",
        "wma" => "wmav2",
        "aiff" => "pcm_s16be",
        "alac" => "alac",
        "ac3" => "ac3",
        "webm" => "libopus",
        _ => "libmp3lame",
    }
}

/// Lossless codecs ignore the bitrate knob.
fn is_lossless(codec: &str) -> bool {
    matches!(codec, "pcm_s16le" | "pcm_s16be" | "flac" | "alac")
}

// ─── media.info ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InfoParams {
    file: String,
}

pub fn info(
    ctx: &AppContext,
    params: Value,
    _progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: InfoParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, "probing media file");

    let doc = ffmpeg::probe(ctx, &p.file)?;
    let format = doc.get("format").cloned().unwrap_or_default();
    let empty = Vec::new();
    let streams = doc
        .get("streams")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut out = Map::new();
    out.insert("duration".into(), json!(ffmpeg::duration_of(&doc)));
    out.insert(
        "format".into(),
        json!(format.get("format_name").and_then(Value::as_str).unwrap_or("")),
    );
    out.insert(
        "size".into(),
        json!(format
            .get("size")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)),
    );
    out.insert(
        "bitrate".into(),
        format
            .get("bit_rate")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .map(|b| json!(b))
            .unwrap_or(Value::Null),
    );

    if let Some(video) = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"))
    {
        out.insert("width".into(), video.get("width").cloned().unwrap_or(Value::Null));
        out.insert("height".into(), video.get("height").cloned().unwrap_or(Value::Null));
        out.insert(
            "videoCodec".into(),
            video.get("codec_name").cloned().unwrap_or(Value::Null),
        );
        out.insert("fps".into(), json!(parse_frame_rate(video)));
    }

    if let Some(audio) = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"))
    {
        out.insert(
            "audioCodec".into(),
            audio.get("codec_name").cloned().unwrap_or(Value::Null),
        );
        out.insert(
            "sampleRate".into(),
            json!(audio
                .get("sample_rate")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0)),
        );
        out.insert(
            "channels".into(),
            audio.get("channels").cloned().unwrap_or(Value::Null),
        );
    }

    Ok(Value::Object(out))
}

/// "30000/1001" → 29.97, rounded to two decimals.
fn parse_frame_rate(stream: &Value) -> f64 {
    let rate = stream
        .get("r_frame_rate")
        .and_then(Value::as_str)
        .unwrap_or("0/1");
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                (num / den * 100.0).round() / 100.0
            } else {
                0.0
            }
        }
        None => rate.parse().unwrap_or(0.0),
    }
}

// ─── media.videoCompress ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoCompressParams {
    file: String,
    output_path: String,
    #[serde(default = "default_crf")]
    quality: u32,
    #[serde(default = "default_preset")]
    preset: String,
    resolution: Option<String>,
}

fn default_crf() -> u32 {
    23
}

fn default_preset() -> String {
    "medium".to_string()
}

pub fn video_compress(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: VideoCompressParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, crf = p.quality, "compressing video");

    let duration = ffmpeg::duration_of(&ffmpeg::probe(ctx, &p.file)?);
    let mut args = vec![
        "-i".to_string(),
        p.file.clone(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        p.quality.to_string(),
        "-preset".to_string(),
        p.preset.clone(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-y".to_string(),
    ];
    if let Some(resolution) = &p.resolution {
        args.push("-vf".to_string());
        args.push(format!("scale={resolution}"));
    }
    args.push(p.output_path.clone());

    ffmpeg::run_with_progress(ctx, &args, duration, progress)?;
    Ok(Value::String(p.output_path))
}

// ─── media.videoConvert ──────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoConvertParams {
    file: String,
    output_path: String,
    #[allow(dead_code)]
    format: Option<String>,
}

pub fn video_convert(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: VideoConvertParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, "converting video");

    // The container comes from the output extension; re-encode with the
    // widely supported defaults.
    let duration = ffmpeg::duration_of(&ffmpeg::probe(ctx, &p.file)?);
    let args = vec![
        "-i".to_string(),
        p.file.clone(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-y".to_string(),
        p.output_path.clone(),
    ];

    ffmpeg::run_with_progress(ctx, &args, duration, progress)?;
    Ok(Value::String(p.output_path))
}

// ─── media.audioConvert ──────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioConvertParams {
    file: String,
    output_path: String,
    format: String,
    #[serde(default = "default_bitrate")]
    bitrate: String,
    sample_rate: Option<u32>,
}

fn default_bitrate() -> String {
    "192k".to_string()
}

pub fn audio_convert(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: AudioConvertParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, format = %p.format, "converting audio");

    let duration = ffmpeg::duration_of(&ffmpeg::probe(ctx, &p.file)?);
    let codec = audio_codec(&p.format);

    let mut args = vec![
        "-i".to_string(),
        p.file.clone(),
        "-c:a".to_string(),
        codec.to_string(),
    ];
    if !is_lossless(codec) {
        args.push("-b:a".to_string());
        args.push(p.bitrate.clone());
    }
    if let Some(rate) = p.sample_rate {
        args.push("-ar".to_string());
        args.push(rate.to_string());
    }
    args.push("-y".to_string());
    args.push(p.output_path.clone());

    ffmpeg::run_with_progress(ctx, &args, duration, progress)?;
    Ok(Value::String(p.output_path))
}

// ─── media.audioExtract ──────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioExtractParams {
    file: String,
    output_path: String,
    #[serde(default = "default_audio_format")]
    format: String,
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

pub fn audio_extract(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: AudioExtractParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, format = %p.format, "extracting audio track");

    let duration = ffmpeg::duration_of(&ffmpeg::probe(ctx, &p.file)?);
    let codec = audio_codec(&p.format);

    let args = vec![
        "-i".to_string(),
        p.file.clone(),
        "-vn".to_string(),
        "-c:a".to_string(),
        codec.to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-y".to_string(),
        p.output_path.clone(),
    ];

    ffmpeg::run_with_progress(ctx, &args, duration, progress)?;
    Ok(Value::String(p.output_path))
}

// ─── media.trim ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrimParams {
    file: String,
    output_path: String,
    start_time: f64,
    end_time: f64,
}

pub fn trim(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: TrimParams = serde_json::from_value(params)?;
    if p.end_time <= p.start_time {
        return Err(HandlerError::InvalidParams(
            "endTime must be after startTime".into(),
        ));
    }
    log_info!(file = %p.file, start = p.start_time, end = p.end_time, "trimming media");

    let duration = p.end_time - p.start_time;
    // Stream copy keeps this near-instant for most containers.
    let args = vec![
        "-i".to_string(),
        p.file.clone(),
        "-ss".to_string(),
        p.start_time.to_string(),
        "-t".to_string(),
        duration.to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-y".to_string(),
        p.output_path.clone(),
    ];

    ffmpeg::run_with_progress(ctx, &args, duration, progress)?;
    Ok(Value::String(p.output_path))
}

// ─── media.videoToGif ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoToGifParams {
    file: String,
    output_path: String,
    #[serde(default = "default_gif_fps")]
    fps: u32,
    #[serde(default = "default_gif_width")]
    width: u32,
    start_time: Option<f64>,
    duration: Option<f64>,
}

fn default_gif_fps() -> u32 {
    10
}

fn default_gif_width() -> u32 {
    480
}

pub fn video_to_gif(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: VideoToGifParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, fps = p.fps, width = p.width, "converting video to GIF");

    let total = ffmpeg::duration_of(&ffmpeg::probe(ctx, &p.file)?);
    let duration = p.duration.unwrap_or(total);

    let mut args = vec!["-i".to_string(), p.file.clone()];
    if let Some(start) = p.start_time {
        args.push("-ss".to_string());
        args.push(start.to_string());
    }
    if let Some(d) = p.duration {
        args.push("-t".to_string());
        args.push(d.to_string());
    }
    args.push("-vf".to_string());
    args.push(format!(
        "fps={},scale={}:-1:flags=lanczos",
        p.fps, p.width
    ));
    args.push("-loop".to_string());
    args.push("0".to_string());
    args.push("-y".to_string());
    args.push(p.output_path.clone());

    ffmpeg::run_with_progress(ctx, &args, duration, progress)?;
    Ok(Value::String(p.output_path))
}
