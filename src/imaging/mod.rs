//! Raster image operations on top of the `image` crate.

use std::collections::HashMap;
use std::io::BufWriter;
use std::path::Path;

use anyhow::anyhow;
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, DynamicImage, Frame, Rgba, RgbaImage};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info as log_info, warn};

use crate::error::HandlerError;
use crate::rpc::progress::ProgressSender;
use crate::AppContext;

const SUPPORTED_GIF_INPUTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif",
];

// ─── image.info ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InfoParams {
    file: String,
}

pub fn info(
    _ctx: &AppContext,
    params: Value,
    _progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: InfoParams = serde_json::from_value(params)?;

    let reader = image::ImageReader::open(&p.file)?.with_guessed_format()?;
    let format = reader
        .format()
        .map(|f| format!("{f:?}").to_uppercase())
        .unwrap_or_default();
    let img = reader.decode()?;

    Ok(json!({
        "width": img.width(),
        "height": img.height(),
        "format": format,
        "mode": color_mode(&img),
        "size": std::fs::metadata(&p.file)?.len(),
    }))
}

fn color_mode(img: &DynamicImage) -> &'static str {
    use image::ColorType::*;
    match img.color() {
        L8 | L16 => "L",
        La8 | La16 => "LA",
        Rgb8 | Rgb16 | Rgb32F => "RGB",
        Rgba8 | Rgba16 | Rgba32F => "RGBA",
        _ => "RGB",
    }
}

// ─── image.createGif ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGifParams {
    files: Vec<String>,
    output_path: String,
    #[serde(default = "default_frame_delay")]
    frame_delay: u32,
    #[serde(default)]
    r#loop: u32,
}

fn default_frame_delay() -> u32 {
    100
}

pub fn create_gif(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: CreateGifParams = serde_json::from_value(params)?;
    if p.files.is_empty() {
        return Err(HandlerError::InvalidParams("no input files provided".into()));
    }

    let valid_files: Vec<&String> = p
        .files
        .iter()
        .filter(|f| {
            let supported = Path::new(f.as_str())
                .extension()
                .map(|e| SUPPORTED_GIF_INPUTS.contains(&e.to_string_lossy().to_lowercase().as_str()))
                .unwrap_or(false);
            if !supported {
                warn!(file = %f, "skipping unsupported file format");
            }
            supported
        })
        .collect();
    if valid_files.is_empty() {
        return Err(HandlerError::InvalidParams(
            "no supported image files found (JPG, PNG, GIF, BMP, WEBP, TIFF)".into(),
        ));
    }
    log_info!(frames = valid_files.len(), "creating GIF");

    let total = valid_files.len();
    let mut frames: Vec<RgbaImage> = Vec::with_capacity(total);
    for (i, file) in valid_files.iter().enumerate() {
        match image::open(file.as_str()) {
            Ok(img) => frames.push(img.to_rgba8()),
            Err(e) => {
                warn!(file = %file, err = %e, "failed to open image");
                continue;
            }
        }
        progress.emit(
            (i + 1) as f64 / total as f64 * 50.0,
            &format!("Loading image {}/{total}", i + 1),
        )?;
    }
    if frames.is_empty() {
        return Err(HandlerError::InvalidParams("no valid images found".into()));
    }

    // Every frame takes the first frame's dimensions.
    let (base_w, base_h) = frames[0].dimensions();

    let out = BufWriter::new(std::fs::File::create(&p.output_path)?);
    let mut encoder = GifEncoder::new(out);
    encoder.set_repeat(if p.r#loop == 0 {
        Repeat::Infinite
    } else {
        Repeat::Finite(p.r#loop.min(u16::MAX as u32) as u16)
    })?;

    let count = frames.len();
    for (i, frame) in frames.into_iter().enumerate() {
        let frame = if frame.dimensions() == (base_w, base_h) {
            frame
        } else {
            image::imageops::resize(&frame, base_w, base_h, FilterType::Lanczos3)
        };
        let delay = Delay::from_numer_denom_ms(p.frame_delay, 1);
        encoder.encode_frame(Frame::from_parts(frame, 0, 0, delay))?;
        progress.emit(
            50.0 + (i + 1) as f64 / count as f64 * 40.0,
            &format!("Processing image {}/{count}", i + 1),
        )?;
    }
    drop(encoder);

    progress.emit(100.0, "GIF created successfully")?;
    Ok(Value::String(p.output_path))
}

// ─── image.resize ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResizeParams {
    file: String,
    output_path: String,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default = "default_true")]
    keep_aspect_ratio: bool,
    #[serde(default = "default_image_quality")]
    quality: u8,
}

fn default_true() -> bool {
    true
}

fn default_image_quality() -> u8 {
    95
}

pub fn resize(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: ResizeParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, "resizing image");

    progress.emit(10.0, "Opening image")?;
    let img = image::open(&p.file)?;
    let (new_w, new_h) =
        resize_dimensions(img.width(), img.height(), p.width, p.height, p.keep_aspect_ratio)?;

    progress.emit(50.0, "Resizing image")?;
    let resized = img.resize_exact(new_w, new_h, FilterType::Lanczos3);

    progress.emit(80.0, "Saving image")?;
    save_with_quality(&resized, &p.output_path, p.quality)?;

    progress.emit(100.0, "Resize completed")?;
    Ok(Value::String(p.output_path))
}

/// Target dimensions for a resize. With `keep_aspect_ratio`, the image fits
/// inside the requested box; a single axis scales the other proportionally.
fn resize_dimensions(
    orig_w: u32,
    orig_h: u32,
    width: Option<u32>,
    height: Option<u32>,
    keep_aspect_ratio: bool,
) -> Result<(u32, u32), HandlerError> {
    match (width, height) {
        (Some(w), Some(h)) => {
            if keep_aspect_ratio {
                let ratio = (w as f64 / orig_w as f64).min(h as f64 / orig_h as f64);
                Ok(((orig_w as f64 * ratio) as u32, (orig_h as f64 * ratio) as u32))
            } else {
                Ok((w, h))
            }
        }
        (Some(w), None) => {
            let h = if keep_aspect_ratio {
                (orig_h as f64 * (w as f64 / orig_w as f64)) as u32
            } else {
                orig_h
            };
            Ok((w, h))
        }
        (None, Some(h)) => {
            let w = if keep_aspect_ratio {
                (orig_w as f64 * (h as f64 / orig_h as f64)) as u32
            } else {
                orig_w
            };
            Ok((w, h))
        }
        (None, None) => Err(HandlerError::InvalidParams(
            "either width or height must be specified".into(),
        )),
    }
}

// ─── image.crop ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropParams {
    file: String,
    output_path: String,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    #[serde(default = "default_image_quality")]
    quality: u8,
}

pub fn crop(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: CropParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, "cropping image");

    progress.emit(20.0, "Opening image")?;
    let img = image::open(&p.file)?;
    if p.x >= img.width() || p.y >= img.height() {
        return Err(HandlerError::InvalidParams(
            "crop origin lies outside the image".into(),
        ));
    }

    progress.emit(50.0, "Cropping image")?;
    let width = p.width.min(img.width() - p.x);
    let height = p.height.min(img.height() - p.y);
    let cropped = img.crop_imm(p.x, p.y, width, height);

    progress.emit(80.0, "Saving image")?;
    save_with_quality(&cropped, &p.output_path, p.quality)?;

    progress.emit(100.0, "Crop completed")?;
    Ok(Value::String(p.output_path))
}

// ─── image.getColors ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetColorsParams {
    file: String,
    #[serde(default = "default_num_colors")]
    num_colors: usize,
}

fn default_num_colors() -> usize {
    10
}

pub fn get_colors(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: GetColorsParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, "extracting dominant colors");

    progress.emit(20.0, "Opening image")?;
    // Downsample before counting; exact pixel ratios are not the point.
    let small = image::open(&p.file)?.thumbnail(150, 150).to_rgb8();

    progress.emit(40.0, "Analyzing colors")?;
    let colors = dominant_colors(&small, p.num_colors);

    progress.emit(100.0, "Color extraction completed")?;
    Ok(Value::Array(colors))
}

fn dominant_colors(img: &image::RgbImage, num_colors: usize) -> Vec<Value> {
    let mut counts: HashMap<[u8; 3], u64> = HashMap::new();
    for pixel in img.pixels() {
        *counts.entry(pixel.0).or_insert(0) += 1;
    }

    let mut entries: Vec<([u8; 3], u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    entries
        .into_iter()
        .take(num_colors)
        .map(|([r, g, b], count)| {
            json!({
                "rgb": { "r": r, "g": g, "b": b },
                "hex": format!("#{r:02x}{g:02x}{b:02x}"),
                "count": count,
            })
        })
        .collect()
}

// ─── image.rotate ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RotateParams {
    file: String,
    output_path: String,
    angle: f32,
    #[serde(default = "default_true")]
    expand: bool,
    fill_color: Option<String>,
    #[serde(default = "default_image_quality")]
    quality: u8,
}

pub fn rotate(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: RotateParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, angle = p.angle, "rotating image");

    progress.emit(20.0, "Opening image")?;
    let img = image::open(&p.file)?;
    let fill = p
        .fill_color
        .as_deref()
        .and_then(parse_fill_color)
        .unwrap_or(Rgba([0, 0, 0, 0]));

    progress.emit(50.0, "Rotating image")?;
    let angle = p.angle.rem_euclid(360.0);
    // Angles are counterclockwise; the crate's quarter-turns are clockwise.
    let rotated = if angle == 0.0 {
        img
    } else if angle == 90.0 {
        img.rotate270()
    } else if angle == 180.0 {
        img.rotate180()
    } else if angle == 270.0 {
        img.rotate90()
    } else {
        DynamicImage::ImageRgba8(rotate_arbitrary(&img.to_rgba8(), angle, p.expand, fill))
    };

    progress.emit(80.0, "Saving image")?;
    save_with_quality(&rotated, &p.output_path, p.quality)?;

    progress.emit(100.0, "Rotation completed")?;
    Ok(Value::String(p.output_path))
}

fn parse_fill_color(s: &str) -> Option<Rgba<u8>> {
    let hex = s.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgba([r, g, b, 255]))
}

/// Counterclockwise rotation by an arbitrary angle with bilinear sampling.
/// With `expand` the canvas grows to hold the whole rotated image,
/// otherwise it keeps the source dimensions and clips the corners.
fn rotate_arbitrary(src: &RgbaImage, angle_deg: f32, expand: bool, fill: Rgba<u8>) -> RgbaImage {
    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let (sw, sh) = (src.width() as f32, src.height() as f32);

    let (out_w, out_h) = if expand {
        // round() so float noise in sin/cos cannot add a stray pixel row.
        (
            (sw * cos.abs() + sh * sin.abs()).round().max(1.0) as u32,
            (sw * sin.abs() + sh * cos.abs()).round().max(1.0) as u32,
        )
    } else {
        (src.width(), src.height())
    };

    let (cxs, cys) = (sw / 2.0, sh / 2.0);
    let (cxd, cyd) = (out_w as f32 / 2.0, out_h as f32 / 2.0);

    let mut out = RgbaImage::from_pixel(out_w, out_h, fill);
    for y in 0..out_h {
        for x in 0..out_w {
            let dx = x as f32 + 0.5 - cxd;
            let dy = y as f32 + 0.5 - cyd;
            // Inverse map: rotate destination offsets back into the source.
            let sx = cos * dx - sin * dy + cxs - 0.5;
            let sy = sin * dx + cos * dy + cys - 0.5;
            if let Some(pixel) = bilinear_sample(src, sx, sy) {
                out.put_pixel(x, y, pixel);
            }
        }
    }
    out
}

fn bilinear_sample(src: &RgbaImage, x: f32, y: f32) -> Option<Rgba<u8>> {
    if x < -0.5 || y < -0.5 || x > src.width() as f32 - 0.5 || y > src.height() as f32 - 0.5 {
        return None;
    }
    let x0 = x.floor().max(0.0) as u32;
    let y0 = y.floor().max(0.0) as u32;
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);
    let fx = (x - x0 as f32).clamp(0.0, 1.0);
    let fy = (y - y0 as f32).clamp(0.0, 1.0);

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut blended = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        blended[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
    }
    Some(Rgba(blended))
}

// ─── image.flip ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlipParams {
    file: String,
    output_path: String,
    #[serde(default = "default_true")]
    horizontal: bool,
    #[serde(default = "default_image_quality")]
    quality: u8,
}

pub fn flip(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: FlipParams = serde_json::from_value(params)?;
    log_info!(file = %p.file, horizontal = p.horizontal, "flipping image");

    progress.emit(20.0, "Opening image")?;
    let img = image::open(&p.file)?;

    progress.emit(50.0, "Flipping image")?;
    let flipped = if p.horizontal {
        img.fliph()
    } else {
        img.flipv()
    };

    progress.emit(80.0, "Saving image")?;
    save_with_quality(&flipped, &p.output_path, p.quality)?;

    progress.emit(100.0, "Flip completed")?;
    Ok(Value::String(p.output_path))
}

// ─── image.enlarge ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnlargeParams {
    file: String,
    output_path: String,
    #[serde(default = "default_scale_factor")]
    scale_factor: u32,
    #[serde(default = "default_image_quality")]
    quality: u8,
}

fn default_scale_factor() -> u32 {
    2
}

/// Upper bound on an enlarged output dimension.
const MAX_ENLARGE_DIM: u32 = 20_000;

/// Output dimensions for an enlargement. The factor is client input, so the
/// multiply is checked and the canvas is capped.
fn enlarged_dimensions(w: u32, h: u32, factor: u32) -> Result<(u32, u32), HandlerError> {
    match (w.checked_mul(factor), h.checked_mul(factor)) {
        (Some(nw), Some(nh)) if nw <= MAX_ENLARGE_DIM && nh <= MAX_ENLARGE_DIM => Ok((nw, nh)),
        _ => Err(HandlerError::InvalidParams(format!(
            "scaleFactor {factor} would exceed the {MAX_ENLARGE_DIM}px output limit"
        ))),
    }
}

pub fn enlarge(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: EnlargeParams = serde_json::from_value(params)?;
    if p.scale_factor == 0 {
        return Err(HandlerError::InvalidParams("scaleFactor must be positive".into()));
    }
    log_info!(file = %p.file, factor = p.scale_factor, "enlarging image");

    progress.emit(10.0, "Opening image")?;
    let img = image::open(&p.file)?;
    let (new_w, new_h) = enlarged_dimensions(img.width(), img.height(), p.scale_factor)?;

    progress.emit(30.0, &format!("Upscaling to {new_w}x{new_h}"))?;
    let enlarged = img.resize_exact(new_w, new_h, FilterType::Lanczos3);

    progress.emit(80.0, "Saving image")?;
    save_with_quality(&enlarged, &p.output_path, p.quality)?;

    progress.emit(100.0, "Enlargement completed")?;
    Ok(Value::String(p.output_path))
}

// ─── Shared helpers ──────────────────────────────────────────────────────────

/// Save to the format implied by the output extension. JPEG gets the
/// explicit quality setting and an alpha-stripped copy; everything else
/// goes through the crate's default encoder for that extension.
fn save_with_quality(
    img: &DynamicImage,
    path: &str,
    quality: u8,
) -> Result<(), HandlerError> {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if ext == "jpg" || ext == "jpeg" {
        let rgb = img.to_rgb8();
        let file = BufWriter::new(std::fs::File::create(path)?);
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(file, quality.clamp(1, 100));
        encoder.encode_image(&rgb)?;
        Ok(())
    } else if ext.is_empty() {
        Err(HandlerError::InvalidParams(format!(
            "cannot infer image format from '{path}'"
        )))
    } else {
        img.save(path).map_err(|e| HandlerError::Other(anyhow!(e)))
    }
}
