//! PDF operations.
//!
//! Reading and rasterization happen in-process through mupdf; every
//! operation that rewrites a document (merge, split, rotate, encryption,
//! watermark overlay) shells out to qpdf so the originals are never
//! modified in place.

pub mod qpdf;
pub mod stamp;

use std::io::Cursor;
use std::io::Write as _;
use std::path::Path;

use anyhow::anyhow;
use mupdf::{Colorspace, Document, Matrix, MetadataName};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::HandlerError;
use crate::rpc::progress::ProgressSender;
use crate::AppContext;

// ─── pdf.merge ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeParams {
    files: Vec<String>,
    output_path: String,
}

pub fn merge(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: MergeParams = serde_json::from_value(params)?;
    if p.files.is_empty() {
        return Err(HandlerError::InvalidParams("files must not be empty".into()));
    }
    info!(count = p.files.len(), "merging PDF files");

    progress.emit(0.0, &format!("Merging {} files", p.files.len()))?;
    let mut args: Vec<&str> = vec!["--empty", "--pages"];
    args.extend(p.files.iter().map(String::as_str));
    args.push("--");
    args.push(&p.output_path);
    qpdf::run(ctx, args)?;
    progress.emit(100.0, "Done")?;

    Ok(Value::String(p.output_path))
}

// ─── pdf.split ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitParams {
    file: String,
    output_dir: String,
    ranges: Option<String>,
    every_n_pages: Option<usize>,
}

pub fn split(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: SplitParams = serde_json::from_value(params)?;
    info!(file = %p.file, "splitting PDF");

    let doc = Document::open(&p.file)?;
    let total_pages = doc.page_count()? as usize;
    drop(doc);
    if total_pages == 0 {
        return Err(HandlerError::Other(anyhow!("document has no pages")));
    }

    std::fs::create_dir_all(&p.output_dir)?;
    let base = file_stem(&p.file)?;

    // (start, end) page pairs, 0-indexed inclusive, plus the output name.
    let groups: Vec<(usize, usize, String)> = if let Some(n) = p.every_n_pages {
        if n == 0 {
            return Err(HandlerError::InvalidParams("everyNPages must be positive".into()));
        }
        (0..total_pages)
            .step_by(n)
            .map(|s| {
                let e = (s + n - 1).min(total_pages - 1);
                (s, e, format!("{base}_pages_{}-{}.pdf", s + 1, e + 1))
            })
            .collect()
    } else if let Some(ranges) = &p.ranges {
        parse_page_ranges(ranges, total_pages)?
            .into_iter()
            .map(|(s, e)| (s, e, format!("{base}_pages_{}-{}.pdf", s + 1, e + 1)))
            .collect()
    } else {
        (0..total_pages)
            .map(|i| (i, i, format!("{base}_page_{}.pdf", i + 1)))
            .collect()
    };

    let mut output_files = Vec::with_capacity(groups.len());
    let count = groups.len();
    for (idx, (start, end, name)) in groups.into_iter().enumerate() {
        let out_path = Path::new(&p.output_dir).join(name);
        progress.add_output(&out_path);

        let page_spec = format!("{}-{}", start + 1, end + 1);
        let out_str = out_path.to_string_lossy().into_owned();
        qpdf::run(
            ctx,
            [
                p.file.as_str(),
                "--pages",
                p.file.as_str(),
                &page_spec,
                "--",
                &out_str,
            ],
        )?;
        output_files.push(Value::String(out_str));
        progress.emit(
            (idx + 1) as f64 / count as f64 * 100.0,
            &format!("Writing part {}/{count}", idx + 1),
        )?;
    }

    info!(parts = output_files.len(), "split complete");
    Ok(Value::Array(output_files))
}

/// Parse "1-3,5,7-9" into 0-indexed inclusive pairs, clamped to the
/// document. Single out-of-range pages are dropped, like they always were.
fn parse_page_ranges(ranges: &str, total_pages: usize) -> Result<Vec<(usize, usize)>, HandlerError> {
    let mut result = Vec::new();
    for part in ranges.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((a, b)) = part.split_once('-') {
            let start: usize = parse_page_number(a)?;
            let end: usize = parse_page_number(b)?;
            result.push((start.saturating_sub(1), end.saturating_sub(1).min(total_pages - 1)));
        } else {
            let page = parse_page_number(part)?;
            if page >= 1 && page <= total_pages {
                result.push((page - 1, page - 1));
            }
        }
    }
    Ok(result)
}

fn parse_page_number(s: &str) -> Result<usize, HandlerError> {
    s.trim()
        .parse()
        .map_err(|_| HandlerError::InvalidParams(format!("invalid page number '{}'", s.trim())))
}

// ─── pdf.compress ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompressParams {
    file: String,
    output_path: String,
    #[serde(default = "default_quality")]
    quality: u32,
}

fn default_quality() -> u32 {
    75
}

pub fn compress(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: CompressParams = serde_json::from_value(params)?;
    info!(file = %p.file, quality = p.quality, "compressing PDF");

    progress.emit(10.0, "Compressing...")?;
    qpdf::run(
        ctx,
        [
            "--object-streams=generate",
            "--compress-streams=y",
            "--recompress-flate",
            "--optimize-images",
            &p.file,
            &p.output_path,
        ],
    )?;
    progress.emit(100.0, "Done")?;

    Ok(Value::String(p.output_path))
}

// ─── pdf.toImages ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToImagesParams {
    file: String,
    output_dir: String,
    #[serde(default = "default_image_format")]
    format: String,
    #[serde(default = "default_dpi")]
    dpi: u32,
}

fn default_image_format() -> String {
    "png".to_string()
}

fn default_dpi() -> u32 {
    150
}

pub fn to_images(
    _ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: ToImagesParams = serde_json::from_value(params)?;
    info!(file = %p.file, dpi = p.dpi, format = %p.format, "rendering PDF pages");

    let jpeg = matches!(p.format.to_lowercase().as_str(), "jpg" | "jpeg");
    let ext: &str = if jpeg { &p.format } else { "png" };

    let doc = Document::open(&p.file)?;
    let total_pages = doc.page_count()?;
    std::fs::create_dir_all(&p.output_dir)?;
    let base = file_stem(&p.file)?;

    // 72 DPI is the PDF native resolution.
    let zoom = p.dpi as f32 / 72.0;
    let matrix = Matrix::new_scale(zoom, zoom);
    let colorspace = Colorspace::device_rgb();

    let mut output_files = Vec::with_capacity(total_pages as usize);
    for page_num in 0..total_pages {
        let page = doc.load_page(page_num)?;
        let pixmap = page.to_pixmap(&matrix, &colorspace, true, false)?;
        let img = pixmap_to_image(&pixmap)?;

        let out_path =
            Path::new(&p.output_dir).join(format!("{base}_page_{}.{ext}", page_num + 1));
        progress.add_output(&out_path);

        let mut encoded = Vec::new();
        let dynamic = image::DynamicImage::ImageRgba8(img);
        if jpeg {
            // JPEG has no alpha channel.
            image::DynamicImage::ImageRgb8(dynamic.to_rgb8())
                .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Jpeg)?;
        } else {
            dynamic.write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)?;
        }
        std::fs::write(&out_path, &encoded)?;

        output_files.push(Value::String(out_path.to_string_lossy().into_owned()));
        progress.emit(
            (page_num + 1) as f64 / total_pages as f64 * 100.0,
            &format!("Converting page {}/{total_pages}", page_num + 1),
        )?;
    }

    info!(pages = output_files.len(), "render complete");
    Ok(Value::Array(output_files))
}

/// RGBA copy of a mupdf pixmap (samples may be RGB or RGBA).
fn pixmap_to_image(pixmap: &mupdf::Pixmap) -> Result<image::RgbaImage, HandlerError> {
    let width = pixmap.width();
    let height = pixmap.height();
    let samples = pixmap.samples();
    let n = pixmap.n() as usize;

    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for i in 0..(width * height) as usize {
        let offset = i * n;
        let r = samples.get(offset).copied().unwrap_or(0);
        let g = samples.get(offset + 1).copied().unwrap_or(0);
        let b = samples.get(offset + 2).copied().unwrap_or(0);
        let a = if n >= 4 {
            samples.get(offset + 3).copied().unwrap_or(255)
        } else {
            255
        };
        rgba.extend_from_slice(&[r, g, b, a]);
    }

    image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| HandlerError::Other(anyhow!("pixmap buffer size mismatch")))
}

// ─── pdf.rotate ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RotateParams {
    file: String,
    output_path: String,
    angle: i64,
    pages: Option<Vec<usize>>,
}

pub fn rotate(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: RotateParams = serde_json::from_value(params)?;
    if p.angle % 90 != 0 {
        return Err(HandlerError::InvalidParams(
            "angle must be a multiple of 90".into(),
        ));
    }
    let angle = p.angle.rem_euclid(360);
    info!(file = %p.file, angle, "rotating PDF pages");

    let page_spec = match &p.pages {
        Some(pages) if !pages.is_empty() => pages
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(","),
        _ => "1-z".to_string(),
    };

    progress.emit(10.0, "Rotating...")?;
    // "+" rotates relative to each page's existing rotation.
    qpdf::run(
        ctx,
        [
            format!("--rotate=+{angle}:{page_spec}").as_str(),
            &p.file,
            &p.output_path,
        ],
    )?;
    progress.emit(100.0, "Done")?;

    Ok(Value::String(p.output_path))
}

// ─── pdf.addWatermark ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkParams {
    file: String,
    output_path: String,
    text: Option<String>,
    image: Option<String>,
    #[serde(default = "default_opacity")]
    opacity: f64,
    #[serde(default = "default_position")]
    position: String,
    #[serde(default = "default_scale")]
    scale: f32,
}

fn default_opacity() -> f64 {
    0.3
}

fn default_position() -> String {
    "center".to_string()
}

fn default_scale() -> f32 {
    0.3
}

pub fn add_watermark(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: WatermarkParams = serde_json::from_value(params)?;
    info!(file = %p.file, has_text = p.text.is_some(), has_image = p.image.is_some(), "adding watermark");

    let doc = Document::open(&p.file)?;
    let bounds = doc.load_page(0)?.bounds()?;
    let (page_w, page_h) = (bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);
    drop(doc);

    progress.emit(10.0, "Building watermark...")?;
    let stamp_bytes = if let Some(text) = &p.text {
        stamp::text_stamp(page_w, page_h, text, p.opacity)
    } else if let Some(image_path) = &p.image {
        let img = image::open(image_path)?.to_rgb8();
        let (img_w, img_h) = img.dimensions();
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)?;
        let rect = stamp::watermark_rect(page_w, page_h, img_w, img_h, &p.position, p.scale);
        stamp::image_stamp(page_w, page_h, &jpeg, img_w, img_h, rect, p.opacity)
    } else {
        return Err(HandlerError::InvalidParams(
            "either text or image is required".into(),
        ));
    };

    let mut stamp_file = tempfile::Builder::new()
        .prefix("watermark-")
        .suffix(".pdf")
        .tempfile()?;
    stamp_file.write_all(&stamp_bytes)?;
    stamp_file.flush()?;

    progress.emit(50.0, "Applying to pages...")?;
    let stamp_path = stamp_file.path().to_string_lossy().into_owned();
    qpdf::run(
        ctx,
        [
            p.file.as_str(),
            "--overlay",
            &stamp_path,
            "--repeat=1",
            "--",
            &p.output_path,
        ],
    )?;
    progress.emit(100.0, "Done")?;

    Ok(Value::String(p.output_path))
}

// ─── pdf.encrypt / pdf.decrypt ───────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptParams {
    file: String,
    output_path: String,
    password: String,
    owner_password: Option<String>,
}

pub fn encrypt(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: EncryptParams = serde_json::from_value(params)?;
    info!(file = %p.file, "encrypting PDF");

    let owner = p.owner_password.as_deref().unwrap_or(&p.password);
    progress.emit(50.0, "Encrypting...")?;
    qpdf::run(
        ctx,
        [
            "--encrypt",
            &p.password,
            owner,
            "256",
            "--",
            &p.file,
            &p.output_path,
        ],
    )?;
    progress.emit(100.0, "Done")?;

    Ok(Value::String(p.output_path))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptParams {
    file: String,
    output_path: String,
    password: String,
}

pub fn decrypt(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: DecryptParams = serde_json::from_value(params)?;
    info!(file = %p.file, "decrypting PDF");

    progress.emit(25.0, "Opening encrypted PDF...")?;
    if qpdf::is_encrypted(ctx, &p.file)? && !qpdf::password_opens(ctx, &p.file, &p.password)? {
        return Err(HandlerError::Other(anyhow!("Incorrect password")));
    }

    progress.emit(50.0, "Decrypting...")?;
    qpdf::run(
        ctx,
        [
            format!("--password={}", p.password).as_str(),
            "--decrypt",
            &p.file,
            &p.output_path,
        ],
    )?;
    progress.emit(100.0, "Done")?;

    Ok(Value::String(p.output_path))
}

// ─── pdf.crack ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrackParams {
    file: String,
    output_path: String,
    #[serde(default = "default_crack_method")]
    method: String,
    #[serde(default = "default_max_length")]
    max_length: usize,
    #[serde(default = "default_charset")]
    charset: String,
    custom_passwords: Option<Vec<String>>,
}

fn default_crack_method() -> String {
    "dictionary".to_string()
}

fn default_max_length() -> usize {
    4
}

fn default_charset() -> String {
    "digits".to_string()
}

const COMMON_PASSWORDS: &[&str] = &[
    "", "1234", "12345", "123456", "1234567", "12345678", "123456789",
    "password", "Password", "PASSWORD",
    "0000", "1111", "2222", "3333", "4444", "5555", "6666", "7777", "8888", "9999",
    "admin", "Admin", "ADMIN",
    "root", "Root", "ROOT",
    "user", "User", "USER",
    "test", "Test", "TEST",
    "pass", "Pass", "PASS",
    "abc123", "ABC123", "Abc123",
    "qwerty", "QWERTY", "Qwerty",
    "111111", "000000", "666666", "888888",
    "123123", "321321", "654321",
    "welcome", "Welcome", "WELCOME",
    "master", "Master", "MASTER",
    "login", "Login", "LOGIN",
    "letmein", "Letmein", "LETMEIN",
    "monkey", "dragon", "shadow", "sunshine",
    "princess", "football", "baseball", "soccer",
    "iloveyou", "trustno1", "whatever",
    "secret", "Secret", "SECRET",
    "0123", "9876", "1212", "2020", "2021", "2022", "2023", "2024", "2025",
    "0101", "0102", "0103", "0201", "0202", "0203",
    "1001", "1002", "1003", "1101", "1102", "1103", "1201", "1202", "1203",
];

pub fn crack(
    ctx: &AppContext,
    params: Value,
    progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: CrackParams = serde_json::from_value(params)?;
    info!(file = %p.file, method = %p.method, "attempting password recovery");

    if !qpdf::is_encrypted(ctx, &p.file)? {
        progress.emit(100.0, "PDF is not encrypted")?;
        qpdf::run(ctx, [p.file.as_str(), &p.output_path])?;
        return Ok(json!({
            "success": true,
            "password": null,
            "message": "PDF was not encrypted",
            "outputPath": p.output_path,
        }));
    }

    // Owner-password-only documents open with an empty user password, and
    // qpdf is allowed to strip their restrictions outright.
    progress.emit(5.0, "Trying to remove restrictions directly...")?;
    if qpdf::password_opens(ctx, &p.file, "")? {
        progress.emit(90.0, "Removing restrictions...")?;
        qpdf::run(
            ctx,
            ["--password=", "--decrypt", p.file.as_str(), &p.output_path],
        )?;
        progress.emit(100.0, "Done")?;
        return Ok(json!({
            "success": true,
            "password": "[no user password - owner restrictions removed]",
            "message": "PDF only had owner password restrictions, removed successfully",
            "outputPath": p.output_path,
        }));
    }

    let passwords: Vec<String> = match p.method.as_str() {
        "custom" => p.custom_passwords.unwrap_or_default(),
        "bruteforce" => brute_force_candidates(&p.charset, p.max_length),
        _ => COMMON_PASSWORDS.iter().map(|s| s.to_string()).collect(),
    };

    let total = passwords.len();
    if total == 0 {
        return Ok(json!({
            "success": false,
            "password": null,
            "message": "No passwords to try",
            "outputPath": null,
        }));
    }
    info!(total, "starting password attempts");

    let report_every = (total / 100).max(1);
    for (i, pwd) in passwords.iter().enumerate() {
        if i % report_every == 0 || i == total - 1 {
            // Leave headroom for the final save.
            progress.emit(
                (i as f64 / total as f64) * 95.0,
                &format!("Trying password {}/{total}...", i + 1),
            )?;
        }
        if qpdf::password_opens(ctx, &p.file, pwd)? {
            info!("password found");
            progress.emit(98.0, "Password found! Saving decrypted PDF...")?;
            qpdf::run(
                ctx,
                [
                    format!("--password={pwd}").as_str(),
                    "--decrypt",
                    &p.file,
                    &p.output_path,
                ],
            )?;
            progress.emit(100.0, "Done")?;
            return Ok(json!({
                "success": true,
                "password": if pwd.is_empty() { "[empty]" } else { pwd },
                "message": "Password cracked successfully",
                "outputPath": p.output_path,
            }));
        }
    }

    progress.emit(100.0, "Password not found")?;
    Ok(json!({
        "success": false,
        "password": null,
        "message": format!("Failed to crack password after trying {total} combinations"),
        "outputPath": null,
    }))
}

/// Every combination of the chosen charset up to `max_length` characters
/// (hard-capped at 6).
fn brute_force_candidates(charset: &str, max_length: usize) -> Vec<String> {
    let chars: Vec<char> = match charset {
        "lowercase" => ('a'..='z').collect(),
        "uppercase" => ('A'..='Z').collect(),
        "alphanumeric" => ('a'..='z').chain('A'..='Z').chain('0'..='9').collect(),
        _ => ('0'..='9').collect(),
    };

    let max_len = max_length.min(6).max(1);
    let mut out = Vec::new();
    for len in 1..=max_len {
        let mut idx = vec![0usize; len];
        'odometer: loop {
            out.push(idx.iter().map(|&i| chars[i]).collect::<String>());
            let mut pos = len;
            while pos > 0 {
                pos -= 1;
                idx[pos] += 1;
                if idx[pos] < chars.len() {
                    continue 'odometer;
                }
                idx[pos] = 0;
            }
            break;
        }
    }
    out
}

// ─── pdf.info ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoParams {
    file: String,
    password: Option<String>,
}

pub fn info(
    ctx: &AppContext,
    params: Value,
    _progress: &ProgressSender,
) -> Result<Value, HandlerError> {
    let p: InfoParams = serde_json::from_value(params)?;
    debug!(file = %p.file, "reading PDF info");

    let encrypted = qpdf::is_encrypted(ctx, &p.file)?;

    // mupdf cannot read a locked document; qpdf makes a plaintext scratch
    // copy when the caller supplied a password.
    let mut _scratch = None;
    let readable = if encrypted {
        let password = p.password.as_deref().unwrap_or("");
        let tmp = tempfile::Builder::new().suffix(".pdf").tempfile()?;
        qpdf::run(
            ctx,
            [
                format!("--password={password}").as_str(),
                "--decrypt",
                &p.file,
                &tmp.path().to_string_lossy(),
            ],
        )?;
        let path = tmp.path().to_string_lossy().into_owned();
        _scratch = Some(tmp);
        path
    } else {
        p.file.clone()
    };

    let doc = Document::open(&readable)?;
    let meta = |name: MetadataName| doc.metadata(name).unwrap_or_default();

    Ok(json!({
        "pageCount": doc.page_count()?,
        "title": meta(MetadataName::Title),
        "author": meta(MetadataName::Author),
        "subject": meta(MetadataName::Subject),
        "creator": meta(MetadataName::Creator),
        "producer": meta(MetadataName::Producer),
        "creationDate": meta(MetadataName::CreationDate),
        "modificationDate": meta(MetadataName::ModDate),
        "encrypted": encrypted,
    }))
}

// ─── Shared helpers ──────────────────────────────────────────────────────────

fn file_stem(file: &str) -> Result<String, HandlerError> {
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| HandlerError::InvalidParams(format!("invalid file path '{file}'")))
}
