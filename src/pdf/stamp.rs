//! One-page watermark stamp generation.
//!
//! Watermarking works by building a minimal single-page PDF containing just
//! the mark (diagonal gray text, or an embedded JPEG with constant alpha)
//! sized to the target document's first page, then letting qpdf overlay it
//! onto every page. The writer below emits exactly the handful of PDF
//! constructs that needs: a catalog, one page, one content stream, an
//! ExtGState for the opacity, and optionally a DCTDecode image XObject.

// Placement of an image mark, in PDF coordinates (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Compute where an image mark of `img_w`x`img_h` pixels lands on a
/// `page_w`x`page_h` page. `scale` bounds the mark to that fraction of the
/// page; the image's aspect ratio is preserved. `position` is one of the
/// nine compass anchors ("center", "top-left", "bottom-right", "top", ...);
/// anything unrecognized falls back to center.
pub fn watermark_rect(
    page_w: f32,
    page_h: f32,
    img_w: u32,
    img_h: u32,
    position: &str,
    scale: f32,
) -> StampRect {
    let aspect = img_w as f32 / img_h.max(1) as f32;
    let max_w = page_w * scale;
    let max_h = page_h * scale;

    let (w, h) = if aspect > 1.0 {
        (max_w, max_w / aspect)
    } else {
        (max_h * aspect, max_h)
    };

    let margin = 20.0;
    // Anchor offsets measured from the top-left corner, like the UI shows
    // them; converted to bottom-left PDF coordinates below.
    let (x, y_top) = match position {
        "top-left" => (margin, margin),
        "top-right" => (page_w - w - margin, margin),
        "bottom-left" => (margin, page_h - h - margin),
        "bottom-right" => (page_w - w - margin, page_h - h - margin),
        "top" => ((page_w - w) / 2.0, margin),
        "bottom" => ((page_w - w) / 2.0, page_h - h - margin),
        "left" => (margin, (page_h - h) / 2.0),
        "right" => (page_w - w - margin, (page_h - h) / 2.0),
        _ => ((page_w - w) / 2.0, (page_h - h) / 2.0),
    };

    StampRect {
        x,
        y: page_h - y_top - h,
        w,
        h,
    }
}

/// Build a stamp page with `text` drawn diagonally across the center in
/// 60pt gray Helvetica at the given opacity.
pub fn text_stamp(page_w: f32, page_h: f32, text: &str, opacity: f64) -> Vec<u8> {
    let font_size = 60.0_f32;
    // Helvetica averages roughly half an em per glyph; close enough for
    // centering a watermark.
    let text_width = text.chars().count() as f32 * font_size * 0.5;
    let cx = page_w / 2.0;
    let cy = page_h / 2.0;

    // 45 degrees counterclockwise about the page center.
    let (sin, cos) = std::f32::consts::FRAC_PI_4.sin_cos();
    let tx = cx - (text_width / 2.0) * cos;
    let ty = cy - (text_width / 2.0) * sin;

    let content = format!(
        "q /GS0 gs BT /F0 {font_size} Tf 0.5 0.5 0.5 rg \
         {cos:.4} {sin:.4} {:.4} {cos:.4} {tx:.2} {ty:.2} Tm ({}) Tj ET Q",
        -sin,
        escape_pdf_string(text),
    );

    let mut w = PdfWriter::new();
    w.object(b"<< /Type /Catalog /Pages 2 0 R >>");
    w.object(b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    w.object(
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {page_w:.2} {page_h:.2}] \
             /Contents 4 0 R /Resources << /ExtGState << /GS0 5 0 R >> \
             /Font << /F0 6 0 R >> >> >>"
        )
        .as_bytes(),
    );
    w.stream(&[], content.as_bytes());
    w.object(format!("<< /Type /ExtGState /ca {opacity} /CA {opacity} >>").as_bytes());
    w.object(b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    w.finish(1)
}

/// Build a stamp page placing `jpeg` (baseline JPEG, RGB) at `rect` with
/// constant opacity.
pub fn image_stamp(
    page_w: f32,
    page_h: f32,
    jpeg: &[u8],
    img_w: u32,
    img_h: u32,
    rect: StampRect,
    opacity: f64,
) -> Vec<u8> {
    let content = format!(
        "q /GS0 gs {:.2} 0 0 {:.2} {:.2} {:.2} cm /Im0 Do Q",
        rect.w, rect.h, rect.x, rect.y
    );

    let mut w = PdfWriter::new();
    w.object(b"<< /Type /Catalog /Pages 2 0 R >>");
    w.object(b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    w.object(
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {page_w:.2} {page_h:.2}] \
             /Contents 4 0 R /Resources << /ExtGState << /GS0 5 0 R >> \
             /XObject << /Im0 6 0 R >> >> >>"
        )
        .as_bytes(),
    );
    w.stream(&[], content.as_bytes());
    w.object(format!("<< /Type /ExtGState /ca {opacity} /CA {opacity} >>").as_bytes());
    w.stream(
        format!(
            "/Type /XObject /Subtype /Image /Width {img_w} /Height {img_h} \
             /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode"
        )
        .as_bytes(),
        jpeg,
    );
    w.finish(1)
}

fn escape_pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

// ─── Minimal PDF writer ──────────────────────────────────────────────────────

struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        Self {
            buf: b"%PDF-1.7\n".to_vec(),
            offsets: Vec::new(),
        }
    }

    /// Append a plain object; returns its 1-based object number.
    fn object(&mut self, body: &[u8]) -> usize {
        self.offsets.push(self.buf.len());
        let num = self.offsets.len();
        self.buf.extend_from_slice(format!("{num} 0 obj\n").as_bytes());
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
        num
    }

    /// Append a stream object with `extra` dictionary entries and raw `data`.
    fn stream(&mut self, extra: &[u8], data: &[u8]) -> usize {
        self.offsets.push(self.buf.len());
        let num = self.offsets.len();
        self.buf.extend_from_slice(format!("{num} 0 obj\n<< ").as_bytes());
        if !extra.is_empty() {
            self.buf.extend_from_slice(extra);
            self.buf.push(b' ');
        }
        self.buf
            .extend_from_slice(format!("/Length {} >>\nstream\n", data.len()).as_bytes());
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        num
    }

    /// Write the xref table and trailer, consuming the writer.
    fn finish(mut self, root: usize) -> Vec<u8> {
        let xref_at = self.buf.len();
        let count = self.offsets.len() + 1;
        self.buf
            .extend_from_slice(format!("xref\n0 {count}\n0000000000 65535 f \n").as_bytes());
        for off in &self.offsets {
            self.buf
                .extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }
        self.buf.extend_from_slice(
            format!(
                "trailer\n<< /Size {count} /Root {root} 0 R >>\nstartxref\n{xref_at}\n%%EOF\n"
            )
            .as_bytes(),
        );
        self.buf
    }
}
