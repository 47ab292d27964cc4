//! PDF renderer capability: native text blocks with boxes, and page rasters.
//!
//! [`PdfBackend`] opens a file; [`PdfPages`] answers per-page questions.
//! [`LopdfBackend`] is the bundled implementation. Text comes from
//! `pdf-extract`, which decodes every glyph through the font's encoding,
//! `ToUnicode` CMap or Type0 CID mapping and reports it with its text
//! rendering matrix. Glyphs are grouped into lines by baseline and lines into
//! layout blocks. `lopdf` supplies page boxes and rasterization, which
//! decodes the page's largest embedded image; for scanned sheets that is the
//! whole sheet.

use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use flate2::read::ZlibDecoder;
use image::DynamicImage;
use image::imageops::FilterType;
use lopdf::{Document, Object, ObjectId};
use pdf_extract::{MediaBox, OutputDev, OutputError, Transform};
use tracing::{debug, warn};

use crate::document::BoundingBox;
use crate::error::{RagError, Result};

/// A run of native text with its location on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub bbox: BoundingBox,
    pub text: String,
}

/// Opens PDF files.
pub trait PdfBackend: Send + Sync {
    /// Open the PDF at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Extraction`] if the file cannot be read or parsed.
    fn open(&self, path: &Path) -> Result<Box<dyn PdfPages>>;
}

/// An opened PDF. Pages are 0-based.
pub trait PdfPages {
    fn page_count(&self) -> usize;

    /// Page rectangle in points with a top-left origin, if known.
    fn page_rect(&self, page: usize) -> Option<BoundingBox>;

    /// Native text blocks of a page, in content order.
    fn text_blocks(&self, page: usize) -> Result<Vec<TextBlock>>;

    /// Rasterize a page at `dpi`. `None` when the page has nothing to render.
    fn render(&self, page: usize, dpi: u32) -> Result<Option<DynamicImage>>;
}

/// [`PdfBackend`] backed by `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfBackend;

impl LopdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PdfBackend for LopdfBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfPages>> {
        let doc = Document::load(path).map_err(|e| RagError::Extraction {
            path: path.display().to_string(),
            message: format!("failed to load PDF: {e}"),
        })?;
        Ok(Box::new(LopdfPages::new(doc)))
    }
}

/// An opened `lopdf` document with its text layer laid out.
pub struct LopdfPages {
    doc: Document,
    pages: Vec<ObjectId>,
    text: Vec<PageText>,
}

impl LopdfPages {
    /// Wrap an already-loaded document and lay out its text.
    pub fn new(doc: Document) -> Self {
        // get_pages is keyed by 1-based page number, so values() is in page order.
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let text = layout_text(&doc, pages.len());
        Self { doc, pages, text }
    }

    fn page_id(&self, page: usize) -> Result<ObjectId> {
        self.pages.get(page).copied().ok_or_else(|| RagError::Extraction {
            path: String::from("<pdf>"),
            message: format!("page {page} out of range ({} pages)", self.pages.len()),
        })
    }

    /// MediaBox of a page, following `Parent` links for inherited boxes.
    fn media_box(&self, page_id: ObjectId) -> Option<[f32; 4]> {
        let mut current = self.doc.get_dictionary(page_id).ok()?;
        // Page trees are shallow; the bound only guards against reference cycles.
        for _ in 0..32 {
            if let Ok(Object::Array(values)) = current.get(b"MediaBox") {
                let numbers: Vec<f32> = values
                    .iter()
                    .filter_map(|v| match v {
                        Object::Reference(id) => self.doc.get_object(*id).ok().and_then(number),
                        other => number(other),
                    })
                    .collect();
                if numbers.len() == 4 {
                    return Some([numbers[0], numbers[1], numbers[2], numbers[3]]);
                }
            }
            let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
            current = self.doc.get_dictionary(parent).ok()?;
        }
        None
    }
}

impl PdfPages for LopdfPages {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_rect(&self, page: usize) -> Option<BoundingBox> {
        let [x0, y0, x1, y1] = self.media_box(self.page_id(page).ok()?)?;
        Some(BoundingBox::new(0.0, 0.0, (x1 - x0).abs(), (y1 - y0).abs()))
    }

    fn text_blocks(&self, page: usize) -> Result<Vec<TextBlock>> {
        self.page_id(page)?;
        match self.text.get(page) {
            Some(Ok(blocks)) => Ok(blocks.clone()),
            Some(Err(message)) => Err(RagError::Extraction {
                path: String::from("<pdf>"),
                message: format!("failed to read text of page {page}: {message}"),
            }),
            None => Ok(Vec::new()),
        }
    }

    fn render(&self, page: usize, dpi: u32) -> Result<Option<DynamicImage>> {
        let page_id = self.page_id(page)?;
        let images = match self.doc.get_page_images(page_id) {
            Ok(images) => images,
            Err(e) => {
                debug!(page, error = %e, "no images on page");
                return Ok(None);
            }
        };

        let Some(largest) = images.iter().max_by_key(|img| img.width * img.height) else {
            return Ok(None);
        };
        let Some(decoded) = decode_pdf_image(largest) else {
            return Ok(None);
        };

        let Some(rect) = self.page_rect(page) else {
            return Ok(Some(decoded));
        };
        Ok(Some(resample_to_dpi(decoded, rect, dpi)))
    }
}

/// Upper bound on rasterized pixels; large-format sheets at 300 DPI exceed it.
const MAX_RENDER_PIXELS: f64 = 80_000_000.0;

fn resample_to_dpi(image: DynamicImage, rect: BoundingBox, dpi: u32) -> DynamicImage {
    let mut width = f64::from(rect.width()) / 72.0 * f64::from(dpi);
    let mut height = f64::from(rect.height()) / 72.0 * f64::from(dpi);
    if width < 1.0 || height < 1.0 {
        return image;
    }
    let pixels = width * height;
    if pixels > MAX_RENDER_PIXELS {
        let shrink = (MAX_RENDER_PIXELS / pixels).sqrt();
        width *= shrink;
        height *= shrink;
    }
    let (width, height) = (width.round() as u32, height.round() as u32);
    if image.width() == width && image.height() == height {
        return image;
    }
    image.resize_exact(width, height, FilterType::Triangle)
}

fn decode_pdf_image(pdf_image: &lopdf::xobject::PdfImage) -> Option<DynamicImage> {
    let filters = pdf_image.filters.clone().unwrap_or_default();
    let width = u32::try_from(pdf_image.width).ok()?;
    let height = u32::try_from(pdf_image.height).ok()?;

    if filters.iter().any(|f| f == "DCTDecode") {
        return image::load_from_memory(pdf_image.content).ok();
    }

    let raw = if filters.iter().any(|f| f == "FlateDecode") {
        let mut decoder = ZlibDecoder::new(pdf_image.content);
        let mut decompressed = Vec::new();
        if let Err(e) = decoder.read_to_end(&mut decompressed) {
            debug!(error = %e, "failed to inflate page image");
            return None;
        }
        decompressed
    } else if filters.is_empty() {
        pdf_image.content.to_vec()
    } else {
        debug!(?filters, "unsupported image filter");
        return None;
    };

    match pdf_image.color_space.as_deref().unwrap_or("DeviceRGB") {
        "DeviceGray" | "Gray" | "CalGray" => {
            image::GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8)
        }
        "DeviceCMYK" | "CMYK" => image::RgbImage::from_raw(width, height, cmyk_to_rgb(&raw))
            .map(DynamicImage::ImageRgb8),
        _ => image::RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
    }
}

#[allow(clippy::many_single_char_names)]
fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((cmyk.len() / 4) * 3);
    for px in cmyk.chunks_exact(4) {
        let k = 1.0 - f32::from(px[3]) / 255.0;
        for channel in &px[..3] {
            let value = 255.0 * (1.0 - f32::from(*channel) / 255.0) * k;
            rgb.push(value.clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

type DevResult = std::result::Result<(), OutputError>;

/// Blocks of one page, or why its text layer could not be read.
type PageText = std::result::Result<Vec<TextBlock>, String>;

/// Fraction of the font size a glyph box extends below the baseline.
const DESCENT: f32 = 0.2;

/// Horizontal gaps wider than this fraction of the font size read as a space.
const WORD_GAP: f32 = 0.25;

/// Horizontal gaps wider than this fraction of the font size end the line.
const LINE_GAP: f32 = 2.0;

/// Interpret every page with `pdf-extract` and collect its blocks.
///
/// Pages the interpreter never reached carry the error that stopped it. Some
/// malformed fonts make `pdf-extract` panic, so a panic is caught and handled
/// the same way.
fn layout_text(doc: &Document, page_count: usize) -> Vec<PageText> {
    let mut collector = BlockCollector::default();
    let outcome = catch_unwind(AssertUnwindSafe(|| pdf_extract::output_doc(doc, &mut collector)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:?}")),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };
    if let Some(message) = &failure {
        warn!(
            pages_read = collector.pages.len(),
            page_count,
            error = %message,
            "text layer interpretation stopped"
        );
    }

    let mut text: Vec<_> = collector.pages.into_iter().map(Ok).collect();
    text.truncate(page_count);
    while text.len() < page_count {
        text.push(match &failure {
            Some(message) => Err(message.clone()),
            None => Ok(Vec::new()),
        });
    }
    text
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("pdf-extract panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("pdf-extract panicked: {s}")
    } else {
        String::from("pdf-extract panicked")
    }
}

#[derive(Debug)]
struct Line {
    bbox: BoundingBox,
    baseline: f32,
    text: String,
    size: f32,
}

/// [`OutputDev`] that strings decoded glyphs into lines and lines into blocks.
#[derive(Default)]
struct BlockCollector {
    /// `(llx, ury)` of the current page's MediaBox.
    origin: (f32, f32),
    lines: Vec<Line>,
    pages: Vec<Vec<TextBlock>>,
}

impl BlockCollector {
    fn start_page(&mut self, llx: f32, ury: f32) {
        self.origin = (llx, ury);
        self.lines.clear();
    }

    /// Place one glyph whose origin is `(x, y)` in PDF user space.
    fn push_glyph(&mut self, x: f32, y: f32, size: f32, advance: f32, text: &str) {
        let text: String = text.chars().filter(|c| !c.is_control()).collect();
        if text.is_empty() {
            return;
        }
        let x = x - self.origin.0;
        let baseline = self.origin.1 - y;
        let bbox =
            BoundingBox::new(x, baseline - size, x + advance.max(0.0), baseline + size * DESCENT);
        let blank = text.trim().is_empty();

        if let Some(line) = self.lines.last_mut() {
            let scale = line.size.max(size);
            let gap = x - line.bbox.x1;
            let same_line = (line.baseline - baseline).abs() < scale * DESCENT;
            if same_line && gap > -scale && gap < scale * LINE_GAP {
                let spaced = line.text.ends_with(' ');
                if blank {
                    if !spaced {
                        line.text.push(' ');
                    }
                } else {
                    if gap > scale * WORD_GAP && !spaced {
                        line.text.push(' ');
                    }
                    line.text.push_str(&text);
                }
                line.bbox = line.bbox.union(&bbox);
                line.size = scale;
                return;
            }
        }
        if !blank {
            self.lines.push(Line { bbox, baseline, text, size });
        }
    }

    fn finish_page(&mut self) {
        let lines: Vec<Line> = std::mem::take(&mut self.lines)
            .into_iter()
            .filter(|line| !line.text.trim().is_empty())
            .collect();
        debug!(page = self.pages.len(), lines = lines.len(), "positioned text lines");
        self.pages.push(group_lines(lines));
    }
}

impl OutputDev for BlockCollector {
    fn begin_page(
        &mut self,
        _page_num: u32,
        media_box: &MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> DevResult {
        self.start_page(media_box.llx as f32, media_box.ury as f32);
        Ok(())
    }

    fn end_page(&mut self) -> DevResult {
        self.finish_page();
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &Transform,
        width: f64,
        spacing: f64,
        font_size: f64,
        char: &str,
    ) -> DevResult {
        // The rendering matrix excludes the font size; its columns scale it.
        let size = font_size * trm.m21.hypot(trm.m22);
        let size = if size > f64::EPSILON { size } else { font_size.abs() };
        let advance = (width * font_size + spacing) * trm.m11.hypot(trm.m12);
        self.push_glyph(trm.m31 as f32, trm.m32 as f32, size as f32, advance as f32, char);
        Ok(())
    }

    fn begin_word(&mut self) -> DevResult {
        Ok(())
    }

    fn end_word(&mut self) -> DevResult {
        Ok(())
    }

    fn end_line(&mut self) -> DevResult {
        Ok(())
    }
}

/// Merge vertically adjacent, horizontally overlapping lines into blocks.
fn group_lines(lines: Vec<Line>) -> Vec<TextBlock> {
    let mut blocks: Vec<(TextBlock, f32)> = Vec::new();
    for line in lines {
        let text = line.text.trim().to_string();
        let joins = blocks.last().is_some_and(|(block, size)| {
            let gap = line.bbox.y0 - block.bbox.y1;
            let overlaps = line.bbox.x0 < block.bbox.x1 && line.bbox.x1 > block.bbox.x0;
            overlaps && gap > -line.size && gap < size.max(line.size) * 0.8
        });
        if joins {
            if let Some((block, size)) = blocks.last_mut() {
                block.text.push('\n');
                block.text.push_str(&text);
                block.bbox = block.bbox.union(&line.bbox);
                *size = size.max(line.size);
            }
        } else {
            blocks.push((TextBlock { bbox: line.bbox, text }, line.size));
        }
    }
    blocks.into_iter().map(|(block, _)| block).collect()
}
