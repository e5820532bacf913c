//! Reference steganalysis engine.
//!
//! The analysis routines are heuristics; callers only rely on the payload
//! shapes, which match what [`interpret`](crate::models::interpret) expects
//! for each method.

use std::f64::consts::PI;
use std::io::Cursor;

use image::{ColorType, DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::models::method_result::Method;

/// Marks the end of an LSB-embedded message.
const LSB_TERMINATOR: &[u8] = b"####";

/// Parity extraction gives up after this many bytes without a NUL.
const MAX_PARITY_BYTES: usize = 125;

const BLOCK: usize = 8;

/// PNG text keyword that carries a metadata-encoded message.
const METADATA_KEY: &str = "comment";

/// Techniques for embedding a message into an image.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EncodeMethod {
    #[default]
    LsbEncoding,
    ParityEncoding,
    /// Stores the message in a PNG text chunk; pixels are left untouched.
    MetadataEncoding,
}

/// Runs analysis methods and encoders over raw image bytes.
///
/// Both operations are CPU-bound; async callers run them on the blocking pool.
pub trait Analyzer: Send + Sync {
    /// Run `methods` and return one raw payload per method name.
    ///
    /// Fails only when the image cannot be decoded at all.
    fn analyze(&self, image: &[u8], methods: &[Method]) -> Result<Map<String, Value>, EngineError>;

    /// Embed `message` and return the stego image as PNG bytes.
    fn encode(&self, image: &[u8], message: &str, method: EncodeMethod) -> Result<Vec<u8>, EngineError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEngine;

impl ImageEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for ImageEngine {
    fn analyze(&self, image: &[u8], methods: &[Method]) -> Result<Map<String, Value>, EngineError> {
        let format = image::guess_format(image).ok();
        let decoded = image::load_from_memory(image)?;
        let rgb = decoded.to_rgb8();

        let mut results = Map::new();
        for method in methods {
            let payload = match method {
                Method::LsbExtraction => lsb_extraction(&rgb),
                Method::ParityBitExtraction => parity_bit_extraction(&rgb),
                Method::MetadataExtraction => metadata_extraction(image, &decoded, format),
                Method::DctAnalysis => dct_analysis(&decoded),
                Method::BitPlaneAnalysis => bit_plane_analysis(&rgb),
                Method::HistogramAnalysis => histogram_analysis(&rgb),
            };
            results.insert(method.to_string(), payload);
        }

        tracing::debug!(methods = methods.len(), width = rgb.width(), height = rgb.height(), "Image analyzed");
        Ok(results)
    }

    fn encode(&self, image: &[u8], message: &str, method: EncodeMethod) -> Result<Vec<u8>, EngineError> {
        let mut rgb = image::load_from_memory(image)?.to_rgb8();
        let mut text = Vec::new();

        match method {
            EncodeMethod::LsbEncoding => lsb_encode(&mut rgb, message)?,
            EncodeMethod::ParityEncoding => parity_encode(&mut rgb, message)?,
            EncodeMethod::MetadataEncoding => {
                text = png_text(image);
                text.retain(|(keyword, _)| keyword != METADATA_KEY);
                text.push((METADATA_KEY.to_string(), message.to_string()));
            }
        }

        write_png(&rgb, &text)
    }
}

/// MSB-first bits of `bytes`.
fn bits_of(bytes: &[u8]) -> impl Iterator<Item = u8> + '_ {
    bytes
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
}

/// Packs MSB-first bits into bytes until `stop` says the buffer is complete.
struct BytePacker {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BytePacker {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            current: 0,
            filled: 0,
        }
    }

    /// Push one bit; returns the finished byte when eight bits are in.
    fn push(&mut self, bit: u8) -> Option<u8> {
        self.current = (self.current << 1) | (bit & 1);
        self.filled += 1;
        if self.filled < 8 {
            return None;
        }
        let byte = self.current;
        self.bytes.push(byte);
        self.current = 0;
        self.filled = 0;
        Some(byte)
    }
}

fn lsb_extraction(rgb: &RgbImage) -> Value {
    let mut packer = BytePacker::new();

    for pixel in rgb.pixels() {
        for channel in pixel.0 {
            if packer.push(channel & 1).is_some() && packer.bytes.ends_with(LSB_TERMINATOR) {
                let end = packer.bytes.len() - LSB_TERMINATOR.len();
                let text = String::from_utf8_lossy(&packer.bytes[..end]).into_owned();
                return json!({ "message": text });
            }
        }
    }

    json!({ "message": "No valid data found" })
}

fn parity_bit_extraction(rgb: &RgbImage) -> Value {
    let mut packer = BytePacker::new();

    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let parity = ((r as u16 + g as u16 + b as u16) % 2) as u8;
        match packer.push(parity) {
            Some(0) => {
                packer.bytes.pop();
                break;
            }
            Some(_) if packer.bytes.len() >= MAX_PARITY_BYTES => break,
            _ => {}
        }
    }

    if packer.bytes.is_empty() {
        return json!({ "message": "No readable text found with parity method" });
    }
    json!({ "message": String::from_utf8_lossy(&packer.bytes) })
}

fn metadata_extraction(bytes: &[u8], image: &DynamicImage, format: Option<ImageFormat>) -> Value {
    let mut metadata = json!({
        "format": format.map(format_name),
        "mode": color_mode(image.color()),
        "size": [image.width(), image.height()],
    });

    if let Some(exif) = exif_fields(bytes) {
        metadata["exif"] = Value::Object(exif);
    }
    let text: Map<String, Value> = png_text(bytes)
        .into_iter()
        .map(|(keyword, value)| (keyword, Value::String(value)))
        .collect();
    if !text.is_empty() {
        metadata["text"] = Value::Object(text);
    }
    metadata
}

/// Primary-image EXIF tags by name, if the container carries any.
fn exif_fields(bytes: &[u8]) -> Option<Map<String, Value>> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;

    let fields: Map<String, Value> = exif
        .fields()
        .filter(|field| field.ifd_num == exif::In::PRIMARY)
        .map(|field| {
            let value = match &field.value {
                exif::Value::Ascii(parts) => parts
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
                _ => field.display_value().with_unit(&exif).to_string(),
            };
            (field.tag.to_string(), Value::String(value))
        })
        .collect();

    (!fields.is_empty()).then_some(fields)
}

/// Text chunks (tEXt, zTXt, iTXt) ahead of the image data of a PNG.
fn png_text(bytes: &[u8]) -> Vec<(String, String)> {
    if image::guess_format(bytes).ok() != Some(ImageFormat::Png) {
        return Vec::new();
    }
    let reader = match png::Decoder::new(Cursor::new(bytes)).read_info() {
        Ok(reader) => reader,
        Err(e) => {
            tracing::debug!(error = %e, "PNG text chunks unreadable");
            return Vec::new();
        }
    };

    let info = reader.info();
    let mut text: Vec<(String, String)> = info
        .uncompressed_latin1_text
        .iter()
        .map(|chunk| (chunk.keyword.clone(), chunk.text.clone()))
        .collect();
    text.extend(
        info.compressed_latin1_text
            .iter()
            .filter_map(|chunk| Some((chunk.keyword.clone(), chunk.get_text().ok()?))),
    );
    text.extend(
        info.utf8_text
            .iter()
            .filter_map(|chunk| Some((chunk.keyword.clone(), chunk.get_text().ok()?))),
    );
    text
}

/// Encode `rgb` as PNG with the given text chunks. Latin-1 values use tEXt,
/// anything else iTXt.
fn write_png(rgb: &RgbImage, text: &[(String, String)]) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, rgb.width(), rgb.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, value) in text {
            if value.chars().all(|c| (c as u32) <= 0xFF) {
                encoder.add_text_chunk(keyword.clone(), value.clone())?;
            } else {
                encoder.add_itxt_chunk(keyword.clone(), value.clone())?;
            }
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(rgb.as_raw())?;
        writer.finish()?;
    }
    Ok(out)
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        other => format!("{other:?}").to_uppercase(),
    }
}

fn color_mode(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 => "L",
        ColorType::La8 => "LA",
        ColorType::Rgb8 => "RGB",
        ColorType::Rgba8 => "RGBA",
        ColorType::L16 => "I;16",
        ColorType::La16 => "LA;16",
        ColorType::Rgb16 => "RGB;16",
        ColorType::Rgba16 => "RGBA;16",
        ColorType::Rgb32F => "RGB;F",
        ColorType::Rgba32F => "RGBA;F",
        _ => "unknown",
    }
}

/// Orthonormal DCT-II basis: `basis[u][x]`.
fn dct_basis() -> [[f64; BLOCK]; BLOCK] {
    let n = BLOCK as f64;
    let mut basis = [[0.0; BLOCK]; BLOCK];
    for (u, row) in basis.iter_mut().enumerate() {
        let alpha = if u == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for (x, value) in row.iter_mut().enumerate() {
            *value = alpha * (((2 * x + 1) as f64 * u as f64 * PI) / (2.0 * n)).cos();
        }
    }
    basis
}

fn dct_block(block: &[[f64; BLOCK]; BLOCK], basis: &[[f64; BLOCK]; BLOCK]) -> [[f64; BLOCK]; BLOCK] {
    // rows first, then columns
    let mut rows = [[0.0; BLOCK]; BLOCK];
    for y in 0..BLOCK {
        for u in 0..BLOCK {
            rows[y][u] = (0..BLOCK).map(|x| basis[u][x] * block[y][x]).sum();
        }
    }
    let mut out = [[0.0; BLOCK]; BLOCK];
    for v in 0..BLOCK {
        for u in 0..BLOCK {
            out[v][u] = (0..BLOCK).map(|y| basis[v][y] * rows[y][u]).sum();
        }
    }
    out
}

fn dct_analysis(image: &DynamicImage) -> Value {
    let gray = image.to_luma8();
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let basis = dct_basis();

    let mut zero_count = 0u64;
    let mut nonzero_count = 0u64;
    let mut suspicious_blocks = 0u64;
    let mut total_blocks = 0u64;

    for by in (0..height.saturating_sub(BLOCK - 1)).step_by(BLOCK) {
        for bx in (0..width.saturating_sub(BLOCK - 1)).step_by(BLOCK) {
            let mut block = [[0.0; BLOCK]; BLOCK];
            for (y, row) in block.iter_mut().enumerate() {
                for (x, value) in row.iter_mut().enumerate() {
                    *value = gray.get_pixel((bx + x) as u32, (by + y) as u32).0[0] as f64;
                }
            }

            let coefficients = dct_block(&block, &basis);
            let mut zeros = 0u64;
            let mut odd = 0u64;
            for c in coefficients.iter().flatten() {
                if c.abs() < 1e-9 {
                    zeros += 1;
                }
                if c.abs() % 2.0 > 0.5 {
                    odd += 1;
                }
            }

            zero_count += zeros;
            nonzero_count += (BLOCK * BLOCK) as u64 - zeros;
            total_blocks += 1;
            if odd as f64 > (BLOCK * BLOCK) as f64 * 0.7 {
                suspicious_blocks += 1;
            }
        }
    }

    let confidence = percentage(suspicious_blocks, total_blocks);
    json!({
        "statistics": {
            "zero_count": zero_count,
            "nonzero_count": nonzero_count,
            "suspicious_blocks": suspicious_blocks,
            "total_blocks": total_blocks,
        },
        "confidence": confidence,
        "assessment": assessment(confidence, 30.0),
        "message": summary("DCT", confidence),
    })
}

fn bit_plane_analysis(rgb: &RgbImage) -> Value {
    let total = rgb.width() as u64 * rgb.height() as u64;
    let mut bit_planes = Map::new();
    let mut suspicious_planes = 0u64;

    for bit in 0..8u8 {
        let mut ones = [0u64; 3];
        for pixel in rgb.pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                ones[channel] += ((value >> bit) & 1) as u64;
            }
        }

        let mut plane = Map::new();
        for (name, ones) in ["red", "green", "blue"].into_iter().zip(ones) {
            let zeros = total - ones;
            let entropy = binary_entropy(ones, total);
            let suspicious = bit == 0 && entropy > 0.95;
            if suspicious {
                suspicious_planes += 1;
            }
            plane.insert(
                name.to_string(),
                json!({
                    "ones": ones,
                    "zeros": zeros,
                    "entropy": entropy,
                    "suspicious": suspicious,
                }),
            );
        }
        bit_planes.insert(format!("bit_{bit}"), Value::Object(plane));
    }

    let confidence = percentage(suspicious_planes, 24);
    json!({
        "bit_planes": bit_planes,
        "suspicious_planes": suspicious_planes,
        "confidence": confidence,
        "assessment": assessment(confidence, 20.0),
        "message": summary("Bit plane", confidence),
    })
}

fn binary_entropy(ones: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p_ones = ones as f64 / total as f64;
    let p_zeros = 1.0 - p_ones;
    [p_ones, p_zeros]
        .into_iter()
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.log2())
        .sum()
}

fn histogram_analysis(rgb: &RgbImage) -> Value {
    let mut histograms = [[0u64; 256]; 3];
    for pixel in rgb.pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            histograms[channel][*value as usize] += 1;
        }
    }

    let channels: Vec<(u64, f64)> = histograms
        .iter()
        .map(|hist| {
            let suspicious = hist
                .chunks_exact(2)
                .filter(|pair| {
                    let (even, odd) = (pair[0] as f64, pair[1] as f64);
                    (even - odd).abs() < (even + odd) * 0.05
                })
                .count() as u64;
            (suspicious, suspicious as f64 / 128.0)
        })
        .collect();

    let channel_json = |(suspicious, ratio): (u64, f64)| {
        json!({
            "total_pairs": 128,
            "suspicious_pairs": suspicious,
            "suspicion_ratio": ratio,
        })
    };

    let confidence = channels.iter().map(|(_, ratio)| ratio).sum::<f64>() / 3.0 * 100.0;
    json!({
        "red_channel": channel_json(channels[0]),
        "green_channel": channel_json(channels[1]),
        "blue_channel": channel_json(channels[2]),
        "confidence": confidence,
        "assessment": assessment(confidence, 40.0),
        "message": summary("Histogram", confidence),
    })
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

fn assessment(confidence: f64, threshold: f64) -> &'static str {
    if confidence > threshold {
        "Suspicious"
    } else {
        "Likely clean"
    }
}

fn summary(name: &str, confidence: f64) -> String {
    format!("{name} analysis complete. Confidence that steganography is present: {confidence:.2}%")
}

fn lsb_encode(rgb: &mut RgbImage, message: &str) -> Result<(), EngineError> {
    if message.as_bytes().windows(LSB_TERMINATOR.len()).any(|w| w == LSB_TERMINATOR) {
        return Err(EngineError::ReservedSequence("####"));
    }

    let mut payload = message.as_bytes().to_vec();
    payload.extend_from_slice(LSB_TERMINATOR);

    let needed = payload.len() * 8;
    let capacity = rgb.width() as usize * rgb.height() as usize * 3;
    if needed > capacity {
        return Err(EngineError::Capacity { needed, capacity });
    }

    let channels = rgb.pixels_mut().flat_map(|pixel| pixel.0.iter_mut());
    for (channel, bit) in channels.zip(bits_of(&payload)) {
        *channel = (*channel & 0xFE) | bit;
    }
    Ok(())
}

fn parity_encode(rgb: &mut RgbImage, message: &str) -> Result<(), EngineError> {
    if message.as_bytes().contains(&0) {
        return Err(EngineError::ReservedSequence("NUL"));
    }

    let mut payload = message.as_bytes().to_vec();
    payload.push(0);

    let needed = payload.len() * 8;
    let capacity = rgb.width() as usize * rgb.height() as usize;
    if needed > capacity {
        return Err(EngineError::Capacity { needed, capacity });
    }

    for (pixel, bit) in rgb.pixels_mut().zip(bits_of(&payload)) {
        let [r, g, b] = pixel.0;
        let parity = ((r as u16 + g as u16 + b as u16) % 2) as u8;
        if parity != bit {
            pixel.0[2] = if b > 0 { b - 1 } else { b + 1 };
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Image could not be processed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Message is too long to hide in this image ({needed} bits needed, {capacity} available)")]
    Capacity { needed: usize, capacity: usize },

    #[error("Message must not contain the reserved sequence {0}")]
    ReservedSequence(&'static str),

    #[error("PNG encoding failed: {0}")]
    Png(#[from] png::EncodingError),
}
