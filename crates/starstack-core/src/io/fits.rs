use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use tracing::warn;

use crate::error::{Result, StackError};
use crate::frame::FrameHeader;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;
const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Parsed FITS primary header fields the pipeline cares about.
#[derive(Clone, Debug)]
struct RawHeader {
    bitpix: i32,
    naxis: i32,
    naxis1: usize,
    naxis2: usize,
    naxis3: usize,
    bzero: f64,
    bscale: f64,
    exposure: f32,
    date_obs: Option<String>,
    bayer_pattern: Option<String>,
    xbinning: u32,
    ybinning: u32,
}

impl Default for RawHeader {
    fn default() -> Self {
        Self {
            bitpix: 0,
            naxis: 0,
            naxis1: 0,
            naxis2: 0,
            naxis3: 1,
            bzero: 0.0,
            bscale: 1.0,
            exposure: 0.0,
            date_obs: None,
            bayer_pattern: None,
            xbinning: 1,
            ybinning: 1,
        }
    }
}

fn format_error(path: &Path, reason: impl Into<String>) -> StackError {
    StackError::Format {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Read a FITS image, normalizing every supported BITPIX to f32 with
/// BZERO/BSCALE applied. Returns one plane per NAXIS3 channel.
pub fn read_image(path: &Path) -> Result<(Vec<Array2<f32>>, FrameHeader)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader, path)?;

    let (w, h, planes) = (header.naxis1, header.naxis2, header.naxis3);
    let plane_len = w * h;
    let mut out = Vec::with_capacity(planes);
    for _ in 0..planes {
        let mut plane = vec![0.0f32; plane_len];
        read_samples(&mut reader, header.bitpix, &mut plane, path)?;
        if header.bzero != 0.0 || header.bscale != 1.0 {
            let bzero = header.bzero as f32;
            let bscale = header.bscale as f32;
            for v in &mut plane {
                *v = bzero + bscale * *v;
            }
        }
        let plane = Array2::from_shape_vec((h, w), plane)
            .map_err(|e| format_error(path, format!("bad plane shape: {e}")))?;
        out.push(plane);
    }

    let frame_header = FrameHeader {
        exposure_seconds: header.exposure,
        date_obs: header.date_obs.clone(),
        bayer_pattern: header
            .bayer_pattern
            .as_deref()
            .and_then(|p| p.parse().ok()),
        xbinning: header.xbinning,
        ybinning: header.ybinning,
    };
    Ok((out, frame_header))
}

/// Read a FITS image expected to be monochrome. A multi-channel cube is
/// reduced to its first plane.
pub fn read_mono(path: &Path) -> Result<(Array2<f32>, FrameHeader)> {
    let (mut planes, header) = read_image(path)?;
    if planes.len() > 1 {
        warn!(
            path = %path.display(),
            channels = planes.len(),
            "Multi-channel input where mono was expected; using first channel"
        );
    }
    let plane = planes.swap_remove(0);
    Ok((plane, header))
}

/// Read only the image axes (width, height) from the header.
pub fn peek_axes(path: &Path) -> Result<(usize, usize)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader, path)?;
    Ok((header.naxis1, header.naxis2))
}

fn read_header(reader: &mut BufReader<File>, path: &Path) -> Result<RawHeader> {
    let mut header = RawHeader::default();
    let mut block = [0u8; BLOCK_SIZE];
    let mut first = true;
    let mut found_end = false;

    while !found_end {
        reader
            .read_exact(&mut block)
            .map_err(|_| format_error(path, "truncated header"))?;

        for card_index in 0..CARDS_PER_BLOCK {
            let card_bytes = &block[card_index * CARD_SIZE..(card_index + 1) * CARD_SIZE];
            let card = String::from_utf8_lossy(card_bytes);

            if first {
                if !card.starts_with("SIMPLE") {
                    return Err(format_error(path, "missing SIMPLE keyword"));
                }
                first = false;
            }
            if card.starts_with("END") {
                found_end = true;
                break;
            }

            if let Some(v) = int_keyword(&card, "BITPIX") {
                header.bitpix = v as i32;
            } else if let Some(v) = int_keyword(&card, "NAXIS1") {
                header.naxis1 = v.max(0) as usize;
            } else if let Some(v) = int_keyword(&card, "NAXIS2") {
                header.naxis2 = v.max(0) as usize;
            } else if let Some(v) = int_keyword(&card, "NAXIS3") {
                header.naxis3 = v.max(0) as usize;
            } else if let Some(v) = int_keyword(&card, "NAXIS") {
                header.naxis = v as i32;
            } else if let Some(v) = float_keyword(&card, "BZERO") {
                header.bzero = v;
            } else if let Some(v) = float_keyword(&card, "BSCALE") {
                header.bscale = v;
            } else if let Some(v) = float_keyword(&card, "EXPTIME") {
                header.exposure = v as f32;
            } else if let Some(v) = string_keyword(&card, "DATE-OBS") {
                header.date_obs = Some(v);
            } else if let Some(v) = string_keyword(&card, "BAYERPAT") {
                header.bayer_pattern = Some(v);
            } else if let Some(v) = int_keyword(&card, "XBINNING") {
                header.xbinning = v.max(1) as u32;
            } else if let Some(v) = int_keyword(&card, "YBINNING") {
                header.ybinning = v.max(1) as u32;
            }
        }
    }

    match header.naxis {
        2 => header.naxis3 = 1,
        3 => {}
        n => return Err(format_error(path, format!("unsupported NAXIS {n}"))),
    }
    if header.naxis1 == 0 || header.naxis2 == 0 || header.naxis3 == 0 {
        return Err(format_error(path, "zero-sized image axes"));
    }
    if !matches!(header.bitpix, 8 | 16 | 32 | -32 | -64) {
        return Err(format_error(
            path,
            format!("unsupported BITPIX {}", header.bitpix),
        ));
    }
    Ok(header)
}

fn read_samples(
    reader: &mut BufReader<File>,
    bitpix: i32,
    out: &mut [f32],
    path: &Path,
) -> Result<()> {
    let truncated = |_| format_error(path, "truncated data segment");
    match bitpix {
        8 => {
            let mut buf = vec![0u8; out.len()];
            reader.read_exact(&mut buf).map_err(truncated)?;
            for (o, &b) in out.iter_mut().zip(buf.iter()) {
                *o = b as f32;
            }
        }
        16 => {
            for o in out.iter_mut() {
                *o = reader.read_i16::<BigEndian>().map_err(truncated)? as f32;
            }
        }
        32 => {
            for o in out.iter_mut() {
                *o = reader.read_i32::<BigEndian>().map_err(truncated)? as f32;
            }
        }
        -32 => {
            for o in out.iter_mut() {
                *o = reader.read_f32::<BigEndian>().map_err(truncated)?;
            }
        }
        -64 => {
            for o in out.iter_mut() {
                *o = reader.read_f64::<BigEndian>().map_err(truncated)? as f32;
            }
        }
        other => return Err(format_error(path, format!("unsupported BITPIX {other}"))),
    }
    Ok(())
}

fn keyword_value<'a>(card: &'a str, keyword: &str) -> Option<&'a str> {
    if !card.starts_with(keyword) {
        return None;
    }
    // Keyword names are blank-padded to 8 characters; a prefix match on
    // e.g. NAXIS must not swallow NAXIS1.
    let rest = &card[keyword.len()..];
    let eq = rest.find('=')?;
    if !rest[..eq].trim().is_empty() {
        return None;
    }
    let value = &rest[eq + 1..];
    Some(value.split('/').next().unwrap_or(value).trim())
}

fn int_keyword(card: &str, keyword: &str) -> Option<i64> {
    keyword_value(card, keyword)?.parse().ok()
}

fn float_keyword(card: &str, keyword: &str) -> Option<f64> {
    let v = keyword_value(card, keyword)?;
    v.replace(['D', 'd'], "E").parse().ok()
}

fn string_keyword(card: &str, keyword: &str) -> Option<String> {
    let v = keyword_value(card, keyword)?;
    let v = v.strip_prefix('\'')?;
    let end = v.find('\'')?;
    Some(v[..end].trim_end().to_string())
}

/// Provenance recorded on egress.
#[derive(Clone, Debug, Default)]
pub struct OutputHeader {
    /// Summed exposure of the combined frames, seconds.
    pub exposure_seconds: f32,
    /// Earliest DATE-OBS of the combined frames.
    pub date_obs: Option<String>,
    /// Number of frames combined into this image.
    pub frames_combined: Option<usize>,
    /// Sigma bounds used for rejection, when applicable.
    pub sig_low: Option<f32>,
    pub sig_high: Option<f32>,
    /// Stacking mode, human-readable.
    pub stack_mode: Option<String>,
}

/// Write a monochrome image as 32-bit float FITS.
pub fn write_mono(path: &Path, data: &Array2<f32>, header: &OutputHeader) -> Result<()> {
    write_planes(path, &[data], header)
}

/// Write an RGB image as a channel-major 32-bit float FITS cube.
pub fn write_rgb(path: &Path, channels: [&Array2<f32>; 3], header: &OutputHeader) -> Result<()> {
    write_planes(path, &channels, header)
}

fn write_planes(path: &Path, planes: &[&Array2<f32>], header: &OutputHeader) -> Result<()> {
    let (h, w) = planes[0].dim();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut cards: Vec<String> = Vec::new();
    cards.push(logical_card("SIMPLE", true));
    cards.push(int_card("BITPIX", -32));
    cards.push(int_card("NAXIS", if planes.len() > 1 { 3 } else { 2 }));
    cards.push(int_card("NAXIS1", w as i64));
    cards.push(int_card("NAXIS2", h as i64));
    if planes.len() > 1 {
        cards.push(int_card("NAXIS3", planes.len() as i64));
    }
    if header.exposure_seconds > 0.0 {
        cards.push(float_card("EXPTIME", header.exposure_seconds as f64));
    }
    if let Some(date) = &header.date_obs {
        cards.push(string_card("DATE-OBS", date));
    }
    if let Some(n) = header.frames_combined {
        cards.push(int_card("NCOMBINE", n as i64));
    }
    if let Some(mode) = &header.stack_mode {
        cards.push(string_card("STACKMOD", mode));
    }
    if let Some(sig) = header.sig_low {
        cards.push(float_card("SIGLOW", sig as f64));
    }
    if let Some(sig) = header.sig_high {
        cards.push(float_card("SIGHIGH", sig as f64));
    }
    cards.push(string_card(
        "SWCREATE",
        concat!("starstack ", env!("CARGO_PKG_VERSION")),
    ));
    cards.push("END".to_string());

    let mut header_bytes = Vec::with_capacity(BLOCK_SIZE);
    for card in &cards {
        let mut bytes = card.clone().into_bytes();
        bytes.resize(CARD_SIZE, b' ');
        header_bytes.extend_from_slice(&bytes);
    }
    pad_to_block(&mut header_bytes, b' ');
    writer.write_all(&header_bytes)?;

    let mut written = 0usize;
    for plane in planes {
        let slice = plane.as_slice().expect("frame buffer is contiguous");
        for &v in slice {
            writer.write_f32::<BigEndian>(v)?;
        }
        written += slice.len() * 4;
    }
    let remainder = written % BLOCK_SIZE;
    if remainder != 0 {
        writer.write_all(&vec![0u8; BLOCK_SIZE - remainder])?;
    }
    writer.flush()?;
    Ok(())
}

fn pad_to_block(bytes: &mut Vec<u8>, fill: u8) {
    let remainder = bytes.len() % BLOCK_SIZE;
    if remainder != 0 {
        bytes.resize(bytes.len() + BLOCK_SIZE - remainder, fill);
    }
}

fn logical_card(keyword: &str, value: bool) -> String {
    format!("{keyword:<8}= {:>20}", if value { "T" } else { "F" })
}

fn int_card(keyword: &str, value: i64) -> String {
    format!("{keyword:<8}= {value:>20}")
}

fn float_card(keyword: &str, value: f64) -> String {
    format!("{keyword:<8}= {value:>20.6E}")
}

fn string_card(keyword: &str, value: &str) -> String {
    format!("{keyword:<8}= '{value}'")
}
