//! Tile decoding: decipher, inflate and expand palette indices to RGBA.
//!
//! Two interchangeable strategies implement [`TileDecoder`]:
//!
//! - [`PortableDecoder`] inflates each tile in a single `flate2::Decompress` call
//! - [`StreamingDecoder`] reads through `flate2::read::ZlibDecoder`
//!
//! Both produce identical pixels and both draw their index buffers from a
//! [`ScratchPool`], so concurrent decodes never share scratch memory.

use std::borrow::Cow;
use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use flate2::{Decompress, FlushDecompress, Status};
use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::cipher;
use crate::container::{
    EncryptionDepth, Level, RasterContainer, TILE_HEIGHT, TILE_INDEX_BYTES, TILE_WIDTH,
};
use crate::error::MapError;

/// Decoded tile pixels.
pub type TileImage = RgbaImage;

/// First two bytes of every tile stream.
const ZLIB_SIGNATURE: [u8; 2] = [0x78, 0xDA];

/// Idle buffers kept by a pool before extra ones are dropped.
const MAX_IDLE_BUFFERS: usize = 8;

/// Result of decoding a single tile.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// The tile decoded successfully.
    Decoded(TileImage),
    /// The tile is unreadable. The rest of the map is unaffected.
    Missing(MapError),
    /// Memory for the tile could not be allocated.
    ResourceExhausted,
}

impl DecodeOutcome {
    fn from_result(result: std::result::Result<TileImage, MapError>) -> Self {
        match result {
            Ok(image) => DecodeOutcome::Decoded(image),
            Err(MapError::ResourceExhausted) => DecodeOutcome::ResourceExhausted,
            Err(e) => DecodeOutcome::Missing(e),
        }
    }

    /// Returns the decoded image, if any.
    pub fn image(self) -> Option<TileImage> {
        match self {
            DecodeOutcome::Decoded(image) => Some(image),
            _ => None,
        }
    }
}

/// Strategy that turns a stored tile into RGBA pixels.
pub trait TileDecoder: Send + Sync {
    /// Decode the tile at (`col`, `row`) of pyramid level `level`.
    fn decode(&self, container: &RasterContainer, level: usize, col: u32, row: u32) -> DecodeOutcome;

    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;
}

/// Selects a [`TileDecoder`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecoderKind {
    #[default]
    Portable,
    Streaming,
}

impl DecoderKind {
    /// Instantiate the decoder.
    pub fn build(self) -> Arc<dyn TileDecoder> {
        match self {
            DecoderKind::Portable => Arc::new(PortableDecoder::new()),
            DecoderKind::Streaming => Arc::new(StreamingDecoder::new()),
        }
    }
}

impl FromStr for DecoderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portable" => Ok(DecoderKind::Portable),
            "streaming" => Ok(DecoderKind::Streaming),
            other => Err(format!(
                "unknown decoder '{}' (expected 'portable' or 'streaming')",
                other
            )),
        }
    }
}

impl std::fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderKind::Portable => write!(f, "portable"),
            DecoderKind::Streaming => write!(f, "streaming"),
        }
    }
}

/// Pool of fixed-size scratch buffers with checkout/return semantics.
///
/// A checked-out buffer is always zeroed, so a short inflate can never expose
/// indices left over from a previous tile.
#[derive(Debug)]
pub struct ScratchPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    size: usize,
}

impl ScratchPool {
    /// Create a pool handing out buffers of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            size,
        }
    }

    /// Check out a zeroed buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ResourceExhausted`] if a new buffer cannot be allocated.
    pub fn checkout(&self) -> std::result::Result<Scratch<'_>, MapError> {
        let pooled = self.buffers.lock().ok().and_then(|mut idle| idle.pop());
        let buf = match pooled {
            Some(mut buf) => {
                buf.fill(0);
                buf
            }
            None => zeroed(self.size)?,
        };
        Ok(Scratch { pool: self, buf })
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.buffers.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn give_back(&self, buf: Vec<u8>) {
        if buf.len() != self.size {
            return;
        }
        if let Ok(mut idle) = self.buffers.lock() {
            if idle.len() < MAX_IDLE_BUFFERS {
                idle.push(buf);
            }
        }
    }
}

/// A buffer checked out of a [`ScratchPool`]; returned on drop.
pub struct Scratch<'a> {
    pool: &'a ScratchPool,
    buf: Vec<u8>,
}

impl Deref for Scratch<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for Scratch<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}

/// Reference decoder: one-shot inflate with `flate2::Decompress`.
#[derive(Debug)]
pub struct PortableDecoder {
    scratch: ScratchPool,
}

impl PortableDecoder {
    pub fn new() -> Self {
        Self {
            scratch: ScratchPool::new(TILE_INDEX_BYTES),
        }
    }
}

impl Default for PortableDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileDecoder for PortableDecoder {
    fn decode(&self, container: &RasterContainer, level: usize, col: u32, row: u32) -> DecodeOutcome {
        DecodeOutcome::from_result(decode_with(container, level, col, row, &self.scratch, |stream, out| {
            inflate(stream, out).map(|_| ())
        }))
    }

    fn name(&self) -> &'static str {
        "portable"
    }
}

/// Alternate decoder reading through a `ZlibDecoder` stream.
#[derive(Debug)]
pub struct StreamingDecoder {
    scratch: ScratchPool,
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self {
            scratch: ScratchPool::new(TILE_INDEX_BYTES),
        }
    }
}

impl Default for StreamingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileDecoder for StreamingDecoder {
    fn decode(&self, container: &RasterContainer, level: usize, col: u32, row: u32) -> DecodeOutcome {
        DecodeOutcome::from_result(decode_with(container, level, col, row, &self.scratch, inflate_streaming))
    }

    fn name(&self) -> &'static str {
        "streaming"
    }
}

/// Inflate a complete zlib stream into `out`.
///
/// Succeeds only if the stream ends (checksum verified) within `out`.
pub(crate) fn inflate(input: &[u8], out: &mut [u8]) -> std::result::Result<usize, String> {
    let mut inflater = Decompress::new(true);
    match inflater.decompress(input, out, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => Ok(inflater.total_out() as usize),
        Ok(_) => Err("stream does not end within one tile".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn inflate_streaming(input: &[u8], out: &mut [u8]) -> std::result::Result<(), String> {
    let mut reader = flate2::read::ZlibDecoder::new(input);
    let mut filled = 0;
    while filled < out.len() {
        match reader.read(&mut out[filled..]) {
            Ok(0) => return Ok(()),
            Ok(n) => filled += n,
            Err(e) => return Err(e.to_string()),
        }
    }
    let mut peek = [0u8; 1];
    match reader.read(&mut peek) {
        Ok(0) => Ok(()),
        Ok(_) => Err("stream does not end within one tile".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Shared decode pipeline; `inflate_fn` is the only strategy-specific step.
fn decode_with<F>(
    container: &RasterContainer,
    level: usize,
    col: u32,
    row: u32,
    pool: &ScratchPool,
    inflate_fn: F,
) -> std::result::Result<TileImage, MapError>
where
    F: Fn(&[u8], &mut [u8]) -> std::result::Result<(), String>,
{
    let fail = |reason: String| MapError::TileDecode {
        level,
        col,
        row,
        reason,
    };

    let lvl = container
        .level(level)
        .ok_or_else(|| fail("no such level".to_string()))?;
    let raw = container.tile_bytes(level, col, row)?;
    let stream = decipher(raw, lvl, container.variant().key())?;

    if stream.len() < ZLIB_SIGNATURE.len() || stream[..2] != ZLIB_SIGNATURE {
        return Err(fail("bad zlib signature".to_string()));
    }

    let mut indices = pool.checkout()?;
    inflate_fn(&stream, &mut indices).map_err(fail)?;

    expand(&indices, lvl)
}

/// Undo the tile cipher, borrowing the payload when nothing is ciphered.
fn decipher<'a>(raw: &'a [u8], level: &Level, key: Option<u8>) -> std::result::Result<Cow<'a, [u8]>, MapError> {
    let (key, depth) = match (key, level.encryption_depth) {
        (None, _) | (_, EncryptionDepth::None) => return Ok(Cow::Borrowed(raw)),
        (Some(key), EncryptionDepth::Prefix(n)) => (key, n),
        (Some(key), EncryptionDepth::Whole) => (key, raw.len()),
    };

    let mut buf = Vec::new();
    buf.try_reserve_exact(raw.len())
        .map_err(|_| MapError::ResourceExhausted)?;
    buf.extend_from_slice(raw);
    cipher::apply_prefix(&mut buf, depth, key);
    Ok(Cow::Owned(buf))
}

/// Expand palette indices into an RGBA tile, flipping rows (stored bottom-up).
fn expand(indices: &[u8], level: &Level) -> std::result::Result<TileImage, MapError> {
    let width = TILE_WIDTH as usize;
    let height = TILE_HEIGHT as usize;

    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(width * height * 4)
        .map_err(|_| MapError::ResourceExhausted)?;
    pixels.resize(width * height * 4, 0);

    for (j, &index) in indices.iter().take(width * height).enumerate() {
        let row = height - 1 - j / width;
        let col = j % width;
        let [r, g, b] = level.color(index);
        let base = (row * width + col) * 4;
        pixels[base..base + 4].copy_from_slice(&[r, g, b, 255]);
    }

    RgbaImage::from_raw(TILE_WIDTH, TILE_HEIGHT, pixels).ok_or(MapError::ResourceExhausted)
}

/// Resample a tile to `width` × `height` with a triangle filter.
///
/// Used to apply the residual zoom factor of the selected pyramid level.
pub fn resample(tile: &TileImage, width: u32, height: u32) -> TileImage {
    if tile.width() == width && tile.height() == height {
        return tile.clone();
    }
    imageops::resize(tile, width.max(1), height.max(1), FilterType::Triangle)
}

fn zeroed(size: usize) -> std::result::Result<Vec<u8>, MapError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| MapError::ResourceExhausted)?;
    buf.resize(size, 0);
    Ok(buf)
}
