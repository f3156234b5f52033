//! Pixel conversion from decoded frames to RGBA8
//!
//! Decoders hand out BGR or BGRA samples in one of seven numeric depths.
//! Textures store 8-bit RGBA with opaque alpha, so every sample is
//! normalized the way GL's unorm/snorm upload would, and channels are
//! reordered. Rows are converted in parallel.

use common::{Frame, PixelDepth};
use rayon::prelude::*;

/// Bytes per texel in the converted output
pub const RGBA_BYTES: usize = 4;

/// Convert `frame` into `dst`, writing one row every `dst_pitch` bytes
///
/// # Panics
///
/// Panics if the frame's buffer is shorter than its stride and height
/// imply, or if `dst` cannot hold `height` rows of `dst_pitch` bytes.
pub fn convert_to_rgba8(frame: &Frame<'_>, dst: &mut [u8], dst_pitch: usize) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    if width == 0 || height == 0 {
        return;
    }

    assert!(frame.has_enough_data(), "frame buffer too small");
    assert!(dst_pitch >= width * RGBA_BYTES, "destination pitch too small");
    assert!(dst.len() >= dst_pitch * height, "destination buffer too small");

    let depth = frame.depth;
    let sample = depth.bytes();
    let pixel = frame.bytes_per_pixel();
    let stride = frame.stride;
    let row_bytes = frame.row_bytes();

    dst[..dst_pitch * height]
        .par_chunks_mut(dst_pitch)
        .enumerate()
        .for_each(|(y, out)| {
            let src = &frame.data[y * stride..y * stride + row_bytes];
            for (texel, px) in out[..width * RGBA_BYTES]
                .chunks_exact_mut(RGBA_BYTES)
                .zip(src.chunks_exact(pixel))
            {
                texel[0] = normalize(depth, &px[2 * sample..3 * sample]);
                texel[1] = normalize(depth, &px[sample..2 * sample]);
                texel[2] = normalize(depth, &px[..sample]);
                // storage is RGB, source alpha is dropped
                texel[3] = 255;
            }
        });
}

/// Convert `frame` into a tightly packed RGBA8 buffer
pub fn to_rgba8(frame: &Frame<'_>) -> Vec<u8> {
    let pitch = frame.width as usize * RGBA_BYTES;
    let mut out = vec![0u8; pitch * frame.height as usize];
    convert_to_rgba8(frame, &mut out, pitch);
    out
}

/// Map one native-endian sample to an 8-bit channel value
fn normalize(depth: PixelDepth, bytes: &[u8]) -> u8 {
    match depth {
        PixelDepth::U8 => bytes[0],
        PixelDepth::I8 => {
            let v = (bytes[0] as i8).max(0) as u32;
            ((v * 255 + 63) / 127) as u8
        }
        PixelDepth::U16 => {
            let v = u16::from_ne_bytes([bytes[0], bytes[1]]) as u32;
            ((v * 255 + 32_767) / 65_535) as u8
        }
        PixelDepth::I16 => {
            let v = i16::from_ne_bytes([bytes[0], bytes[1]]).max(0) as u32;
            ((v * 255 + 16_383) / 32_767) as u8
        }
        PixelDepth::I32 => {
            let v = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).max(0) as u64;
            let max = i32::MAX as u64;
            ((v * 255 + max / 2) / max) as u8
        }
        PixelDepth::F32 => {
            let v = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        PixelDepth::F64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            (f64::from_ne_bytes(raw).clamp(0.0, 1.0) * 255.0).round() as u8
        }
    }
}
