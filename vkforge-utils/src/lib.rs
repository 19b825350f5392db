// A set of helper structs for common operations
//
// vkforge contributors
pub mod timing;
#[macro_use]
pub mod logging;
pub mod log;
pub mod region;

use std::ops::Deref;
use std::slice;

extern crate anyhow;
pub use anyhow::{anyhow, Context, Error, Result};

/// A raw pointer to a region of memory holding pixel data, plus the
/// metadata needed to interpret it.
///
/// *Does not* free the memory when it is dropped -- the caller owns the
/// backing allocation (a staging `Vec<u8>`, an mmap'd buffer, etc.) and
/// must keep it alive for as long as the `MemImage` is in use.
#[derive(Debug)]
pub struct MemImage {
    ptr: *const u8,
    // size of the pixel elements, in bytes
    pub element_size: usize,
    pub width: usize,
    pub height: usize,
    /// The number of pixels between the start of one row and the
    /// next. If no stride was specified, this will default to 0,
    /// which is what vulkan uses to indicate pixels are tightly
    /// packed.
    pub stride: u32,
}

#[allow(dead_code)]
impl MemImage {
    pub fn as_slice(&self) -> &[u8] {
        if !self.ptr.is_null() {
            unsafe {
                return slice::from_raw_parts(
                    self.ptr,
                    self.width * self.height * self.element_size,
                );
            }
        } else {
            panic!("Trying to dereference null pointer");
        }
    }

    pub fn new(ptr: *const u8, element_size: usize, width: usize, height: usize) -> MemImage {
        MemImage {
            ptr: ptr,
            element_size: element_size,
            width: width,
            height: height,
            stride: 0,
        }
    }

    /// Sets the stride of this image to something besides the default 0
    pub fn set_stride(&mut self, stride: u32) {
        self.stride = stride;
    }

    /// Performs a simple checksum of adding all the pixels
    /// up in a gigantic int. Not perfect but should work for
    /// comparisons.
    pub fn checksum(&self) -> usize {
        let mut ret: usize = 0;

        for field in self.as_slice().iter() {
            ret += *field as usize;
        }

        ret
    }

    /// Little-endian decode of `self.element_size` bytes at `(x + y *
    /// width) * channel_stride`, per the image-data external interface.
    pub fn pixel(&self, x: usize, y: usize, channel: usize, channel_stride: usize) -> u64 {
        let slice = self.as_slice();
        let base = (x + y * self.width) * channel_stride + channel * self.element_size;
        let mut val: u64 = 0;
        for i in 0..self.element_size {
            val |= (slice[base + i] as u64) << (8 * i);
        }
        val
    }
}

// While it is safe according to the language, the caller is responsible
// for upholding the backing-allocation lifetime described above before
// sending a MemImage across threads.
unsafe impl Send for MemImage {}

impl Deref for MemImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        if !self.ptr.is_null() {
            return self.as_slice();
        } else {
            panic!("Trying to dereference null pointer");
        }
    }
}

/// Builds a `(col, row) -> f32` sampling closure over a single channel of
/// a 4-channel `MemImage`, normalised by `scale / (2^(bytes*8) - 1)`
/// (spec §6's "Height-map function"). `grid_size` maps a logical grid
/// coordinate onto the image by simple integer scaling against the
/// image's own `width`/`height`; an out-of-range channel index raises at
/// factory time rather than at sample time, matching the boundary
/// behaviour spec §8 requires.
pub fn heightmap(
    grid_size: (usize, usize),
    image: &MemImage,
    channel: usize,
    scale: f32,
) -> Result<impl Fn(usize, usize) -> f32 + '_> {
    const CHANNELS_PER_PIXEL: usize = 4;
    if channel >= CHANNELS_PER_PIXEL {
        return Err(anyhow!(
            "heightmap: channel {} out of range (image has {} channels)",
            channel,
            CHANNELS_PER_PIXEL
        ));
    }

    let max_value = (1u64 << (image.element_size * 8)) - 1;
    let norm = scale / max_value as f32;
    let (grid_w, grid_h) = grid_size;
    let img_w = image.width;
    let img_h = image.height;
    let channel_stride = image.element_size * CHANNELS_PER_PIXEL;

    Ok(move |col: usize, row: usize| -> f32 {
        let x = if grid_w > 0 { col * img_w / grid_w } else { 0 }.min(img_w.saturating_sub(1));
        let y = if grid_h > 0 { row * img_h / grid_h } else { 0 }.min(img_h.saturating_sub(1));
        image.pixel(x, y, channel, channel_stride) as f32 * norm
    })
}

// Helper to perform max on PartialOrd types
///
/// We are using PartialOrd so that size and offset can handle
/// floating point types that do not support Ord
pub fn partial_max<T: PartialOrd>(a: T, b: T) -> T {
    if a >= b {
        return a;
    } else {
        return b;
    }
}

/// Helper to perform min on PartialOrd types
pub fn partial_min<T: PartialOrd>(a: T, b: T) -> T {
    if a <= b {
        return a;
    } else {
        return b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_max_min() {
        assert_eq!(partial_max(1.0, 2.0), 2.0);
        assert_eq!(partial_min(1.0, 2.0), 1.0);
    }

    #[test]
    fn mem_image_pixel_decode() {
        // two rgba8 pixels in a row: (1,2,3,4) (5,6,7,8)
        let data: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let img = MemImage::new(data.as_ptr(), 1, 2, 1);
        assert_eq!(img.pixel(0, 0, 0, 4), 1);
        assert_eq!(img.pixel(1, 0, 2, 4), 7);
    }

    #[test]
    fn heightmap_normalises_and_samples_grid() {
        // 2x1 image, single byte per channel, red channel holds 0 then 255.
        let data: Vec<u8> = vec![0, 0, 0, 255, 255, 0, 0, 255];
        let img = MemImage::new(data.as_ptr(), 1, 2, 1);
        let height = heightmap((2, 1), &img, 0, 10.0).unwrap();
        assert_eq!(height(0, 0), 0.0);
        assert!((height(1, 0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn heightmap_rejects_out_of_range_channel() {
        let data: Vec<u8> = vec![0, 0, 0, 0];
        let img = MemImage::new(data.as_ptr(), 1, 1, 1);
        assert!(heightmap((1, 1), &img, 4, 1.0).is_err());
    }
}
