//! Pixel formats and byte-level packing.
//!
//! Render targets are always 32-bit-per-pixel or 24-bit-per-pixel packed
//! formats; [`PixelFormat::I420`]/[`PixelFormat::Yv12`]/[`PixelFormat::L8`]
//! are input-only planar/greyscale formats used to decode texture-sampler
//! source frames, never valid as a render target.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Argb32,
    Argb32Premultiplied,
    /// Same byte order as [`PixelFormat::Argb32`]; the leading byte is
    /// ignored on write.
    Xrgb32,
    Rgba32,
    Rgba32Premultiplied,
    Bgra32,
    Bgra32Premultiplied,
    Abgr32,
    Abgr32Premultiplied,
    /// Same byte order as [`PixelFormat::Abgr32`] with the leading byte
    /// ignored on write.
    Xbgr32,
    /// Same byte order as [`PixelFormat::Rgba32`] with the trailing byte
    /// ignored on write.
    Rgbx32,
    /// Same byte order as [`PixelFormat::Bgra32`] with the trailing byte
    /// ignored on write.
    Bgrx32,
    Rgb24,
    Bgr24,
    /// 8-bit greyscale, input-only.
    L8,
    /// Planar YUV 4:2:0, Y plane then U then V, input-only.
    I420,
    /// Planar YUV 4:2:0, Y plane then V then U, input-only.
    Yv12,
}

impl PixelFormat {
    /// All render-target-capable formats, in the order lists them.
    pub const OUTPUT_FORMATS: &'static [PixelFormat] = &[
        PixelFormat::Argb32,
        PixelFormat::Argb32Premultiplied,
        PixelFormat::Xrgb32,
        PixelFormat::Rgba32,
        PixelFormat::Rgba32Premultiplied,
        PixelFormat::Bgra32,
        PixelFormat::Bgra32Premultiplied,
        PixelFormat::Abgr32,
        PixelFormat::Abgr32Premultiplied,
        PixelFormat::Xbgr32,
        PixelFormat::Rgbx32,
        PixelFormat::Bgrx32,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
    ];

    pub fn is_output_capable(self) -> bool {
        !matches!(self, PixelFormat::L8 | PixelFormat::I420 | PixelFormat::Yv12)
    }

    pub fn is_premultiplied(self) -> bool {
        matches!(
            self,
            PixelFormat::Argb32Premultiplied
                | PixelFormat::Rgba32Premultiplied
                | PixelFormat::Bgra32Premultiplied
                | PixelFormat::Abgr32Premultiplied
        )
    }

    /// `None` for the planar YUV formats, which have no fixed per-pixel
    /// stride.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Argb32
            | PixelFormat::Argb32Premultiplied
            | PixelFormat::Xrgb32
            | PixelFormat::Rgba32
            | PixelFormat::Rgba32Premultiplied
            | PixelFormat::Bgra32
            | PixelFormat::Bgra32Premultiplied
            | PixelFormat::Abgr32
            | PixelFormat::Abgr32Premultiplied
            | PixelFormat::Xbgr32
            | PixelFormat::Rgbx32
            | PixelFormat::Bgrx32 => Some(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::L8 => Some(1),
            PixelFormat::I420 | PixelFormat::Yv12 => None,
        }
    }
}

/// Round-half-to-even at the 0-255 scale, applied after clamping the
/// incoming linear channel value to `[0, 1]`.
pub fn quantize_channel(v: f32) -> u8 {
    let scaled = f64::from(v.clamp(0.0, 1.0)) * 255.0;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    };
    rounded.clamp(0.0, 255.0) as u8
}

/// Writes one pixel's worth of bytes for `format` into `dst` (which must be
/// at least `format.bytes_per_pixel()` long), from a straight (non-
/// premultiplied) `[r, g, b, a]` in `[0, 1]`.
///
/// # Panics
/// Panics if `format` is not [`PixelFormat::is_output_capable`], or if `dst`
/// is shorter than the format's pixel stride.
pub fn write_pixel(format: PixelFormat, dst: &mut [u8], straight: [f32; 4]) {
    let [r, g, b, a] = straight;
    let (r, g, b) = if format.is_premultiplied() {
        (r * a, g * a, b * a)
    } else {
        (r, g, b)
    };
    let (r, g, b, a) = (
        quantize_channel(r),
        quantize_channel(g),
        quantize_channel(b),
        quantize_channel(a),
    );
    match format {
        PixelFormat::Argb32 | PixelFormat::Argb32Premultiplied => {
            dst[0] = a;
            dst[1] = r;
            dst[2] = g;
            dst[3] = b;
        }
        PixelFormat::Xrgb32 => {
            dst[0] = 0;
            dst[1] = r;
            dst[2] = g;
            dst[3] = b;
        }
        PixelFormat::Rgba32 | PixelFormat::Rgba32Premultiplied => {
            dst[0] = r;
            dst[1] = g;
            dst[2] = b;
            dst[3] = a;
        }
        PixelFormat::Rgbx32 => {
            dst[0] = r;
            dst[1] = g;
            dst[2] = b;
            dst[3] = 0;
        }
        PixelFormat::Bgra32 | PixelFormat::Bgra32Premultiplied => {
            dst[0] = b;
            dst[1] = g;
            dst[2] = r;
            dst[3] = a;
        }
        PixelFormat::Bgrx32 => {
            dst[0] = b;
            dst[1] = g;
            dst[2] = r;
            dst[3] = 0;
        }
        PixelFormat::Abgr32 | PixelFormat::Abgr32Premultiplied => {
            dst[0] = a;
            dst[1] = b;
            dst[2] = g;
            dst[3] = r;
        }
        PixelFormat::Xbgr32 => {
            dst[0] = 0;
            dst[1] = b;
            dst[2] = g;
            dst[3] = r;
        }
        PixelFormat::Rgb24 => {
            dst[0] = r;
            dst[1] = g;
            dst[2] = b;
        }
        PixelFormat::Bgr24 => {
            dst[0] = b;
            dst[1] = g;
            dst[2] = r;
        }
        PixelFormat::L8 | PixelFormat::I420 | PixelFormat::Yv12 => {
            panic!("{format:?} is not an output-capable pixel format")
        }
    }
}

/// Decodes one pixel from a packed (non-planar) input format into straight
/// `[r, g, b, a]` floats in `[0, 1]`.
pub fn decode_packed_pixel(format: PixelFormat, src: &[u8]) -> [f32; 4] {
    let c = |b: u8| f32::from(b) / 255.0;
    match format {
        PixelFormat::Argb32 | PixelFormat::Argb32Premultiplied => {
            straighten(format, c(src[1]), c(src[2]), c(src[3]), c(src[0]))
        }
        PixelFormat::Xrgb32 => [c(src[1]), c(src[2]), c(src[3]), 1.0],
        PixelFormat::Rgba32 | PixelFormat::Rgba32Premultiplied => {
            straighten(format, c(src[0]), c(src[1]), c(src[2]), c(src[3]))
        }
        PixelFormat::Rgbx32 => [c(src[0]), c(src[1]), c(src[2]), 1.0],
        PixelFormat::Bgra32 | PixelFormat::Bgra32Premultiplied => {
            straighten(format, c(src[2]), c(src[1]), c(src[0]), c(src[3]))
        }
        PixelFormat::Bgrx32 => [c(src[2]), c(src[1]), c(src[0]), 1.0],
        PixelFormat::Abgr32 | PixelFormat::Abgr32Premultiplied => {
            straighten(format, c(src[3]), c(src[2]), c(src[1]), c(src[0]))
        }
        PixelFormat::Xbgr32 => [c(src[3]), c(src[2]), c(src[1]), 1.0],
        PixelFormat::Rgb24 => [c(src[0]), c(src[1]), c(src[2]), 1.0],
        PixelFormat::Bgr24 => [c(src[2]), c(src[1]), c(src[0]), 1.0],
        PixelFormat::L8 => [c(src[0]), c(src[0]), c(src[0]), 1.0],
        PixelFormat::I420 | PixelFormat::Yv12 => {
            panic!("{format:?} is planar; use sample_planar_yuv420 instead")
        }
    }
}

fn straighten(format: PixelFormat, r: f32, g: f32, b: f32, a: f32) -> [f32; 4] {
    if format.is_premultiplied() && a > 0.0 {
        [r / a, g / a, b / a, a]
    } else {
        [r, g, b, a]
    }
}

/// Samples one pixel of a planar 4:2:0 YUV buffer using BT.601 coefficients.
/// `swap_uv` selects [`PixelFormat::Yv12`] (V-plane first) layout.
pub fn sample_planar_yuv420(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    width: u32,
    x: u32,
    y: u32,
) -> [f32; 4] {
    let y_idx = (y * width + x) as usize;
    let chroma_stride = width.div_ceil(2);
    let c_idx = ((y / 2) * chroma_stride + x / 2) as usize;

    let yv = f32::from(y_plane[y_idx]);
    let u = f32::from(u_plane[c_idx]) - 128.0;
    let v = f32::from(v_plane[c_idx]) - 128.0;

    let r = yv + 1.402 * v;
    let g = yv - 0.344136 * u - 0.714136 * v;
    let b = yv + 1.772 * u;

    [
        (r / 255.0).clamp(0.0, 1.0),
        (g / 255.0).clamp(0.0, 1.0),
        (b / 255.0).clamp(0.0, 1.0),
        1.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_round_to_even() {
        // 127.5 / 255.0 -> scaled value 127.5 exactly -> rounds to 128 (even).
        assert_eq!(quantize_channel(127.5 / 255.0), 128);
        // 126.5 / 255.0 -> scaled 126.5 -> rounds to 126 (even).
        assert_eq!(quantize_channel(126.5 / 255.0), 126);
    }

    #[test]
    fn full_white_round_trips_through_rgba32() {
        let mut buf = [0u8; 4];
        write_pixel(PixelFormat::Rgba32, &mut buf, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(buf, [255, 255, 255, 255]);
        assert_eq!(decode_packed_pixel(PixelFormat::Rgba32, &buf), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn premultiplied_half_alpha_scales_color_channels() {
        let mut buf = [0u8; 4];
        write_pixel(PixelFormat::Argb32Premultiplied, &mut buf, [1.0, 0.0, 0.0, 0.5]);
        // alpha channel first, premultiplied red second.
        assert_eq!(buf[0], quantize_channel(0.5));
        assert_eq!(buf[1], quantize_channel(0.5));
    }

    #[test]
    fn bgr24_has_no_alpha_and_swapped_channels() {
        let mut buf = [0u8; 3];
        write_pixel(PixelFormat::Bgr24, &mut buf, [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(buf[0], quantize_channel(0.6));
        assert_eq!(buf[2], quantize_channel(0.2));
    }

    #[test]
    fn grey_yuv_decodes_to_neutral_chroma() {
        let y = vec![200u8; 4];
        let u = vec![128u8; 1];
        let v = vec![128u8; 1];
        let rgba = sample_planar_yuv420(&y, &u, &v, 2, 0, 0);
        assert!((rgba[0] - rgba[1]).abs() < 0.01);
        assert!((rgba[1] - rgba[2]).abs() < 0.01);
    }
}
