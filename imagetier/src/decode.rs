//! Decoding fetched bytes into [`ImageResource`]s.

use crate::resource::ImageResource;
use image::imageops::FilterType;
use thiserror::Error;

/// Decode errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no image data")]
    Empty,

    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
}

/// Turns encoded bytes into a decoded resource sized for the request.
pub trait Decoder: Send + Sync {
    /// Decode `bytes`. `req_width`/`req_height` of 0 mean "no constraint".
    fn decode(
        &self,
        bytes: &[u8],
        req_width: u32,
        req_height: u32,
    ) -> Result<ImageResource, DecodeError>;
}

/// Largest power-of-two subsampling factor that keeps both dimensions at or
/// above the requested size.
///
/// ```
/// use imagetier::decode::in_sample_size;
///
/// assert_eq!(in_sample_size(1024, 768, 256, 192), 4);
/// assert_eq!(in_sample_size(1024, 768, 300, 200), 2);
/// assert_eq!(in_sample_size(100, 100, 200, 200), 1);
/// assert_eq!(in_sample_size(100, 100, 0, 0), 1);
/// ```
pub fn in_sample_size(width: u32, height: u32, req_width: u32, req_height: u32) -> u32 {
    if req_width == 0 || req_height == 0 {
        return 1;
    }

    let mut sample = 1;
    if width > req_width || height > req_height {
        let half_w = width / 2;
        let half_h = height / 2;
        while half_w / sample >= req_width && half_h / sample >= req_height {
            sample *= 2;
        }
    }
    sample
}

/// [`Decoder`] backed by the `image` crate. Produces RGBA8 buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ImageDecoder {
    fn decode(
        &self,
        bytes: &[u8],
        req_width: u32,
        req_height: u32,
    ) -> Result<ImageResource, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let img = image::load_from_memory(bytes)?;
        let sample = in_sample_size(img.width(), img.height(), req_width, req_height);
        let img = if sample > 1 {
            img.resize_exact(
                (img.width() / sample).max(1),
                (img.height() / sample).max(1),
                FilterType::Triangle,
            )
        } else {
            img
        };

        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(ImageResource::new(width, height, rgba.into_raw()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_full_size() {
        let res = ImageDecoder::new().decode(&png(16, 8), 0, 0).unwrap();
        assert_eq!((res.width(), res.height()), (16, 8));
        assert_eq!(res.byte_size(), 16 * 8 * 4);
        assert_eq!(res.with_pixels(|p| p[..4].to_vec()), Some(vec![10, 20, 30, 255]));
    }

    #[test]
    fn test_decode_subsamples_toward_request() {
        let res = ImageDecoder::new().decode(&png(64, 64), 16, 16).unwrap();
        assert_eq!((res.width(), res.height()), (16, 16));
    }

    #[test]
    fn test_decode_never_upscales() {
        let res = ImageDecoder::new().decode(&png(8, 8), 64, 64).unwrap();
        assert_eq!((res.width(), res.height()), (8, 8));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            ImageDecoder::new().decode(&[], 0, 0),
            Err(DecodeError::Empty)
        ));
        assert!(matches!(
            ImageDecoder::new().decode(b"definitely not an image", 0, 0),
            Err(DecodeError::Image(_))
        ));
    }

    #[test]
    fn test_in_sample_size_non_square() {
        assert_eq!(in_sample_size(4000, 1000, 500, 500), 2);
        assert_eq!(in_sample_size(4000, 2000, 500, 500), 4);
    }
}
