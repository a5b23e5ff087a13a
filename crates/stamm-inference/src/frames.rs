//! Representative frame extraction from animated GIFs.
//!
//! Vision models cannot interpret animation, so a GIF is flattened into a
//! handful of still frames (start, middle, end) that are sent as PNG data
//! URLs alongside the classification prompt.

use std::io::Cursor;

use base64::Engine;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngEncoder;
use image::{AnimationDecoder, ColorType, ImageEncoder};
use tracing::debug;

use stamm_core::{Error, Result};

/// Decode a GIF and return up to `count` PNG-encoded frames, spread evenly
/// across the animation. A single-frame GIF yields one frame.
pub fn extract_representative_frames(bytes: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let decoder = GifDecoder::new(Cursor::new(bytes))
        .map_err(|e| Error::InvalidInput(format!("GIF decode failed: {}", e)))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| Error::InvalidInput(format!("GIF frame read failed: {}", e)))?;

    if frames.is_empty() {
        return Err(Error::InvalidInput("GIF contains no frames".to_string()));
    }

    let indices = spread_indices(frames.len(), count);
    let mut encoded = Vec::with_capacity(indices.len());
    for index in indices {
        let buffer = frames[index].buffer();
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(
                buffer.as_raw(),
                buffer.width(),
                buffer.height(),
                ColorType::Rgba8,
            )
            .map_err(|e| Error::Internal(format!("PNG encode failed: {}", e)))?;
        encoded.push(png);
    }

    debug!(
        subsystem = "inference",
        component = "frames",
        op = "extract",
        total_frames = frames.len(),
        extracted = encoded.len(),
        "Extracted representative GIF frames"
    );
    Ok(encoded)
}

/// Wrap PNG bytes as a base64 data URL for multimodal requests.
pub fn png_data_url(png_bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png_bytes)
    )
}

/// Evenly spread `count` indices over `total` frames, first and last
/// included, deduplicated and ascending.
fn spread_indices(total: usize, count: usize) -> Vec<usize> {
    if total <= count {
        return (0..total).collect();
    }
    let mut indices: Vec<usize> = (0..count)
        .map(|i| i * (total - 1) / (count - 1).max(1))
        .collect();
    indices.dedup();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Frame, RgbaImage};

    fn animated_gif(frame_count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            for i in 0..frame_count {
                let shade = (i * 40) as u8;
                let img = RgbaImage::from_pixel(4, 4, image::Rgba([shade, 0, 0, 255]));
                encoder.encode_frame(Frame::new(img)).unwrap();
            }
        }
        bytes
    }

    #[test]
    fn test_spread_indices_first_middle_last() {
        assert_eq!(spread_indices(10, 3), vec![0, 4, 9]);
        assert_eq!(spread_indices(3, 3), vec![0, 1, 2]);
        assert_eq!(spread_indices(2, 3), vec![0, 1]);
        assert_eq!(spread_indices(1, 3), vec![0]);
    }

    #[test]
    fn test_extract_three_frames_from_animation() {
        let gif = animated_gif(6);
        let frames = extract_representative_frames(&gif, 3).unwrap();
        assert_eq!(frames.len(), 3);
        for png in &frames {
            // PNG signature
            assert_eq!(&png[..4], b"\x89PNG");
        }
    }

    #[test]
    fn test_single_frame_gif_yields_one_frame() {
        let gif = animated_gif(1);
        let frames = extract_representative_frames(&gif, 3).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_non_gif_bytes_are_rejected() {
        let err = extract_representative_frames(b"definitely not a gif", 3).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_zero_count_returns_empty() {
        let gif = animated_gif(2);
        assert!(extract_representative_frames(&gif, 0).unwrap().is_empty());
    }

    #[test]
    fn test_png_data_url_prefix() {
        let url = png_data_url(b"abc");
        assert!(url.starts_with("data:image/png;base64,"));
    }
}
