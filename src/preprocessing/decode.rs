use crate::error::ScanError;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// A decoded sheet photo, owned by a single scan
#[derive(Debug)]
pub struct ScanImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
    pub reoriented: bool,
}

impl ScanImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn format_name(&self) -> &'static str {
        match self.format {
            Some(ImageFormat::Png) => "png",
            Some(ImageFormat::Jpeg) => "jpeg",
            Some(ImageFormat::Gif) => "gif",
            Some(ImageFormat::Bmp) => "bmp",
            Some(ImageFormat::WebP) => "webp",
            Some(ImageFormat::Tiff) => "tiff",
            Some(_) => "other",
            None => "unknown",
        }
    }
}

/// Decode raw image bytes and apply the EXIF orientation, if any
pub fn decode(bytes: &[u8]) -> Result<ScanImage, ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::ImageDecode("image data is empty".to_string()));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ScanError::ImageDecode(format!("Failed to read image: {}", e)))?;
    let format = reader.format();
    if format.is_none() {
        return Err(ScanError::ImageDecode(
            "unrecognized image format".to_string(),
        ));
    }

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| ScanError::ImageDecode(format!("Unsupported image: {}", e)))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| ScanError::ImageDecode(format!("Failed to read orientation: {}", e)))?;
    let (stored_width, stored_height) = decoder.dimensions();
    if stored_width == 0 || stored_height == 0 {
        return Err(ScanError::ImageDecode(format!(
            "degenerate image dimensions {}x{}",
            stored_width, stored_height
        )));
    }

    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|e| ScanError::ImageDecode(format!("Failed to decode image: {}", e)))?;
    let reoriented = orientation != image::metadata::Orientation::NoTransforms;
    if reoriented {
        tracing::debug!("Applying EXIF orientation {:?}", orientation);
        image.apply_orientation(orientation);
    }

    Ok(ScanImage {
        image,
        format,
        reoriented,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn encode(img: &GrayImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn test_decode_png() {
        let img = GrayImage::from_pixel(40, 30, Luma([200]));
        let scan = decode(&encode(&img, ImageFormat::Png)).unwrap();
        assert_eq!(scan.width(), 40);
        assert_eq!(scan.height(), 30);
        assert_eq!(scan.format_name(), "png");
        assert!(!scan.reoriented);
    }

    #[test]
    fn test_decode_jpeg() {
        let img = GrayImage::from_pixel(16, 16, Luma([90]));
        let scan = decode(&encode(&img, ImageFormat::Jpeg)).unwrap();
        assert_eq!(scan.format_name(), "jpeg");
        assert_eq!((scan.width(), scan.height()), (16, 16));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ScanError::ImageDecode(_)));
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert!(matches!(decode(&[]), Err(ScanError::ImageDecode(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_png() {
        let img = GrayImage::from_pixel(64, 64, Luma([10]));
        let bytes = encode(&img, ImageFormat::Png);
        let err = decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, ScanError::ImageDecode(_)));
    }
}
