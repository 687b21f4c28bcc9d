//! Report Imagery
//!
//! Loads an image reference and re-encodes it as JPEG (quality 90).
//!
//! References may be a plain filesystem path, a `file://` URL or an
//! `http(s)://` URL. Any format the `image` crate was built with is
//! accepted as input.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use reqwest::Client;

use crate::application::ports::{ImageError, ImagePort};

/// JPEG quality used for report images.
pub const REPORT_JPEG_QUALITY: u8 = 90;

/// Image loader producing JPEG bytes.
#[derive(Debug, Clone)]
pub struct JpegImageLoader {
    http: Client,
    quality: u8,
}

impl JpegImageLoader {
    /// Create a loader whose HTTP fetches time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            quality: REPORT_JPEG_QUALITY,
        })
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>, ImageError> {
        let unreadable = |reason: String| ImageError::Unreadable {
            reference: reference.to_string(),
            reason,
        };

        if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self
                .http
                .get(reference)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| unreadable(e.to_string()))?;
            let bytes = response.bytes().await.map_err(|e| unreadable(e.to_string()))?;
            return Ok(bytes.to_vec());
        }

        let path = reference.strip_prefix("file://").unwrap_or(reference);
        tokio::fs::read(path)
            .await
            .map_err(|e| unreadable(e.to_string()))
    }
}

/// Decode any supported image and encode it as JPEG.
///
/// # Errors
///
/// Returns [`ImageError::Undecodable`] if the bytes are not a supported image.
pub fn reencode_jpeg(reference: &str, bytes: &[u8], quality: u8) -> Result<Vec<u8>, ImageError> {
    let undecodable = |reason: String| ImageError::Undecodable {
        reference: reference.to_string(),
        reason,
    };

    let decoded = image::load_from_memory(bytes).map_err(|e| undecodable(e.to_string()))?;
    let rgb = image::DynamicImage::ImageRgb8(decoded.into_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .map_err(|e| undecodable(e.to_string()))?;
    Ok(out.into_inner())
}

#[async_trait]
impl ImagePort for JpegImageLoader {
    async fn load_jpeg(&self, reference: &str) -> Result<Vec<u8>, ImageError> {
        let bytes = self.read(reference).await?;
        let owned_reference = reference.to_string();
        let quality = self.quality;

        let jpeg = tokio::task::spawn_blocking(move || {
            reencode_jpeg(&owned_reference, &bytes, quality)
        })
        .await
        .map_err(|e| ImageError::Undecodable {
            reference: reference.to_string(),
            reason: e.to_string(),
        })??;

        tracing::debug!(reference, bytes = jpeg.len(), "Report image encoded");
        Ok(jpeg)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn is_jpeg(bytes: &[u8]) -> bool {
        bytes.starts_with(&[0xFF, 0xD8]) && bytes.ends_with(&[0xFF, 0xD9])
    }

    #[test]
    fn png_is_reencoded_as_jpeg() {
        let jpeg = reencode_jpeg("mem", &png_bytes(), REPORT_JPEG_QUALITY).unwrap();
        assert!(is_jpeg(&jpeg));
    }

    #[test]
    fn garbage_is_undecodable() {
        let err = reencode_jpeg("mem", b"not an image", REPORT_JPEG_QUALITY).unwrap_err();
        assert!(matches!(err, ImageError::Undecodable { .. }));
    }

    #[tokio::test]
    async fn loads_file_paths_and_file_urls() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&png_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let loader = JpegImageLoader::new(Duration::from_secs(1)).unwrap();

        assert!(is_jpeg(&loader.load_jpeg(&path).await.unwrap()));
        assert!(is_jpeg(&loader.load_jpeg(&format!("file://{path}")).await.unwrap()));
    }

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let loader = JpegImageLoader::new(Duration::from_secs(1)).unwrap();

        let err = loader.load_jpeg("/nonexistent/photo.png").await.unwrap_err();
        assert!(matches!(err, ImageError::Unreadable { .. }));
    }
}
