//! Image reference normalization.
//!
//! Resolves a URL, filesystem path, or inline data URI into a JPEG data URI
//! whose total length fits the index's field-size ceiling. Every failure
//! becomes `None`; nothing here aborts a batch.

use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage};
use tracing::{debug, warn};

use catalog_core::config::ImageConfig;
use catalog_core::error::{CatalogError, Result};

const JPEG_DATA_URI_HEADER: &str = "data:image/jpeg;base64";

/// The three syntactic forms an image reference can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRef<'a> {
    /// `http://` or `https://` URL.
    Url(&'a str),
    /// Absolute filesystem path.
    Path(&'a str),
    /// Already-encoded payload, passed through as is.
    Inline(&'a str),
}

impl<'a> ImageRef<'a> {
    pub fn classify(reference: &'a str) -> Self {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            ImageRef::Url(reference)
        } else if reference.starts_with('/') {
            ImageRef::Path(reference)
        } else {
            ImageRef::Inline(reference)
        }
    }
}

/// Turns image references into size-bounded JPEG data URIs.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    http: reqwest::Client,
    config: ImageConfig,
}

impl ImageNormalizer {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| CatalogError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Normalize one reference. Returns `None` on any fetch, decode, or size
    /// failure.
    pub async fn normalize(&self, reference: &str) -> Option<String> {
        let payload = match ImageRef::classify(reference) {
            ImageRef::Url(url) => {
                let bytes = self
                    .fetch(url)
                    .await
                    .map_err(|e| debug!(url, error = %e, "Image fetch failed"))
                    .ok()?;
                self.encode(bytes, reference).await?
            }
            ImageRef::Path(path) => {
                let bytes = self
                    .read(path)
                    .await
                    .map_err(|e| debug!(path, error = %e, "Image read failed"))
                    .ok()?;
                self.encode(bytes, reference).await?
            }
            ImageRef::Inline(payload) => payload.to_string(),
        };

        self.enforce_limit(payload).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CatalogError::Image(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CatalogError::Image(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = match self.config.asset_root {
            Some(ref root) => PathBuf::from(root).join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        };
        Ok(tokio::fs::read(&resolved).await?)
    }

    /// First-pass encode at the configured box and quality.
    async fn encode(&self, bytes: Vec<u8>, reference: &str) -> Option<String> {
        let (w, h, q) = (
            self.config.max_width,
            self.config.max_height,
            self.config.quality,
        );
        let result = tokio::task::spawn_blocking(move || encode_data_uri(&bytes, w, h, q))
            .await
            .map_err(|e| CatalogError::Image(format!("encode task panicked: {}", e)))
            .and_then(|r| r);

        match result {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(reference = %truncate(reference), error = %e, "Image decode failed");
                None
            }
        }
    }

    /// Apply the length ceiling, with a single smaller recompression retry.
    async fn enforce_limit(&self, payload: String) -> Option<String> {
        let limit = self.config.max_payload_len;
        if payload.len() <= limit {
            return Some(payload);
        }

        debug!(len = payload.len(), limit, "Image payload too large, resizing");
        let (w, h, q) = (
            (self.config.max_width / 2).max(1),
            (self.config.max_height / 2).max(1),
            self.config.retry_quality,
        );
        let resized = tokio::task::spawn_blocking(move || recompress_data_uri(&payload, w, h, q))
            .await
            .map_err(|e| CatalogError::Image(format!("resize task panicked: {}", e)))
            .and_then(|r| r);

        match resized {
            Ok(resized) if resized.len() <= limit => {
                debug!(len = resized.len(), "Image resized within limit");
                Some(resized)
            }
            Ok(resized) => {
                warn!(len = resized.len(), limit, "Image still too large after resize");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to resize oversized image");
                None
            }
        }
    }
}

/// Decode raw image bytes and re-encode them as a bounded JPEG data URI.
pub fn encode_data_uri(bytes: &[u8], max_width: u32, max_height: u32, quality: u8) -> Result<String> {
    let img = image::load_from_memory(bytes).map_err(|e| CatalogError::Image(e.to_string()))?;
    let jpeg = encode_jpeg(img, max_width, max_height, quality)?;
    Ok(format!(
        "{},{}",
        JPEG_DATA_URI_HEADER,
        general_purpose::STANDARD.encode(jpeg)
    ))
}

/// Re-encode an existing payload (data URI or bare base64) at a smaller size.
pub fn recompress_data_uri(
    payload: &str,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> Result<String> {
    let encoded = match payload.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| CatalogError::Image(format!("base64 decode: {}", e)))?;
    encode_data_uri(&bytes, max_width, max_height, quality)
}

/// Convert to RGB, shrink to fit the box (never enlarge), and JPEG-encode.
fn encode_jpeg(img: DynamicImage, max_width: u32, max_height: u32, quality: u8) -> Result<Vec<u8>> {
    let fitted = if img.width() > max_width || img.height() > max_height {
        img.resize(max_width, max_height, FilterType::Triangle)
    } else {
        img
    };
    let rgb = fitted.to_rgb8();

    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| CatalogError::Image(format!("JPEG encode: {}", e)))?;
    Ok(buffer.into_inner())
}

fn truncate(reference: &str) -> String {
    reference.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn encoded(img: &DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    fn decode_payload(payload: &str) -> DynamicImage {
        let (header, data) = payload.split_once(',').unwrap();
        assert_eq!(header, JPEG_DATA_URI_HEADER);
        let bytes = general_purpose::STANDARD.decode(data).unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    fn normalizer(config: ImageConfig) -> ImageNormalizer {
        ImageNormalizer::new(&config).unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            ImageRef::classify("https://cdn.example.com/a.jpg"),
            ImageRef::Url("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            ImageRef::classify("http://cdn.example.com/a.jpg"),
            ImageRef::Url("http://cdn.example.com/a.jpg")
        );
        assert_eq!(
            ImageRef::classify("/images/a.jpg"),
            ImageRef::Path("/images/a.jpg")
        );
        assert_eq!(
            ImageRef::classify("data:image/jpeg;base64,AAAA"),
            ImageRef::Inline("data:image/jpeg;base64,AAAA")
        );
        assert_eq!(ImageRef::classify("ftp://x"), ImageRef::Inline("ftp://x"));
    }

    #[tokio::test]
    async fn test_inline_within_limit_passes_through() {
        let n = normalizer(ImageConfig::default());
        let payload = "data:image/jpeg;base64,QUJD";
        assert_eq!(n.normalize(payload).await.as_deref(), Some(payload));
    }

    #[tokio::test]
    async fn test_path_is_downscaled_preserving_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        std::fs::write(&path, encoded(&gradient(600, 300), ImageOutputFormat::Png)).unwrap();

        let n = normalizer(ImageConfig::default());
        let payload = n.normalize(path.to_str().unwrap()).await.unwrap();
        let img = decode_payload(&payload);
        assert_eq!((img.width(), img.height()), (256, 128));
        assert!(payload.len() <= 65_535);
    }

    #[tokio::test]
    async fn test_small_image_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        std::fs::write(&path, encoded(&gradient(50, 40), ImageOutputFormat::Png)).unwrap();

        let n = normalizer(ImageConfig::default());
        let img = decode_payload(&n.normalize(path.to_str().unwrap()).await.unwrap());
        assert_eq!((img.width(), img.height()), (50, 40));
    }

    #[tokio::test]
    async fn test_asset_root_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(
            dir.path().join("images").join("bag.png"),
            encoded(&gradient(20, 20), ImageOutputFormat::Png),
        )
        .unwrap();

        let n = normalizer(ImageConfig {
            asset_root: Some(dir.path().to_string_lossy().to_string()),
            ..ImageConfig::default()
        });
        assert!(n.normalize("/images/bag.png").await.is_some());
    }

    #[tokio::test]
    async fn test_missing_path_is_absent() {
        let n = normalizer(ImageConfig::default());
        assert!(n.normalize("/definitely/not/here.jpg").await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image at all").unwrap();

        let n = normalizer(ImageConfig::default());
        assert!(n.normalize(path.to_str().unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_url_is_absent() {
        let n = normalizer(ImageConfig {
            fetch_timeout_secs: 2,
            ..ImageConfig::default()
        });
        assert!(n.normalize("http://127.0.0.1:9/missing.jpg").await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_inline_is_resized_once() {
        // Uncompressed BMP inflates the inline payload far past the ceiling.
        let bmp = encoded(&gradient(400, 400), ImageOutputFormat::Bmp);
        let inline = format!("data:image/bmp;base64,{}", general_purpose::STANDARD.encode(bmp));
        assert!(inline.len() > 65_535);

        let n = normalizer(ImageConfig::default());
        let payload = n.normalize(&inline).await.unwrap();
        assert!(payload.len() <= 65_535);
        let img = decode_payload(&payload);
        assert_eq!((img.width(), img.height()), (128, 128));
    }

    #[tokio::test]
    async fn test_still_oversized_after_resize_is_absent() {
        let bmp = encoded(&gradient(400, 400), ImageOutputFormat::Bmp);
        let inline = format!("data:image/bmp;base64,{}", general_purpose::STANDARD.encode(bmp));

        let n = normalizer(ImageConfig {
            max_payload_len: 100,
            ..ImageConfig::default()
        });
        assert!(n.normalize(&inline).await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_garbage_is_absent() {
        let n = normalizer(ImageConfig {
            max_payload_len: 10,
            ..ImageConfig::default()
        });
        assert!(n.normalize("not-base64-at-all!!").await.is_none());
    }

    #[test]
    fn test_recompress_accepts_bare_base64() {
        let png = encoded(&gradient(300, 300), ImageOutputFormat::Png);
        let bare = general_purpose::STANDARD.encode(png);
        let payload = recompress_data_uri(&bare, 64, 64, 60).unwrap();
        let img = decode_payload(&payload);
        assert_eq!((img.width(), img.height()), (64, 64));
    }
}
