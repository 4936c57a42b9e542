//! Batched embedding with positional absence markers.
//!
//! Both batchers return exactly one slot per input, in input order. A failed
//! batch turns into `None` slots and a `warn!` line; it never becomes an error
//! for the caller, so one bad batch cannot sink a bulk import.

use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use catalog_core::config::{ChunkingConfig, EmbeddingConfig};
use catalog_core::error::{CatalogError, Result};
use catalog_core::types::{EmbedMode, Embedding, MaybeEmbedding};

use crate::chunk::ChunkSplitter;
use crate::embedding::{l2_normalize, ImageEmbeddingClient, TextEmbeddingClient};
use crate::image::ImageNormalizer;

const OCTET_STREAM_HEADER: &str = "data:application/octet-stream";
const JPEG_HEADER: &str = "data:image/jpeg";

// =============================================================================
// Text
// =============================================================================

/// Embeds text through a [`TextEmbeddingClient`] in fixed-size batches.
pub struct TextEmbeddingBatcher {
    client: Arc<dyn TextEmbeddingClient>,
    splitter: ChunkSplitter,
    batch_size: usize,
    max_concurrent: usize,
}

impl TextEmbeddingBatcher {
    pub fn new(
        client: Arc<dyn TextEmbeddingClient>,
        splitter: ChunkSplitter,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            splitter,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(
        client: Arc<dyn TextEmbeddingClient>,
        embedding: &EmbeddingConfig,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            client,
            ChunkSplitter::from_config(chunking)?,
            embedding.batch_size,
            embedding.max_concurrent_batches,
        ))
    }

    pub fn splitter(&self) -> &ChunkSplitter {
        &self.splitter
    }

    /// Embed every text, one slot per input.
    pub async fn embed(&self, texts: &[String], mode: EmbedMode) -> Vec<MaybeEmbedding> {
        if texts.is_empty() {
            return Vec::new();
        }

        let batches: Vec<Vec<MaybeEmbedding>> = stream::iter(texts.chunks(self.batch_size).enumerate())
            .map(|(index, batch)| self.embed_batch(index, batch, mode))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        batches.into_iter().flatten().collect()
    }

    async fn embed_batch(&self, index: usize, batch: &[String], mode: EmbedMode) -> Vec<MaybeEmbedding> {
        match self.client.embed_batch(batch, mode).await {
            Ok(vectors) if vectors.len() == batch.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                warn!(
                    batch = index,
                    expected = batch.len(),
                    received = vectors.len(),
                    "Embedding count mismatch, dropping batch"
                );
                vec![None; batch.len()]
            }
            Err(e) => {
                warn!(batch = index, size = batch.len(), error = %e, "Text embedding batch failed");
                vec![None; batch.len()]
            }
        }
    }

    /// Chunk each text, embed the chunks, and average them back into one
    /// vector per text.
    pub async fn embed_chunked(&self, texts: &[String], mode: EmbedMode) -> Vec<MaybeEmbedding> {
        if texts.is_empty() {
            return Vec::new();
        }

        let mut chunk_counts = Vec::with_capacity(texts.len());
        let mut chunks = Vec::new();
        for text in texts {
            let before = chunks.len();
            chunks.extend(self.splitter.split(text).map(str::to_string));
            chunk_counts.push(chunks.len() - before);
        }
        debug!(texts = texts.len(), chunks = chunks.len(), "Embedding chunked texts");

        let chunk_embeddings = self.embed(&chunks, mode).await;
        reconstruct(&chunk_counts, chunk_embeddings)
    }

    /// Embed a single search query and scale it to unit length.
    pub async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let vectors = self
            .client
            .embed_batch(&[text.to_string()], EmbedMode::Query)
            .await?;
        vectors
            .into_iter()
            .next()
            .map(l2_normalize)
            .ok_or_else(|| CatalogError::Embedding("No embedding returned for query".to_string()))
    }
}

/// Regroup a flat list of chunk embeddings into one mean vector per text.
///
/// `chunk_counts[i]` is the number of chunks text `i` produced. A text with
/// no chunks, or whose chunks are all absent, gets `None`. Chunks whose
/// dimension differs from the first present chunk of the same text are
/// skipped.
pub fn reconstruct(chunk_counts: &[usize], chunk_embeddings: Vec<MaybeEmbedding>) -> Vec<MaybeEmbedding> {
    let expected: usize = chunk_counts.iter().sum();
    if expected != chunk_embeddings.len() {
        warn!(
            expected,
            received = chunk_embeddings.len(),
            "Chunk embedding count differs from chunk total"
        );
    }

    let mut slots = chunk_embeddings.into_iter();
    chunk_counts
        .iter()
        .enumerate()
        .map(|(text_index, &count)| {
            let mut sum: Option<Vec<f64>> = None;
            let mut present = 0usize;

            for slot in slots.by_ref().take(count) {
                let Some(vector) = slot else { continue };
                match sum {
                    None => {
                        sum = Some(vector.iter().map(|&x| x as f64).collect());
                        present = 1;
                    }
                    Some(ref mut acc) if acc.len() == vector.len() => {
                        for (a, &x) in acc.iter_mut().zip(vector.iter()) {
                            *a += x as f64;
                        }
                        present += 1;
                    }
                    Some(ref acc) => {
                        warn!(
                            text = text_index,
                            expected = acc.len(),
                            actual = vector.len(),
                            "Skipping chunk embedding with mismatched dimension"
                        );
                    }
                }
            }

            sum.map(|acc| acc.into_iter().map(|a| (a / present as f64) as f32).collect())
        })
        .collect()
}

// =============================================================================
// Image
// =============================================================================

/// Normalizes image references and embeds them in batches.
pub struct ImageEmbeddingBatcher {
    client: Arc<dyn ImageEmbeddingClient>,
    normalizer: ImageNormalizer,
    batch_size: usize,
    max_concurrent: usize,
}

impl ImageEmbeddingBatcher {
    pub fn new(
        client: Arc<dyn ImageEmbeddingClient>,
        normalizer: ImageNormalizer,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            normalizer,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Embed every image reference, one slot per input.
    pub async fn embed(&self, references: &[String]) -> Vec<MaybeEmbedding> {
        if references.is_empty() {
            return Vec::new();
        }

        let batches: Vec<Vec<MaybeEmbedding>> =
            stream::iter(references.chunks(self.batch_size).enumerate())
                .map(|(index, batch)| self.embed_batch(index, batch))
                .buffered(self.max_concurrent)
                .collect()
                .await;

        batches.into_iter().flatten().collect()
    }

    async fn embed_batch(&self, index: usize, batch: &[String]) -> Vec<MaybeEmbedding> {
        let normalized: Vec<Option<String>> =
            join_all(batch.iter().map(|reference| self.normalizer.normalize(reference))).await;

        let payloads: Vec<String> = normalized.iter().flatten().cloned().collect();
        if payloads.len() < batch.len() {
            debug!(
                batch = index,
                dropped = batch.len() - payloads.len(),
                "Some images could not be normalized"
            );
        }
        if payloads.is_empty() {
            return vec![None; batch.len()];
        }

        let vectors = match self.client.embed_batch(&payloads).await {
            Ok(vectors) => vectors,
            Err(CatalogError::UnsupportedImageFormat(message)) => {
                warn!(
                    batch = index,
                    size = payloads.len(),
                    error = %message,
                    "Image batch rejected: unsupported image format (only JPEG and PNG are accepted)"
                );
                return vec![None; batch.len()];
            }
            Err(e) => {
                warn!(batch = index, size = payloads.len(), error = %e, "Image embedding batch failed");
                return vec![None; batch.len()];
            }
        };

        if vectors.len() < payloads.len() {
            warn!(
                batch = index,
                expected = payloads.len(),
                received = vectors.len(),
                "Image endpoint returned fewer embeddings than requested"
            );
        }

        let mut vectors = vectors.into_iter();
        normalized
            .iter()
            .map(|payload| payload.as_ref().and_then(|_| vectors.next()))
            .collect()
    }

    /// Embed a single query image.
    ///
    /// The reference goes through the same normalization as catalog images,
    /// so an oversized upload is shrunk and a URL or path is fetched. A query
    /// image that cannot be normalized is an error.
    pub async fn embed_query(&self, reference: &str) -> Result<Embedding> {
        let reference = match reference.strip_prefix(OCTET_STREAM_HEADER) {
            Some(rest) => format!("{}{}", JPEG_HEADER, rest),
            None => reference.to_string(),
        };
        let payload = self.normalizer.normalize(&reference).await.ok_or_else(|| {
            CatalogError::Image("Query image could not be normalized within the size limit".to_string())
        })?;
        self.client
            .embed_batch(&[payload])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::Embedding("No embedding returned for query image".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{cosine_similarity, MockImageEmbedding, MockTextEmbedding};
    use async_trait::async_trait;
    use catalog_core::config::ImageConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Mutex;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn text_batcher(batch_size: usize, max_concurrent: usize) -> (Arc<MockTextEmbedding>, TextEmbeddingBatcher) {
        let mock = Arc::new(MockTextEmbedding::with_dimensions(16));
        let batcher = TextEmbeddingBatcher::new(
            mock.clone(),
            ChunkSplitter::new(8, 2).unwrap(),
            batch_size,
            max_concurrent,
        );
        (mock, batcher)
    }

    /// Returns one vector fewer than asked for.
    struct ShortTextClient;

    #[async_trait]
    impl TextEmbeddingClient for ShortTextClient {
        async fn embed_batch(&self, inputs: &[String], _mode: EmbedMode) -> Result<Vec<Embedding>> {
            Ok(vec![vec![1.0, 0.0]; inputs.len().saturating_sub(1)])
        }

        fn model(&self) -> &str {
            "short"
        }
    }

    /// Records every batch it receives.
    #[derive(Default)]
    struct RecordingImageClient {
        calls: Mutex<Vec<Vec<String>>>,
        inner: MockImageEmbedding,
    }

    impl RecordingImageClient {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageEmbeddingClient for RecordingImageClient {
        async fn embed_batch(&self, payloads: &[String]) -> Result<Vec<Embedding>> {
            self.calls.lock().unwrap().push(payloads.to_vec());
            self.inner.embed_batch(payloads).await
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    fn image_batcher(config: ImageConfig) -> (Arc<RecordingImageClient>, ImageEmbeddingBatcher) {
        let client = Arc::new(RecordingImageClient::default());
        let batcher = ImageEmbeddingBatcher::new(
            client.clone(),
            ImageNormalizer::new(&config).unwrap(),
            4,
            2,
        );
        (client, batcher)
    }

    #[tokio::test]
    async fn test_embed_empty_input() {
        let (_, batcher) = text_batcher(4, 2);
        assert!(batcher.embed(&[], EmbedMode::Passage).await.is_empty());
        assert!(batcher.embed_chunked(&[], EmbedMode::Passage).await.is_empty());
    }

    #[tokio::test]
    async fn test_embed_preserves_order_with_failed_batches() {
        let mut rng = StdRng::seed_from_u64(17);
        let texts: Vec<String> = (0..203)
            .map(|i| {
                if rng.random_bool(0.03) {
                    String::new()
                } else {
                    format!("product {}", i)
                }
            })
            .collect();

        let (mock, batcher) = text_batcher(8, 3);
        let out = batcher.embed(&texts, EmbedMode::Passage).await;
        assert_eq!(out.len(), texts.len());

        for (batch_texts, batch_out) in texts.chunks(8).zip(out.chunks(8)) {
            let failed = batch_texts.iter().any(|t| t.is_empty());
            for (text, slot) in batch_texts.iter().zip(batch_out) {
                if failed {
                    assert!(slot.is_none());
                } else {
                    assert_eq!(slot.as_ref(), Some(&mock.vector_for(text)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_whole_batch() {
        let batcher = TextEmbeddingBatcher::new(Arc::new(ShortTextClient), ChunkSplitter::default(), 3, 1);
        let out = batcher.embed(&strings(&["a", "b", "c", "d"]), EmbedMode::Query).await;
        // Batch [a, b, c] gets 2 vectors, batch [d] gets 0: both are dropped.
        assert_eq!(out, vec![None, None, None, None]);
    }

    #[tokio::test]
    async fn test_embed_chunked_means_chunk_vectors() {
        let (mock, batcher) = text_batcher(32, 2);
        let text = "abcdefghijklmnop".to_string();
        let chunks: Vec<&str> = batcher.splitter().split(&text).collect();
        assert!(chunks.len() > 1);

        let out = batcher.embed_chunked(&[text.clone()], EmbedMode::Passage).await;
        let mean = out[0].as_ref().unwrap();

        let dims = mean.len();
        for d in 0..dims {
            let expected: f32 = chunks.iter().map(|c| mock.vector_for(c)[d]).sum::<f32>() / chunks.len() as f32;
            assert!((mean[d] - expected).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_embed_chunked_blank_text_is_absent() {
        let (_, batcher) = text_batcher(32, 2);
        let out = batcher
            .embed_chunked(&strings(&["red shoes", "   ", "blue hat"]), EmbedMode::Passage)
            .await;
        assert_eq!(out.len(), 3);
        assert!(out[0].is_some());
        assert!(out[1].is_none());
        assert!(out[2].is_some());
    }

    #[tokio::test]
    async fn test_embed_query_is_unit_length() {
        let (_, batcher) = text_batcher(32, 2);
        let v = batcher.embed_query("waterproof jacket").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_embed_query_failure_is_error() {
        let (_, batcher) = text_batcher(32, 2);
        assert!(batcher.embed_query("").await.is_err());
    }

    #[test]
    fn test_reconstruct_skips_absent_chunks() {
        let v1 = vec![1.0, 0.0];
        let v3 = vec![0.0, 1.0];
        let out = reconstruct(&[3], vec![Some(v1), None, Some(v3)]);
        assert_eq!(out, vec![Some(vec![0.5, 0.5])]);
    }

    #[test]
    fn test_reconstruct_zero_and_all_absent() {
        let out = reconstruct(&[0, 2, 1], vec![None, None, Some(vec![2.0, 4.0])]);
        assert_eq!(out, vec![None, None, Some(vec![2.0, 4.0])]);
    }

    #[test]
    fn test_reconstruct_ignores_mismatched_dimension() {
        let out = reconstruct(&[3], vec![Some(vec![1.0, 1.0]), Some(vec![9.0]), Some(vec![3.0, 3.0])]);
        assert_eq!(out, vec![Some(vec![2.0, 2.0])]);
    }

    #[test]
    fn test_reconstruct_short_input_yields_absent() {
        let out = reconstruct(&[1, 2], vec![Some(vec![1.0])]);
        assert_eq!(out, vec![Some(vec![1.0]), None]);
    }

    #[tokio::test]
    async fn test_image_batch_sends_only_normalized_subset() {
        let (client, batcher) = image_batcher(ImageConfig {
            max_payload_len: 100,
            ..ImageConfig::default()
        });
        let a = "data:image/jpeg;base64,QUFB".to_string();
        let oversized = "x".repeat(200);
        let c = "data:image/jpeg;base64,Q0ND".to_string();

        let out = batcher.embed(&[a.clone(), oversized, c.clone()]).await;

        assert_eq!(client.calls(), vec![vec![a.clone(), c.clone()]]);
        let mock = MockImageEmbedding::new();
        assert_eq!(out, vec![Some(mock.vector_for(&a)), None, Some(mock.vector_for(&c))]);
    }

    #[tokio::test]
    async fn test_image_batch_all_failed_skips_remote_call() {
        let (client, batcher) = image_batcher(ImageConfig::default());
        let out = batcher
            .embed(&strings(&["/no/such/file.jpg", "/nor/this.png"]))
            .await;
        assert_eq!(out, vec![None, None]);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_format_fails_only_its_batch() {
        let (_, batcher) = image_batcher(ImageConfig::default());
        let mut refs: Vec<String> = (0..4).map(|i| format!("data:image/jpeg;base64,{}", i)).collect();
        refs[1] = "data:image/webp;base64,UklGR".to_string();
        refs.push("data:image/png;base64,iVBOR".to_string());

        let out = batcher.embed(&refs).await;
        assert_eq!(out.len(), 5);
        assert!(out[..4].iter().all(Option::is_none));
        assert!(out[4].is_some());
    }

    /// Drops the last vector of every batch.
    struct ShortImageClient;

    #[async_trait]
    impl ImageEmbeddingClient for ShortImageClient {
        async fn embed_batch(&self, payloads: &[String]) -> Result<Vec<Embedding>> {
            let mut vectors = MockImageEmbedding::new().embed_batch(payloads).await?;
            vectors.pop();
            Ok(vectors)
        }

        fn model(&self) -> &str {
            "short"
        }
    }

    #[tokio::test]
    async fn test_image_shortfall_leaves_trailing_slots_absent() {
        let batcher = ImageEmbeddingBatcher::new(
            Arc::new(ShortImageClient),
            ImageNormalizer::new(&ImageConfig::default()).unwrap(),
            4,
            1,
        );
        let refs = strings(&[
            "data:image/jpeg;base64,QQ==",
            "/no/such/file.jpg",
            "data:image/jpeg;base64,Qg==",
            "data:image/jpeg;base64,Qw==",
        ]);

        let out = batcher.embed(&refs).await;
        let mock = MockImageEmbedding::new();
        assert_eq!(
            out,
            vec![
                Some(mock.vector_for(&refs[0])),
                None,
                Some(mock.vector_for(&refs[2])),
                None,
            ]
        );
    }

    #[tokio::test]
    async fn test_image_query_rewrites_octet_stream() {
        let (client, batcher) = image_batcher(ImageConfig::default());
        let v = batcher
            .embed_query("data:application/octet-stream;base64,QUJD")
            .await
            .unwrap();

        assert_eq!(client.calls(), vec![vec!["data:image/jpeg;base64,QUJD".to_string()]]);
        let expected = MockImageEmbedding::new().vector_for("data:image/jpeg;base64,QUJD");
        assert!((cosine_similarity(&v, &expected) - 1.0).abs() < 1e-5);
    }

    fn bmp_data_uri(width: u32, height: u32) -> String {
        use base64::{engine::general_purpose, Engine as _};
        use image::{DynamicImage, ImageOutputFormat, RgbImage};

        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        }));
        let mut buffer = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageOutputFormat::Bmp).unwrap();
        format!(
            "data:image/bmp;base64,{}",
            general_purpose::STANDARD.encode(buffer.into_inner())
        )
    }

    #[tokio::test]
    async fn test_image_query_oversized_upload_is_resized() {
        let (client, batcher) = image_batcher(ImageConfig::default());
        let upload = bmp_data_uri(400, 400);
        assert!(upload.len() > 65_535);

        batcher.embed_query(&upload).await.unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        let sent = &calls[0][0];
        assert!(sent.starts_with("data:image/jpeg;base64,"));
        assert!(sent.len() <= 65_535);
    }

    #[tokio::test]
    async fn test_image_query_still_oversized_is_error() {
        let (client, batcher) = image_batcher(ImageConfig {
            max_payload_len: 100,
            ..ImageConfig::default()
        });
        let err = batcher.embed_query(&bmp_data_uri(400, 400)).await.unwrap_err();
        assert!(matches!(err, CatalogError::Image(_)));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_image_query_path_is_read_and_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.bmp");
        let upload = bmp_data_uri(300, 150);
        let (_, data) = upload.split_once(',').unwrap();
        {
            use base64::{engine::general_purpose, Engine as _};
            std::fs::write(&path, general_purpose::STANDARD.decode(data).unwrap()).unwrap();
        }

        let (client, batcher) = image_batcher(ImageConfig::default());
        batcher.embed_query(path.to_str().unwrap()).await.unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0][0].starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_image_query_missing_path_is_error() {
        let (client, batcher) = image_batcher(ImageConfig::default());
        let err = batcher.embed_query("/no/such/query.jpg").await.unwrap_err();
        assert!(matches!(err, CatalogError::Image(_)));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_image_query_failure_is_error() {
        let (_, batcher) = image_batcher(ImageConfig::default());
        let err = batcher.embed_query("data:image/webp;base64,UklGR").await.unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedImageFormat(_)));
    }
}
