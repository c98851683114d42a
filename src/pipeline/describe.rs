//! Image description through a ranked fallback chain of vision backends.
//!
//! ## Fallback, not retry
//!
//! Backends are tried once each, in tier order (primary → secondary →
//! local). A timeout, transport error, quota error or empty answer moves on
//! to the next backend; nothing is retried and there is no backoff. When the
//! whole chain fails the image still gets a slot in the output, holding the
//! placeholder text with `succeeded = false`, so positional order survives.
//!
//! ## Why `buffered` and not `buffer_unordered`?
//!
//! Descriptions run concurrently for throughput, but the merged document
//! must list them by page, then by extraction order. `buffered` yields
//! results in input order regardless of completion order.

use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::output::{DescriptionSource, ExtractedImage, ImageDescription};
use crate::pipeline::clean::clean_description;
use crate::progress::ProgressCallback;
use crate::services::llm::create_provider;
use crate::services::vision::{LlmVisionBackend, UpstageBackend, VisionBackend};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct ImageDescriber {
    backends: Vec<Arc<dyn VisionBackend>>,
    timeout: Duration,
    concurrency: usize,
}

fn tier_rank(tier: DescriptionSource) -> u8 {
    match tier {
        DescriptionSource::Primary => 0,
        DescriptionSource::Secondary => 1,
        DescriptionSource::Local => 2,
    }
}

impl ImageDescriber {
    /// Build a describer; backends are ordered by tier whatever order they
    /// are given in.
    pub fn new(
        mut backends: Vec<Arc<dyn VisionBackend>>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        backends.sort_by_key(|b| tier_rank(b.tier()));
        Self {
            backends,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Build the chain from configuration. Tiers without configuration are
    /// left out, as is the primary tier when `use_primary_vision` is off.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, IngestError> {
        let per_call = Duration::from_secs(config.vision_timeout_secs);
        let mut backends: Vec<Arc<dyn VisionBackend>> = Vec::new();

        let primary_key = config
            .upstage_api_key
            .as_ref()
            .filter(|_| config.use_primary_vision);
        if config.upstage_api_key.is_some() && primary_key.is_none() {
            info!("Primary vision tier disabled for this run");
        }
        if let Some(key) = primary_key {
            let upstage = UpstageBackend::new(key.clone(), config.upstage_endpoint.clone(), per_call)
                .map_err(|e| IngestError::ProviderNotConfigured {
                    provider: "upstage".into(),
                    hint: e.to_string(),
                })?;
            backends.push(Arc::new(upstage));
        }
        if let Some(spec) = &config.vision_llm {
            backends.push(Arc::new(LlmVisionBackend::new(
                create_provider(spec)?,
                DescriptionSource::Secondary,
                spec.to_string(),
                config.max_tokens,
            )));
        }
        if let Some(spec) = &config.local_vision {
            backends.push(Arc::new(LlmVisionBackend::new(
                create_provider(spec)?,
                DescriptionSource::Local,
                spec.to_string(),
                config.max_tokens,
            )));
        }

        if backends.is_empty() {
            warn!("No vision backend configured; every image will be a placeholder");
        } else {
            info!(
                "Vision chain: {}",
                backends
                    .iter()
                    .map(|b| b.name().to_string())
                    .collect::<Vec<_>>()
                    .join(" → ")
            );
        }

        Ok(Self::new(backends, per_call, config.describe_concurrency))
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Describe one image. Never fails: an exhausted chain yields a
    /// placeholder description.
    pub async fn describe(&self, image: &ExtractedImage) -> ImageDescription {
        for backend in &self.backends {
            match timeout(self.timeout, backend.describe(image)).await {
                Ok(Ok(text)) => {
                    let text = clean_description(&text);
                    if text.is_empty() {
                        warn!(
                            "page {} image {}: {} returned only whitespace",
                            image.page_number,
                            image.index_on_page,
                            backend.name()
                        );
                        continue;
                    }
                    debug!(
                        "page {} image {}: described by {}",
                        image.page_number,
                        image.index_on_page,
                        backend.name()
                    );
                    return ImageDescription::described(backend.tier(), text);
                }
                Ok(Err(e)) => warn!(
                    "page {} image {}: {} failed: {}",
                    image.page_number,
                    image.index_on_page,
                    backend.name(),
                    e
                ),
                Err(_) => warn!(
                    "page {} image {}: {} timed out after {:?}",
                    image.page_number,
                    image.index_on_page,
                    backend.name(),
                    self.timeout
                ),
            }
        }

        let last = self
            .backends
            .last()
            .map(|b| b.tier())
            .unwrap_or(DescriptionSource::Local);
        ImageDescription::placeholder(last)
    }

    /// Describe every image, returning descriptions in input order.
    pub async fn describe_all(
        &self,
        images: &[ExtractedImage],
        progress: &ProgressCallback,
    ) -> Vec<ImageDescription> {
        let total = images.len();
        stream::iter(images)
            .map(|image| async move {
                let description = self.describe(image).await;
                progress.on_image_described(image.page_number, total, description.succeeded);
                description
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::IMAGE_PLACEHOLDER;
    use crate::progress::NoopProgressCallback;
    use crate::services::vision::VisionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Answer(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedBackend {
        tier: DescriptionSource,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(tier: DescriptionSource, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                tier,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        fn tier(&self) -> DescriptionSource {
            self.tier
        }

        fn name(&self) -> &str {
            "scripted"
        }

        async fn describe(&self, image: &ExtractedImage) -> Result<String, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Answer(text) => {
                    // later pages finish first
                    let delay = 10 - u64::from(image.page_number.min(10));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(format!("{text} p{}", image.page_number))
                }
                Behaviour::Fail => Err(VisionError::RateLimited),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".into())
                }
            }
        }
    }

    fn image(page: u32) -> ExtractedImage {
        ExtractedImage::png(page, 0, vec![1, 2, 3])
    }

    fn describer(backends: Vec<Arc<dyn VisionBackend>>) -> ImageDescriber {
        ImageDescriber::new(backends, Duration::from_millis(50), 4)
    }

    #[tokio::test]
    async fn primary_success_stops_chain() {
        let primary = ScriptedBackend::new(DescriptionSource::Primary, Behaviour::Answer("chart"));
        let secondary = ScriptedBackend::new(DescriptionSource::Secondary, Behaviour::Answer("x"));
        let d = describer(vec![primary.clone(), secondary.clone()])
            .describe(&image(1))
            .await;
        assert!(d.succeeded);
        assert_eq!(d.source_backend, DescriptionSource::Primary);
        assert_eq!(d.text, "chart p1");
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_falls_through_without_retry() {
        let primary = ScriptedBackend::new(DescriptionSource::Primary, Behaviour::Fail);
        let secondary = ScriptedBackend::new(DescriptionSource::Secondary, Behaviour::Fail);
        let local = ScriptedBackend::new(DescriptionSource::Local, Behaviour::Answer("caption"));
        let d = describer(vec![local.clone(), primary.clone(), secondary.clone()])
            .describe(&image(2))
            .await;
        assert_eq!(d.source_backend, DescriptionSource::Local);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let primary = ScriptedBackend::new(DescriptionSource::Primary, Behaviour::Hang);
        let secondary = ScriptedBackend::new(DescriptionSource::Secondary, Behaviour::Answer("ok"));
        let d = describer(vec![primary, secondary]).describe(&image(1)).await;
        assert_eq!(d.source_backend, DescriptionSource::Secondary);
    }

    #[tokio::test]
    async fn all_fail_yields_placeholder() {
        let d = describer(vec![
            ScriptedBackend::new(DescriptionSource::Primary, Behaviour::Fail),
            ScriptedBackend::new(DescriptionSource::Secondary, Behaviour::Fail),
            ScriptedBackend::new(DescriptionSource::Local, Behaviour::Fail),
        ])
        .describe(&image(1))
        .await;
        assert!(!d.succeeded);
        assert_eq!(d.text, IMAGE_PLACEHOLDER);
        assert_eq!(d.source_backend, DescriptionSource::Local);
    }

    #[tokio::test]
    async fn empty_chain_yields_placeholder() {
        let d = describer(Vec::new()).describe(&image(1)).await;
        assert!(!d.succeeded);
        assert_eq!(d.source_backend, DescriptionSource::Local);
    }

    #[tokio::test]
    async fn describe_all_keeps_input_order() {
        let primary = ScriptedBackend::new(DescriptionSource::Primary, Behaviour::Answer("img"));
        let progress: ProgressCallback = Arc::new(NoopProgressCallback);
        let images: Vec<_> = (1..=6).map(image).collect();
        let out = describer(vec![primary]).describe_all(&images, &progress).await;
        let texts: Vec<_> = out.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["img p1", "img p2", "img p3", "img p4", "img p5", "img p6"]);
    }

    #[test]
    fn primary_tier_can_be_switched_off() {
        let with_primary = PipelineConfig::builder()
            .upstage_api_key("up-key")
            .build()
            .unwrap();
        assert_eq!(ImageDescriber::from_config(&with_primary).unwrap().backend_count(), 1);

        let without = PipelineConfig::builder()
            .upstage_api_key("up-key")
            .use_primary_vision(false)
            .build()
            .unwrap();
        assert_eq!(ImageDescriber::from_config(&without).unwrap().backend_count(), 0);
    }
}
