//! Fetch then extract, for one product page

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::task_scheduler::ItemProcessor;
use crate::domain::{ItemOutcome, SkipReason, SourceItem};
use crate::infrastructure::http_client::{FetchError, ResilientFetcher};
use crate::infrastructure::parsing::DocumentExtractor;

pub struct HarvestPipeline {
    fetcher: ResilientFetcher,
    extractor: DocumentExtractor,
}

impl HarvestPipeline {
    pub fn new(fetcher: ResilientFetcher, extractor: DocumentExtractor) -> Self {
        Self { fetcher, extractor }
    }
}

#[async_trait]
impl ItemProcessor for HarvestPipeline {
    async fn process(&self, item: &SourceItem, cancel: &CancellationToken) -> ItemOutcome {
        let document = match self.fetcher.fetch(item.url(), cancel).await {
            Ok(document) => document,
            Err(e @ FetchError::Misconfigured { .. }) => return ItemOutcome::Fatal(e.to_string()),
            Err(e) => return ItemOutcome::Skipped(SkipReason::FetchAbandoned(e.to_string())),
        };

        debug!("Extracting {} from {} bytes", item.id(), document.len());
        match self.extractor.try_extract(&document, item.id()) {
            Ok(record) => ItemOutcome::Extracted(record),
            Err(e) => ItemOutcome::Skipped(SkipReason::NoData(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::http_client::{FetchRequest, Sleeper, Transport, TransportError};
    use crate::infrastructure::proxy_pool::{ProxyEndpoint, ProxyPool};
    use crate::infrastructure::retry_policy::{RetryLimit, RetryPolicy};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedTransport(Result<String, TransportError>);

    #[async_trait]
    impl Transport for FixedTransport {
        async fn get(&self, _request: FetchRequest<'_>) -> Result<String, TransportError> {
            self.0.clone()
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn pipeline(response: Result<String, TransportError>) -> HarvestPipeline {
        let pool = Arc::new(ProxyPool::random(vec![ProxyEndpoint::new("10.0.0.1:8080")]).unwrap());
        let policy = RetryPolicy {
            limit: RetryLimit::attempts(2),
            ..Default::default()
        };
        let fetcher = ResilientFetcher::new(
            Arc::new(FixedTransport(response)),
            pool,
            policy,
            Duration::from_secs(30),
        )
        .with_sleeper(Arc::new(NoSleep));
        HarvestPipeline::new(fetcher, DocumentExtractor::new().unwrap())
    }

    fn item() -> SourceItem {
        SourceItem::new("55", "https://example.test/products/55")
    }

    #[tokio::test]
    async fn test_page_with_payload_is_extracted() {
        let page = r#"<html><script type="application/discover+json">
            {"mfe-orchestrator":{"props":{"apolloCache":{"ProductType:55":{"title":"Tea"}}}}}
            </script></html>"#;

        let outcome = pipeline(Ok(page.to_string()))
            .process(&item(), &CancellationToken::new())
            .await;

        let ItemOutcome::Extracted(record) = outcome else {
            panic!("expected a record, got {outcome:?}");
        };
        assert_eq!(record.product_data.unwrap().title, json!("Tea"));
    }

    #[tokio::test]
    async fn test_page_without_payload_is_skipped() {
        let outcome = pipeline(Ok("<html></html>".to_string()))
            .process(&item(), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, ItemOutcome::Skipped(SkipReason::NoData(_))));
    }

    #[tokio::test]
    async fn test_exhausted_fetch_is_skipped() {
        let outcome = pipeline(Err(TransportError::Status { status: 503 }))
            .process(&item(), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, ItemOutcome::Skipped(SkipReason::FetchAbandoned(_))));
    }

    #[tokio::test]
    async fn test_unbuildable_client_is_fatal() {
        let outcome = pipeline(Err(TransportError::ClientBuild("tls".into())))
            .process(&item(), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, ItemOutcome::Fatal(_)));
    }
}
