//! One harvest run, end to end
//!
//! Startup problems (missing inputs, no usable proxy) fail before anything is
//! dispatched. Once dispatch starts the run always ends with a final flush of
//! whatever was merged.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::harvest_pipeline::HarvestPipeline;
use crate::application::task_scheduler::{RunReport, SchedulerSettings, TaskScheduler};
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::config::{AppConfig, ConfigError};
use crate::infrastructure::http_client::{ReqwestTransport, ResilientFetcher, Sleeper, TokioSleeper, Transport};
use crate::infrastructure::input_loader::{load_proxies, load_source_items};
use crate::infrastructure::parsing::DocumentExtractor;
use crate::infrastructure::proxy_pool::{ProxyEndpoint, ProxyPool};

pub struct HarvestService {
    config: AppConfig,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
}

impl HarvestService {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            transport: Arc::new(ReqwestTransport::new()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Used for both retry waits and per-item jitter
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let input = &self.config.input;
        let items = load_source_items(&input.product_links_path, &self.config.fetch.site_base_url).await?;
        let proxies = usable_proxies(load_proxies(&input.proxies_path).await?)?;
        let pool = Arc::new(ProxyPool::new(proxies, input.proxy_selection)?);

        let checkpoint = CheckpointStore::new(&self.config.output.checkpoint_path);
        let store = checkpoint.load().await;
        let completed = Arc::new(store.completed_ids());

        let fetcher = ResilientFetcher::new(
            Arc::clone(&self.transport),
            pool,
            self.config.fetch.retry_policy(),
            self.config.fetch.request_timeout(),
        )
        .with_sleeper(Arc::clone(&self.sleeper));
        let extractor = DocumentExtractor::new().context("Failed to build document extractor")?;
        let pipeline = Arc::new(HarvestPipeline::new(fetcher, extractor));

        let scheduler = TaskScheduler::new(pipeline, SchedulerSettings::from_config(&self.config))
            .with_sleeper(Arc::clone(&self.sleeper))
            .with_checkpoint(checkpoint.clone());

        let report = scheduler.run(items, completed, store, cancel).await;

        checkpoint
            .flush(&report.store)
            .await
            .context("Failed to write final checkpoint")?;
        info!(
            "🏁 Harvest complete: {} records in {}",
            report.store.len(),
            checkpoint.path().display()
        );
        if let Some(reason) = &report.aborted {
            warn!("Run was aborted early: {}", reason);
        }
        Ok(report)
    }
}

/// Drop proxies reqwest cannot use; none left is a configuration error
fn usable_proxies(proxies: Vec<ProxyEndpoint>) -> Result<Vec<ProxyEndpoint>, ConfigError> {
    let total = proxies.len();
    let usable: Vec<_> = proxies
        .into_iter()
        .filter(|proxy| match ReqwestTransport::validate_proxy(proxy) {
            Ok(_) => true,
            Err(e) => {
                warn!("Ignoring proxy: {}", e);
                false
            }
        })
        .collect();

    if usable.is_empty() {
        return Err(ConfigError::MissingInput {
            message: format!("none of the {total} listed proxies is usable"),
        });
    }
    Ok(usable)
}

/// Cancel `token` on Ctrl-C so the run stops dispatching and flushes
pub fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Interrupt received, finishing up and writing checkpoint");
                token.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_proxies_are_dropped() {
        let proxies = vec![ProxyEndpoint::new("bad host:80"), ProxyEndpoint::new("10.0.0.1:8080")];

        let usable = usable_proxies(proxies).unwrap();

        assert_eq!(usable, vec![ProxyEndpoint::new("10.0.0.1:8080")]);
    }

    #[test]
    fn test_no_usable_proxy_is_configuration_error() {
        let result = usable_proxies(vec![ProxyEndpoint::new("bad host:80")]);
        assert!(matches!(result, Err(ConfigError::MissingInput { .. })));
    }
}
