//! Process-wide state shared by every tunnel and auxiliary channel.

use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::license::{LicenseResolver, StaticLicenses};
use crate::protocol::dispatcher::Pipeline;
use crate::protocol::handlers;
use crate::service::pair::PairDirectory;
use crate::utils::Metrics;

pub struct ProxyContext {
    pub config: Arc<ProxyConfig>,
    pub pipeline: Arc<Pipeline>,
    pub directory: Arc<PairDirectory>,
    pub licenses: Arc<dyn LicenseResolver>,
    pub metrics: Arc<Metrics>,
}

impl ProxyContext {
    /// Context with the built-in interceptor pipeline and config-backed
    /// licenses.
    ///
    /// # Errors
    /// Fails if the built-in pipeline cannot be assembled.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let pipeline = handlers::default_pipeline()?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: ProxyConfig, pipeline: Pipeline) -> Self {
        let licenses = StaticLicenses::from_config(&config.licenses);
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            directory: Arc::new(PairDirectory::default()),
            licenses: Arc::new(licenses),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_licenses(mut self, licenses: Arc<dyn LicenseResolver>) -> Self {
        self.licenses = licenses;
        self
    }
}
