use super::AttachContext;
use crate::device::{AndroidDevice, DeviceHandle, UsbCamDevice};
use crate::error::Result;
use crate::settings::{SettingsStore, XmlSettingsStore};
use crate::utils::config::HarnessConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Builds the handle for a newly attached serial
#[async_trait]
pub trait HandleFactory: Send + Sync {
    async fn create(&self, ctx: AttachContext) -> Result<Arc<dyn DeviceHandle>>;
}

pub struct AndroidFactory {
    store: Arc<dyn SettingsStore>,
    config: HarnessConfig,
}

impl AndroidFactory {
    pub fn new(store: Arc<dyn SettingsStore>, config: HarnessConfig) -> Self {
        Self { store, config }
    }

    /// Settings files under the configured directory
    pub fn from_config(config: &HarnessConfig) -> Self {
        let store = Arc::new(XmlSettingsStore::new(&config.settings_dir));
        Self::new(store, config.clone())
    }
}

#[async_trait]
impl HandleFactory for AndroidFactory {
    async fn create(&self, ctx: AttachContext) -> Result<Arc<dyn DeviceHandle>> {
        let device = AndroidDevice::attach(ctx, self.store.clone(), &self.config).await?;
        Ok(Arc::new(device))
    }
}

pub struct UsbCamFactory {
    store: Arc<dyn SettingsStore>,
    config: HarnessConfig,
}

impl UsbCamFactory {
    pub fn new(store: Arc<dyn SettingsStore>, config: HarnessConfig) -> Self {
        Self { store, config }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        let store = Arc::new(XmlSettingsStore::new(&config.settings_dir));
        Self::new(store, config.clone())
    }
}

#[async_trait]
impl HandleFactory for UsbCamFactory {
    async fn create(&self, ctx: AttachContext) -> Result<Arc<dyn DeviceHandle>> {
        let device = UsbCamDevice::attach(ctx, self.store.clone(), &self.config).await?;
        Ok(Arc::new(device))
    }
}
