// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Selects the provider for a placement

use crate::instance::Placement;
use crate::provider::CallContext;
use crate::provider::Provider;
use crate::provider::ProviderErrorKind;
use crate::provider::ProviderHandle;
use crate::provider::MAX_SUPPORTED_API_VERSION;
use async_trait::async_trait;
use provisioner_common::Error;
use provisioner_common::LookupResult;
use provisioner_common::ResourceType;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::o;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The parts of a cloud config that determine provider selection
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudConfig {
    /// Availability zone name to provider name.
    #[serde(default)]
    pub azs: BTreeMap<String, String>,
    /// Provider name to the other names the same provider has been known by.
    #[serde(default)]
    pub provider_aliases: BTreeMap<String, Vec<String>>,
}

impl CloudConfig {
    /// Returns the provider name for an availability zone
    ///
    /// Instances without an availability zone use the default provider,
    /// whose name is empty.
    pub fn provider_name_for_az(
        &self,
        az: Option<&str>,
    ) -> LookupResult<String> {
        let Some(az) = az else {
            return Ok(String::new());
        };
        self.azs.get(az).cloned().ok_or_else(|| {
            Error::not_found_by_name(ResourceType::AvailabilityZone, az)
        })
    }

    /// Returns every name the provider `name` answers to, `name` first
    pub fn provider_aliases(&self, name: &str) -> Vec<String> {
        let mut aliases = vec![name.to_owned()];
        for alias in self.provider_aliases.get(name).into_iter().flatten() {
            if !aliases.contains(alias) {
                aliases.push(alias.clone());
            }
        }
        aliases
    }
}

/// Source of cloud-config snapshots
#[async_trait]
pub trait CloudConfigStore: Send + Sync {
    /// The current cloud config.
    async fn latest(&self) -> LookupResult<CloudConfig>;

    /// The cloud config the named deployment was last deployed with.
    async fn for_deployment(&self, deployment: &str)
        -> LookupResult<CloudConfig>;
}

/// Provider drivers known to this director, keyed by provider name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> ProviderRegistry {
        ProviderRegistry::default()
    }

    pub fn insert(&mut self, name: &str, provider: Arc<dyn Provider>) {
        self.providers.insert(name.to_owned(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }
}

/// Outcome of [`ProviderFactory::resolve`]
#[derive(Clone, Debug)]
pub struct ResolvedPlacement {
    pub handle: ProviderHandle,
    /// Image to boot, as known to the resolved provider.
    pub image_id: String,
}

pub struct ProviderFactory {
    log: Logger,
    cloud_configs: Arc<dyn CloudConfigStore>,
    registry: ProviderRegistry,
}

impl ProviderFactory {
    pub fn new(
        log: &Logger,
        cloud_configs: Arc<dyn CloudConfigStore>,
        registry: ProviderRegistry,
    ) -> ProviderFactory {
        ProviderFactory {
            log: log.new(o!("component" => "ProviderFactory")),
            cloud_configs,
            registry,
        }
    }

    /// Resolves the provider handle and image for a placement
    ///
    /// With `use_existing_cloud_config`, the provider is looked up in the
    /// cloud config `deployment` was last deployed with, and any aliases that
    /// config declares for it are honored when finding both the driver and
    /// the provider-specific image.  Otherwise the current cloud config is
    /// used.  Every failure here is a configuration error.
    pub async fn resolve(
        &self,
        placement: &Placement,
        deployment: &str,
        use_existing_cloud_config: bool,
    ) -> LookupResult<ResolvedPlacement> {
        let cloud_config = if use_existing_cloud_config {
            self.cloud_configs.for_deployment(deployment).await?
        } else {
            self.cloud_configs.latest().await?
        };

        let name = match &placement.cpi_alias {
            Some(alias) => alias.clone(),
            None => cloud_config
                .provider_name_for_az(placement.availability_zone())?,
        };
        let aliases = if use_existing_cloud_config {
            cloud_config.provider_aliases(&name)
        } else {
            vec![name.clone()]
        };

        let provider = aliases
            .iter()
            .find_map(|alias| self.registry.get(alias))
            .cloned()
            .ok_or_else(|| {
                Error::not_found_by_name(ResourceType::Provider, &name)
            })?;

        let image_id = aliases
            .iter()
            .find_map(|alias| placement.provider_images.get(alias))
            .cloned()
            .unwrap_or_else(|| placement.stemcell_image_id.clone());

        let api_version = negotiate_api_version(provider.as_ref()).await?;
        let context = CallContext {
            api_version,
            stemcell_api_version: placement.stemcell_api_version,
        };

        debug!(self.log, "resolved provider";
            "provider" => &name,
            "aliases" => ?aliases,
            "image_id" => &image_id,
            "api_version" => api_version,
            "stemcell_api_version" => ?placement.stemcell_api_version,
            "use_existing_cloud_config" => use_existing_cloud_config,
        );

        Ok(ResolvedPlacement {
            handle: ProviderHandle::new(name, provider, context),
            image_id,
        })
    }
}

/// Picks the highest contract version both sides speak
///
/// Drivers that predate `info` speak version 1.
async fn negotiate_api_version(provider: &dyn Provider) -> LookupResult<u32> {
    let supported = match provider.info().await {
        Ok(info) => info.api_version,
        Err(error) if error.kind == ProviderErrorKind::NotImplemented => 1,
        Err(error) => {
            return Err(Error::internal_error(&format!(
                "fetching provider info: {}",
                error
            )));
        }
    };
    Ok(supported
        .min(provider.request_api_version())
        .min(MAX_SUPPORTED_API_VERSION)
        .max(1))
}
