// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to provider drivers
//!
//! A provider driver translates VM lifecycle calls into calls against one
//! infrastructure backend.  There is one [`Provider`] implementation per
//! backend; [`crate::provider_factory::ProviderFactory`] picks the one to use
//! for a placement and binds it, together with the API versions in effect,
//! into a [`ProviderHandle`].

use crate::Document;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Highest provider contract version this core knows how to speak.
pub const MAX_SUPPORTED_API_VERSION: u32 = 2;

/// Versions in effect for every call made through one [`ProviderHandle`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallContext {
    /// Negotiated provider contract version.
    pub api_version: u32,
    /// API version of the stemcell the VM boots, if it declares one.
    pub stemcell_api_version: Option<u32>,
}

/// Arguments to [`Provider::create_vm`]
///
/// Passed by value: every attempt gets its own copy of each document, so
/// nothing a driver does to one attempt's arguments can leak into a retry.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateVmArgs {
    pub agent_id: String,
    pub stemcell_image_id: String,
    pub cloud_properties: Document,
    pub network_settings: Document,
    pub disk_cids: Vec<String>,
    pub env: Document,
}

/// Describes what a provider supports
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub api_version: u32,
    #[serde(default)]
    pub stemcell_formats: Vec<String>,
}

/// Kinds of provider failure
///
/// The `Display` form is the stable label recorded in audit events.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum ProviderErrorKind {
    VmCreationFailed,
    VmNotFound,
    NotImplemented,
    Timeout,
    CloudError,
}

/// An error reported by a provider driver
///
/// Whether a failure is worth retrying is decided by the driver and carried
/// in `retryable`; the orchestrator never second-guesses it.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Set when the backend reported a failure but did create a VM with this
    /// cid anyway.
    pub vm_cid: Option<String>,
}

impl ProviderError {
    pub fn vm_creation_failed(message: &str, retryable: bool) -> Self {
        ProviderError {
            kind: ProviderErrorKind::VmCreationFailed,
            message: message.to_owned(),
            retryable,
            vm_cid: None,
        }
    }

    pub fn vm_not_found(vm_cid: &str) -> Self {
        ProviderError {
            kind: ProviderErrorKind::VmNotFound,
            message: format!("VM `{}' not found", vm_cid),
            retryable: false,
            vm_cid: None,
        }
    }

    pub fn not_implemented(method: &str) -> Self {
        ProviderError {
            kind: ProviderErrorKind::NotImplemented,
            message: format!(
                "`{}' is not implemented by this provider",
                method
            ),
            retryable: false,
            vm_cid: None,
        }
    }

    pub fn cloud_error(message: &str) -> Self {
        ProviderError {
            kind: ProviderErrorKind::CloudError,
            message: message.to_owned(),
            retryable: false,
            vm_cid: None,
        }
    }

    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        ProviderError {
            kind: ProviderErrorKind::Timeout,
            message: format!(
                "{} did not complete within {:?}",
                operation, after
            ),
            retryable: false,
            vm_cid: None,
        }
    }

    /// Records that the backend created a VM despite reporting this failure.
    pub fn with_vm_cid(mut self, vm_cid: &str) -> Self {
        self.vm_cid = Some(vm_cid.to_owned());
        self
    }

    /// Stable label for audit events; never includes the message.
    pub fn label(&self) -> String {
        self.kind.to_string()
    }
}

/// A provider driver
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a VM and returns its provider-assigned cid.
    async fn create_vm(
        &self,
        ctx: &CallContext,
        args: CreateVmArgs,
    ) -> Result<String, ProviderError>;

    async fn delete_vm(
        &self,
        ctx: &CallContext,
        vm_cid: &str,
    ) -> Result<(), ProviderError>;

    async fn set_vm_metadata(
        &self,
        ctx: &CallContext,
        vm_cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError>;

    /// Contract version this driver would like to speak.
    fn request_api_version(&self) -> u32;

    async fn info(&self) -> Result<ProviderInfo, ProviderError>;
}

/// A provider bound to the versions negotiated for one orchestration run
///
/// Resolved once per run and reused for every create attempt and for any
/// compensating delete, so a rollback always reaches the same provider and
/// version pair that created the VM.
#[derive(Clone)]
pub struct ProviderHandle {
    name: String,
    context: CallContext,
    provider: Arc<dyn Provider>,
}

impl ProviderHandle {
    pub fn new(
        name: String,
        provider: Arc<dyn Provider>,
        context: CallContext,
    ) -> ProviderHandle {
        ProviderHandle { name, context, provider }
    }

    /// Name under which this provider is configured (its alias).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> CallContext {
        self.context
    }

    pub async fn create_vm(
        &self,
        args: CreateVmArgs,
    ) -> Result<String, ProviderError> {
        self.provider.create_vm(&self.context, args).await
    }

    pub async fn delete_vm(&self, vm_cid: &str) -> Result<(), ProviderError> {
        self.provider.delete_vm(&self.context, vm_cid).await
    }

    pub async fn set_vm_metadata(
        &self,
        vm_cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.provider.set_vm_metadata(&self.context, vm_cid, metadata).await
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
