// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A scripted provider driver that records every call made to it

use async_trait::async_trait;
use provisioner::provider::CallContext;
use provisioner::provider::CreateVmArgs;
use provisioner::provider::Provider;
use provisioner::provider::ProviderError;
use provisioner::provider::ProviderInfo;
use provisioner::Document;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One call made to a [`FakeProvider`]
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderCall {
    CreateVm { ctx: CallContext, args: CreateVmArgs },
    DeleteVm { ctx: CallContext, vm_cid: String },
    SetVmMetadata {
        ctx: CallContext,
        vm_cid: String,
        metadata: BTreeMap<String, String>,
    },
}

/// Provider whose create results are scripted
///
/// Each `create_vm` call takes the next scripted result; once the script is
/// exhausted every call succeeds with the default cid.
pub struct FakeProvider {
    default_cid: String,
    create_results: Mutex<VecDeque<Result<String, ProviderError>>>,
    create_delay: Option<Duration>,
    mutate_env: bool,
    info: Result<ProviderInfo, ProviderError>,
    requested_api_version: u32,
    delete_error: Option<ProviderError>,
    metadata_error: Option<ProviderError>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl FakeProvider {
    pub fn new(default_cid: &str) -> FakeProvider {
        FakeProvider {
            default_cid: default_cid.to_owned(),
            create_results: Mutex::new(VecDeque::new()),
            create_delay: None,
            mutate_env: false,
            info: Ok(ProviderInfo {
                api_version: 2,
                stemcell_formats: vec![String::from("raw")],
            }),
            requested_api_version: 2,
            delete_error: None,
            metadata_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_create_results(
        self,
        results: Vec<Result<String, ProviderError>>,
    ) -> Self {
        *self.create_results.lock().unwrap() = results.into();
        self
    }

    /// Makes every `create_vm` call fail with `error`.
    pub fn always_failing(self, error: ProviderError, times: usize) -> Self {
        self.with_create_results(vec![Err(error); times])
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Makes `create_vm` modify the environment it is given after recording
    /// it, the way a driver that annotates its input would.
    pub fn mutating_env(mut self) -> Self {
        self.mutate_env = true;
        self
    }

    pub fn with_info(
        mut self,
        info: Result<ProviderInfo, ProviderError>,
    ) -> Self {
        self.info = info;
        self
    }

    pub fn with_requested_api_version(mut self, version: u32) -> Self {
        self.requested_api_version = version;
        self
    }

    pub fn with_delete_error(mut self, error: ProviderError) -> Self {
        self.delete_error = Some(error);
        self
    }

    pub fn with_metadata_error(mut self, error: ProviderError) -> Self {
        self.metadata_error = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> Vec<(CallContext, CreateVmArgs)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::CreateVm { ctx, args } => Some((ctx, args)),
                _ => None,
            })
            .collect()
    }

    /// Environments passed to `create_vm`, as received.
    pub fn created_envs(&self) -> Vec<Document> {
        self.create_calls().into_iter().map(|(_, args)| args.env).collect()
    }

    pub fn delete_calls(&self) -> Vec<(CallContext, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::DeleteVm { ctx, vm_cid } => Some((ctx, vm_cid)),
                _ => None,
            })
            .collect()
    }

    pub fn metadata_calls(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::SetVmMetadata { vm_cid, metadata, .. } => {
                    Some((vm_cid, metadata))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create_vm(
        &self,
        ctx: &CallContext,
        mut args: CreateVmArgs,
    ) -> Result<String, ProviderError> {
        let result = self
            .create_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_cid.clone()));
        self.calls
            .lock()
            .unwrap()
            .push(ProviderCall::CreateVm { ctx: *ctx, args: args.clone() });
        if self.mutate_env {
            args.env.insert(
                String::from("touched_by_provider"),
                serde_json::Value::Bool(true),
            );
            if let Some(serde_json::Value::Object(reserved)) =
                args.env.get_mut("bosh")
            {
                reserved.remove("group");
            }
        }
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn delete_vm(
        &self,
        ctx: &CallContext,
        vm_cid: &str,
    ) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(ProviderCall::DeleteVm {
            ctx: *ctx,
            vm_cid: vm_cid.to_owned(),
        });
        match &self.delete_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn set_vm_metadata(
        &self,
        ctx: &CallContext,
        vm_cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(ProviderCall::SetVmMetadata {
            ctx: *ctx,
            vm_cid: vm_cid.to_owned(),
            metadata: metadata.clone(),
        });
        match &self.metadata_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn request_api_version(&self) -> u32 {
        self.requested_api_version
    }

    async fn info(&self) -> Result<ProviderInfo, ProviderError> {
        self.info.clone()
    }
}
