// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory cloud-config, variable, and VM record stores

use async_trait::async_trait;
use chrono::Utc;
use provisioner::datastore::VmRecord;
use provisioner::datastore::VmRecordInit;
use provisioner::datastore::VmStore;
use provisioner::instance::VariableSetHandle;
use provisioner::interpolate::VariableStore;
use provisioner::provider_factory::CloudConfig;
use provisioner::provider_factory::CloudConfigStore;
use provisioner_common::CreateResult;
use provisioner_common::DeleteResult;
use provisioner_common::Error;
use provisioner_common::LookupResult;
use provisioner_common::ResourceType;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Cloud configs fixed at construction
#[derive(Clone, Debug, Default)]
pub struct StaticCloudConfigStore {
    latest: CloudConfig,
    deployments: BTreeMap<String, CloudConfig>,
}

impl StaticCloudConfigStore {
    pub fn new(latest: CloudConfig) -> Self {
        StaticCloudConfigStore { latest, deployments: BTreeMap::new() }
    }

    pub fn with_deployment(
        mut self,
        deployment: &str,
        cloud_config: CloudConfig,
    ) -> Self {
        self.deployments.insert(deployment.to_owned(), cloud_config);
        self
    }
}

#[async_trait]
impl CloudConfigStore for StaticCloudConfigStore {
    async fn latest(&self) -> LookupResult<CloudConfig> {
        Ok(self.latest.clone())
    }

    async fn for_deployment(
        &self,
        deployment: &str,
    ) -> LookupResult<CloudConfig> {
        self.deployments.get(deployment).cloned().ok_or_else(|| {
            Error::not_found_by_name(ResourceType::CloudConfig, deployment)
        })
    }
}

/// Variable sets held in memory, keyed by set id
#[derive(Default)]
pub struct InMemoryVariableStore {
    sets: BTreeMap<u64, BTreeMap<String, Value>>,
    lookups: Mutex<Vec<(u64, String)>>,
}

impl InMemoryVariableStore {
    pub fn new() -> Self {
        InMemoryVariableStore::default()
    }

    pub fn with_variable(
        mut self,
        set_id: u64,
        name: &str,
        value: Value,
    ) -> Self {
        self.sets.entry(set_id).or_default().insert(name.to_owned(), value);
        self
    }

    /// `(set id, name)` of every lookup, in order.
    pub fn lookups(&self) -> Vec<(u64, String)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn get(
        &self,
        name: &str,
        variable_set: &VariableSetHandle,
    ) -> Result<Option<Value>, Error> {
        self.lookups
            .lock()
            .unwrap()
            .push((variable_set.id, name.to_owned()));
        let set = self.sets.get(&variable_set.id).ok_or_else(|| {
            Error::not_found_by_name(
                ResourceType::VariableSet,
                &variable_set.id.to_string(),
            )
        })?;
        Ok(set.get(name).cloned())
    }
}

/// VM records held in memory, with injectable write failures
#[derive(Default)]
pub struct InMemoryVmStore {
    records: Mutex<BTreeMap<String, VmRecord>>,
    create_error: Mutex<Option<Error>>,
}

impl InMemoryVmStore {
    pub fn new() -> Self {
        InMemoryVmStore::default()
    }

    /// Makes every subsequent `vm_create` fail with `error`.
    pub fn fail_creates_with(&self, error: Error) {
        *self.create_error.lock().unwrap() = Some(error);
    }

    pub fn records(&self) -> Vec<VmRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl VmStore for InMemoryVmStore {
    async fn vm_create(&self, init: VmRecordInit) -> CreateResult<VmRecord> {
        if let Some(error) = self.create_error.lock().unwrap().clone() {
            return Err(error);
        }
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&init.cid) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Vm,
                object_name: init.cid,
            });
        }
        let record = VmRecord::new(init, Utc::now());
        records.insert(record.cid.clone(), record.clone());
        Ok(record)
    }

    async fn vm_fetch_by_cid(&self, cid: &str) -> LookupResult<VmRecord> {
        self.records
            .lock()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::not_found_by_cid(ResourceType::Vm, cid))
    }

    async fn vm_delete(&self, cid: &str) -> DeleteResult {
        self.records
            .lock()
            .unwrap()
            .remove(cid)
            .map(|_| ())
            .ok_or_else(|| Error::not_found_by_cid(ResourceType::Vm, cid))
    }
}
