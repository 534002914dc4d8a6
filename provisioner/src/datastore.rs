// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence of VM records
//!
//! A VM record is written only after a provider has returned a cid for the
//! VM.  Its existence is what makes a VM known to the rest of the system: a
//! VM that exists at a provider without a record has leaked.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use provisioner_common::CreateResult;
use provisioner_common::DeleteResult;
use provisioner_common::LookupResult;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Fields of a VM record supplied by its creator
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VmRecordInit {
    pub cid: String,
    pub instance_id: Uuid,
    /// Name of the provider that created the VM
    pub provider: String,
    pub stemcell_api_version: Option<u32>,
    pub agent_id: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VmRecord {
    pub cid: String,
    pub instance_id: Uuid,
    pub provider: String,
    pub stemcell_api_version: Option<u32>,
    pub agent_id: String,
    pub time_created: DateTime<Utc>,
}

impl VmRecord {
    pub fn new(init: VmRecordInit, time_created: DateTime<Utc>) -> VmRecord {
        VmRecord {
            cid: init.cid,
            instance_id: init.instance_id,
            provider: init.provider,
            stemcell_api_version: init.stemcell_api_version,
            agent_id: init.agent_id,
            time_created,
        }
    }
}

/// Storage of VM records, keyed by cid
#[async_trait]
pub trait VmStore: Send + Sync {
    /// Creates a record.  Fails with `ObjectAlreadyExists` if a record with
    /// the same cid exists.
    async fn vm_create(&self, init: VmRecordInit) -> CreateResult<VmRecord>;

    async fn vm_fetch_by_cid(&self, cid: &str) -> LookupResult<VmRecord>;

    async fn vm_delete(&self, cid: &str) -> DeleteResult;
}
