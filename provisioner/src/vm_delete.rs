// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Full deletion of a created VM

use crate::datastore::VmRecord;
use crate::datastore::VmStore;
use crate::provider::ProviderErrorKind;
use crate::provider::ProviderHandle;
use async_trait::async_trait;
use provisioner_common::Error;
use provisioner_common::ResourceType;
use slog::info;
use slog::o;
use slog::Logger;
use std::sync::Arc;

/// Deletes a VM and everything recorded about it
#[async_trait]
pub trait VmDeleter: Send + Sync {
    async fn delete_vm(
        &self,
        provider: &ProviderHandle,
        record: &VmRecord,
    ) -> Result<(), Error>;
}

/// Deletes the VM at its provider, then removes its record
///
/// A VM the provider no longer knows about counts as deleted, so a deletion
/// interrupted after the provider call can be repeated.
pub struct ProviderVmDeleter {
    log: Logger,
    datastore: Arc<dyn VmStore>,
}

impl ProviderVmDeleter {
    pub fn new(log: &Logger, datastore: Arc<dyn VmStore>) -> Self {
        ProviderVmDeleter {
            log: log.new(o!("component" => "ProviderVmDeleter")),
            datastore,
        }
    }
}

#[async_trait]
impl VmDeleter for ProviderVmDeleter {
    async fn delete_vm(
        &self,
        provider: &ProviderHandle,
        record: &VmRecord,
    ) -> Result<(), Error> {
        let log = self.log.new(o!(
            "vm_cid" => record.cid.clone(),
            "provider" => provider.name().to_owned(),
        ));
        match provider.delete_vm(&record.cid).await {
            Ok(()) => info!(log, "deleted VM"),
            Err(error) if error.kind == ProviderErrorKind::VmNotFound => {
                info!(log, "VM already gone from provider");
            }
            Err(error) => {
                return Err(Error::internal_error(&format!(
                    "deleting VM {} at provider {}: {}",
                    record.cid,
                    provider.name(),
                    error,
                )));
            }
        }

        match self.datastore.vm_delete(&record.cid).await {
            Ok(())
            | Err(Error::ObjectNotFound {
                type_name: ResourceType::Vm, ..
            }) => Ok(()),
            Err(error) => Err(error.internal_context(format!(
                "removing record of deleted VM {}",
                record.cid
            ))),
        }
    }
}
