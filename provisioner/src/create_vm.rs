// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creation of a single VM
//!
//! [`VmCreator::create`] drives one instance's VM through these stages:
//!
//! 1. **Resolving**: select the provider, build network settings and the
//!    environment, and interpolate variables into all of them.  Nothing has
//!    been created yet, so any failure simply ends the run.
//! 2. **Creating**: call the provider, retrying failures that the provider
//!    marks retryable up to `max_vm_create_tries` times in total.  Every
//!    attempt gets its own copy of the payloads.
//! 3. **Created**: record the VM.  If the record cannot be written, the VM
//!    is deleted at the provider again before the failure is returned.
//! 4. **Applying**: wait for the agent and push its settings.  On failure the
//!    VM is fully deleted unless `keep_unreachable_vms` is set.
//! 5. **Tagging**: set the VM's metadata and, if configured, ask the agent
//!    fleet to forget stale ARP entries for its addresses.  Failures here
//!    are logged only.
//!
//! A start audit event is written before the first stage and exactly one
//! terminal audit event when the run ends.

use crate::agent::AgentBroadcaster;
use crate::agent::AgentError;
use crate::agent::AgentHandle;
use crate::agent::AgentRegistry;
use crate::agent::AgentSettings;
use crate::agent::DiskAssociation;
use crate::config::Config;
use crate::context::TaskContext;
use crate::datastore::VmRecord;
use crate::datastore::VmRecordInit;
use crate::datastore::VmStore;
use crate::env::EnvironmentBuilder;
use crate::env::MbusCertBlock;
use crate::event_log::EventLog;
use crate::event_log::EventRecorder;
use crate::instance::InstanceIdentity;
use crate::instance::Placement;
use crate::instance::VariableSetHandle;
use crate::interpolate::InterpolationError;
use crate::interpolate::SecretInterpolator;
use crate::interpolate::VariableStore;
use crate::metadata::vm_metadata;
use crate::network::static_addresses;
use crate::network::DefaultNetwork;
use crate::network::NetworkSettingsResolver;
use crate::network::Reservation;
use crate::provider::CreateVmArgs;
use crate::provider::ProviderError;
use crate::provider::ProviderErrorKind;
use crate::provider::ProviderHandle;
use crate::provider_factory::CloudConfigStore;
use crate::provider_factory::ProviderFactory;
use crate::provider_factory::ProviderRegistry;
use crate::vm_delete::VmDeleter;
use crate::Document;
use chrono::Utc;
use provisioner_common::Error;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Stages of VM creation, in order
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum Stage {
    Start,
    Resolving,
    Creating,
    Created,
    Applying,
    Tagging,
    Done,
}

/// Why VM creation failed
#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum ProvisionError {
    #[error("invalid configuration")]
    Configuration(#[source] Error),
    #[error("interpolating variables into {document}")]
    Interpolation {
        document: &'static str,
        #[source]
        err: InterpolationError,
    },
    #[error("provider failed to create VM")]
    ProviderCreation(#[source] ProviderError),
    #[error("recording VM {vm_cid}")]
    Persistence {
        vm_cid: String,
        #[source]
        err: Error,
    },
    #[error("agent did not become ready")]
    Agent(#[source] AgentError),
    #[error("writing audit event")]
    EventLog(#[source] Error),
}

impl ProvisionError {
    /// Stable label recorded in audit events in place of the message
    ///
    /// Provider and agent failures carry their own closed set of kinds, and
    /// the label is that kind (`VmCreationFailed`, `Timeout`,
    /// `AgentTimeout`).  Every other category is labelled by its own name
    /// (`PersistenceError`, `ConfigurationError`).
    pub fn label(&self) -> String {
        match self {
            ProvisionError::Configuration(_) => {
                String::from("ConfigurationError")
            }
            ProvisionError::Interpolation { .. } => {
                String::from("InterpolationError")
            }
            ProvisionError::ProviderCreation(error) => error.label(),
            ProvisionError::Persistence { .. } => {
                String::from("PersistenceError")
            }
            ProvisionError::Agent(error) => error.label().to_owned(),
            ProvisionError::EventLog(_) => String::from("EventLogError"),
        }
    }
}

/// Error returned by [`VmCreator::create`]
///
/// Carries enough context for the caller to decide whether to carry on with
/// other instances: how far the run got, how many create calls were made,
/// and the cid of the VM if one was created.
#[derive(Debug, thiserror::Error, SlogInlineError)]
#[error(
    "creating VM for {instance} failed during {stage} after {attempts} \
     create attempt(s)"
)]
pub struct CreateVmError {
    pub instance: String,
    pub stage: Stage,
    pub attempts: u32,
    pub vm_cid: Option<String>,
    #[source]
    pub source: ProvisionError,
}

/// Everything needed to create one instance's VM
#[derive(Clone, Debug)]
pub struct CreateVmRequest {
    pub instance: InstanceIdentity,
    pub placement: Placement,
    pub reservations: Vec<Reservation>,
    pub default_network: DefaultNetwork,
    pub cloud_properties: Document,
    pub env: Document,
    pub disk_cids: Vec<String>,
    pub disk_associations: Vec<DiskAssociation>,
    pub tags: BTreeMap<String, String>,
    /// Variable set every document of this VM is interpolated against.
    pub variable_set: VariableSetHandle,
    /// Select the provider using the cloud config the deployment was last
    /// deployed with, instead of the current one.
    pub use_existing_cloud_config: bool,
}

/// External collaborators of [`VmCreator`]
pub struct VmCreatorDeps {
    pub cloud_configs: Arc<dyn CloudConfigStore>,
    pub providers: ProviderRegistry,
    pub variables: Arc<dyn VariableStore>,
    pub datastore: Arc<dyn VmStore>,
    pub agents: Arc<dyn AgentRegistry>,
    pub broadcaster: Arc<dyn AgentBroadcaster>,
    pub vm_deleter: Arc<dyn VmDeleter>,
    pub event_log: Arc<dyn EventLog>,
}

/// How far one run has gotten
struct Progress {
    stage: Stage,
    attempts: u32,
    vm_cid: Option<String>,
}

pub struct VmCreator {
    config: Arc<Config>,
    providers: ProviderFactory,
    networks: NetworkSettingsResolver,
    interpolator: SecretInterpolator,
    environments: EnvironmentBuilder,
    datastore: Arc<dyn VmStore>,
    agents: Arc<dyn AgentRegistry>,
    broadcaster: Arc<dyn AgentBroadcaster>,
    vm_deleter: Arc<dyn VmDeleter>,
    events: EventRecorder,
}

impl VmCreator {
    pub fn new(
        log: &Logger,
        config: Arc<Config>,
        deps: VmCreatorDeps,
    ) -> VmCreator {
        let log = log.new(o!("component" => "VmCreator"));
        VmCreator {
            providers: ProviderFactory::new(
                &log,
                deps.cloud_configs,
                deps.providers,
            ),
            networks: NetworkSettingsResolver::new(config.legacy_dns.clone()),
            interpolator: SecretInterpolator::new(&log, deps.variables),
            environments: EnvironmentBuilder::new(&config),
            datastore: deps.datastore,
            agents: deps.agents,
            broadcaster: deps.broadcaster,
            vm_deleter: deps.vm_deleter,
            events: EventRecorder::new(&log, deps.event_log),
            config,
        }
    }

    /// Creates a VM for `request.instance` and returns its record
    pub async fn create(
        &self,
        ctx: &TaskContext,
        request: CreateVmRequest,
    ) -> Result<VmRecord, CreateVmError> {
        let instance = &request.instance;
        let agent_id = Uuid::new_v4().to_string();
        let log = ctx.log.new(o!(
            "instance_id" => instance.id.to_string(),
            "deployment" => instance.deployment.clone(),
            "instance_group" => instance.instance_group.clone(),
            "agent_id" => agent_id.clone(),
        ));
        let mut progress =
            Progress { stage: Stage::Start, attempts: 0, vm_cid: None };

        let started = self.events.vm_create_started(ctx, instance).await;
        let started = match started {
            Ok(started) => started,
            Err(error) => {
                return Err(self.failed(
                    &log,
                    instance,
                    progress,
                    ProvisionError::EventLog(error),
                ));
            }
        };

        let result = self.run(&log, &agent_id, &request, &mut progress).await;
        match result {
            Ok(record) => {
                self.events
                    .vm_create_finished(ctx, &started, Some(&record.cid), None)
                    .await;
                info!(log, "created VM";
                    "vm_cid" => &record.cid,
                    "attempts" => progress.attempts,
                );
                Ok(record)
            }
            Err(error) => {
                let label = error.label();
                self.events
                    .vm_create_finished(
                        ctx,
                        &started,
                        progress.vm_cid.as_deref(),
                        Some(&label),
                    )
                    .await;
                Err(self.failed(&log, instance, progress, error))
            }
        }
    }

    fn failed(
        &self,
        log: &Logger,
        instance: &InstanceIdentity,
        progress: Progress,
        source: ProvisionError,
    ) -> CreateVmError {
        let error = CreateVmError {
            instance: instance.name(),
            stage: progress.stage,
            attempts: progress.attempts,
            vm_cid: progress.vm_cid,
            source,
        };
        warn!(log, "failed to create VM"; &error);
        error
    }

    async fn run(
        &self,
        log: &Logger,
        agent_id: &str,
        request: &CreateVmRequest,
        progress: &mut Progress,
    ) -> Result<VmRecord, ProvisionError> {
        let instance = &request.instance;

        progress.stage = Stage::Resolving;
        let resolved = self
            .providers
            .resolve(
                &request.placement,
                &instance.deployment,
                request.use_existing_cloud_config,
            )
            .await
            .map_err(ProvisionError::Configuration)?;
        let provider = resolved.handle;
        let log = log.new(o!("provider" => provider.name().to_owned()));

        let agent = self
            .agents
            .agent(agent_id, &instance.name())
            .await
            .map_err(|err| {
                ProvisionError::Agent(AgentError::Internal {
                    agent_id: agent_id.to_owned(),
                    err,
                })
            })?;

        let network_settings = self
            .networks
            .build(&request.reservations, instance, &request.default_network)
            .map_err(ProvisionError::Configuration)?;
        let network_settings = self
            .interpolate("network settings", &network_settings, request)
            .await?;
        let cloud_properties = self
            .interpolate("cloud properties", &request.cloud_properties, request)
            .await?;
        let user_env =
            self.interpolate("environment", &request.env, request).await?;
        let mbus_cert = self.mbus_cert(agent.as_ref(), agent_id).await?;
        let env = self
            .environments
            .build(&user_env, instance, mbus_cert.as_ref())
            .map_err(ProvisionError::Configuration)?;

        let create_args = CreateVmArgs {
            agent_id: agent_id.to_owned(),
            stemcell_image_id: resolved.image_id,
            cloud_properties,
            network_settings,
            disk_cids: request.disk_cids.clone(),
            env,
        };

        progress.stage = Stage::Creating;
        let vm_cid =
            self.create_with_retries(&log, &provider, &create_args, progress)
                .await?;
        progress.vm_cid = Some(vm_cid.clone());
        let log = log.new(o!("vm_cid" => vm_cid.clone()));

        progress.stage = Stage::Created;
        let record = self
            .record_vm(&log, &provider, &vm_cid, agent_id, request)
            .await?;

        progress.stage = Stage::Applying;
        if let Err(error) = self.apply(agent.as_ref(), request).await {
            warn!(log, "agent failed"; InlineErrorChain::new(&error));
            if self.config.keep_unreachable_vms {
                info!(log, "keeping unreachable VM for investigation");
            } else if let Err(delete_error) =
                self.vm_deleter.delete_vm(&provider, &record).await
            {
                warn!(log, "failed to delete VM with unreachable agent";
                    InlineErrorChain::new(&delete_error),
                );
            }
            return Err(ProvisionError::Agent(error));
        }

        progress.stage = Stage::Tagging;
        self.tag(&log, &provider, &vm_cid, request).await;
        self.flush_arp(&log, &vm_cid, &create_args.network_settings).await;

        progress.stage = Stage::Done;
        Ok(record)
    }

    async fn interpolate(
        &self,
        document_name: &'static str,
        document: &Document,
        request: &CreateVmRequest,
    ) -> Result<Document, ProvisionError> {
        self.interpolator
            .interpolate_with_versioning(document, &request.variable_set)
            .await
            .map_err(|err| ProvisionError::Interpolation {
                document: document_name,
                err,
            })
    }

    async fn mbus_cert(
        &self,
        agent: &dyn AgentHandle,
        agent_id: &str,
    ) -> Result<Option<MbusCertBlock>, ProvisionError> {
        let Some(mbus) = &self.config.mbus else {
            return Ok(None);
        };
        let common_name =
            format!("{}.agent.{}", agent_id, mbus.internal_domain);
        let cert = agent
            .provision_client_certificate(&common_name)
            .await
            .map_err(ProvisionError::Agent)?;
        Ok(Some(MbusCertBlock {
            ca: mbus.server_ca.clone(),
            certificate: cert.certificate,
            private_key: cert.private_key,
        }))
    }

    async fn create_with_retries(
        &self,
        log: &Logger,
        provider: &ProviderHandle,
        create_args: &CreateVmArgs,
        progress: &mut Progress,
    ) -> Result<String, ProvisionError> {
        let max_tries = self.config.max_vm_create_tries;
        let timeout = self.config.timeouts.provider_call;
        loop {
            progress.attempts += 1;
            let attempt = progress.attempts;
            debug!(log, "creating VM"; "attempt" => attempt);

            // Each attempt gets a fresh copy of every payload.
            let attempt_args = create_args.clone();
            let result =
                tokio::time::timeout(timeout, provider.create_vm(attempt_args))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ProviderError::timeout("create_vm", timeout))
                    });

            let error = match result {
                Ok(vm_cid) => return Ok(vm_cid),
                Err(error) => error,
            };

            if let Some(vm_cid) = &error.vm_cid {
                info!(log, "deleting VM left behind by failed create";
                    "vm_cid" => vm_cid,
                );
                if let Err(delete_error) = provider.delete_vm(vm_cid).await {
                    warn!(log, "failed to delete VM left behind";
                        "vm_cid" => vm_cid,
                        InlineErrorChain::new(&delete_error),
                    );
                }
            }

            let will_retry = error.retryable && attempt < max_tries;
            warn!(log, "provider failed to create VM";
                "attempt" => attempt,
                "max_tries" => max_tries,
                "retryable" => error.retryable,
                "will_retry" => will_retry,
                InlineErrorChain::new(&error),
            );
            if !will_retry {
                return Err(ProvisionError::ProviderCreation(error));
            }
        }
    }

    async fn record_vm(
        &self,
        log: &Logger,
        provider: &ProviderHandle,
        vm_cid: &str,
        agent_id: &str,
        request: &CreateVmRequest,
    ) -> Result<VmRecord, ProvisionError> {
        let init = VmRecordInit {
            cid: vm_cid.to_owned(),
            instance_id: request.instance.id,
            provider: provider.name().to_owned(),
            stemcell_api_version: request.placement.stemcell_api_version,
            agent_id: agent_id.to_owned(),
        };
        let timeout = self.config.timeouts.persistence;
        let result =
            tokio::time::timeout(timeout, self.datastore.vm_create(init))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::unavail(&format!(
                        "writing VM record did not complete within {:?}",
                        timeout
                    )))
                });

        match result {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(log, "failed to record VM, deleting it";
                    InlineErrorChain::new(&err),
                );
                if let Err(delete_error) = provider.delete_vm(vm_cid).await {
                    warn!(log, "failed to delete unrecorded VM";
                        InlineErrorChain::new(&delete_error),
                    );
                }
                Err(ProvisionError::Persistence {
                    vm_cid: vm_cid.to_owned(),
                    err,
                })
            }
        }
    }

    async fn apply(
        &self,
        agent: &dyn AgentHandle,
        request: &CreateVmRequest,
    ) -> Result<(), AgentError> {
        let timeout = self.config.timeouts.agent_ready;
        tokio::time::timeout(timeout, agent.wait_until_ready(timeout))
            .await
            .unwrap_or_else(|_| {
                Err(AgentError::Timeout {
                    agent_id: agent.agent_id().to_owned(),
                    timeout,
                })
            })?;

        let settings = AgentSettings {
            trusted_certs: self.config.trusted_certs.clone(),
            disk_associations: request.disk_associations.clone(),
        };
        if !settings.is_empty() {
            agent.update_settings(&settings).await?;
        }
        Ok(())
    }

    async fn tag(
        &self,
        log: &Logger,
        provider: &ProviderHandle,
        vm_cid: &str,
        request: &CreateVmRequest,
    ) {
        let metadata = vm_metadata(
            &self.config.director_name,
            &request.instance,
            Utc::now(),
            &request.tags,
        );
        match provider.set_vm_metadata(vm_cid, &metadata).await {
            Ok(()) => (),
            Err(error) if error.kind == ProviderErrorKind::NotImplemented => {
                debug!(log, "provider does not support VM metadata");
            }
            Err(error) => {
                warn!(log, "failed to set VM metadata";
                    InlineErrorChain::new(&error),
                );
            }
        }
    }

    async fn flush_arp(
        &self,
        log: &Logger,
        vm_cid: &str,
        network_settings: &Document,
    ) {
        if !self.config.flush_arp {
            return;
        }
        let addresses = static_addresses(network_settings);
        if addresses.is_empty() {
            return;
        }
        if let Err(error) =
            self.broadcaster.delete_arp_entries(vm_cid, &addresses).await
        {
            warn!(log, "failed to broadcast ARP entry deletion";
                "addresses" => ?addresses,
                InlineErrorChain::new(&error),
            );
        }
    }
}
