// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to in-guest agents
//!
//! Each VM runs an agent that the orchestrator talks to over a management
//! channel.  The transport is not this crate's concern: an [`AgentRegistry`]
//! hands out one [`AgentHandle`] per agent, and the orchestrator only ever
//! uses that handle's operations.

use async_trait::async_trait;
use provisioner_common::backoff;
use provisioner_common::backoff::BackoffError;
use provisioner_common::Error;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum AgentError {
    #[error("agent {agent_id} is unreachable: {message}")]
    Unreachable { agent_id: String, message: String },
    #[error("agent {agent_id} did not become ready within {timeout:?}")]
    Timeout { agent_id: String, timeout: Duration },
    #[error("agent {agent_id} rejected {operation}: {message}")]
    Rejected { agent_id: String, operation: String, message: String },
    #[error("agent {agent_id}")]
    Internal {
        agent_id: String,
        #[source]
        err: Error,
    },
}

impl AgentError {
    pub fn label(&self) -> &'static str {
        match self {
            AgentError::Unreachable { .. } => "AgentUnreachable",
            AgentError::Timeout { .. } => "AgentTimeout",
            AgentError::Rejected { .. } => "AgentRejected",
            AgentError::Internal { .. } => "AgentInternal",
        }
    }
}

/// A client certificate issued for one agent's management channel
#[derive(Clone, Debug, PartialEq)]
pub struct ClientCertificate {
    pub certificate: String,
    pub private_key: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DiskAssociation {
    pub name: String,
    pub disk_cid: String,
}

/// Settings pushed to an agent once it is ready
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AgentSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_certs: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disk_associations: Vec<DiskAssociation>,
}

impl AgentSettings {
    pub fn is_empty(&self) -> bool {
        self.trusted_certs.as_deref().map_or(true, str::is_empty)
            && self.disk_associations.is_empty()
    }
}

/// Management channel to a single agent
///
/// Implementations make exactly one attempt per call.  The only polling is
/// the readiness wait, which is bounded by the timeout it is given.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    fn agent_id(&self) -> &str;

    /// Checks once whether the agent answers.
    async fn ping(&self) -> Result<(), AgentError>;

    /// Waits until the agent answers, giving up after `timeout`
    ///
    /// `Unreachable` answers are polled through; any other failure ends the
    /// wait immediately.
    async fn wait_until_ready(
        &self,
        timeout: Duration,
    ) -> Result<(), AgentError> {
        let agent = self;
        let policy = backoff::agent_poll_policy(timeout);
        let poll = backoff::retry(policy, move || async move {
            agent.ping().await.map_err(|error| match error {
                AgentError::Unreachable { .. } => {
                    BackoffError::transient(error)
                }
                error => BackoffError::permanent(error),
            })
        });

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(AgentError::Unreachable { .. })) | Err(_) => {
                Err(AgentError::Timeout {
                    agent_id: self.agent_id().to_owned(),
                    timeout,
                })
            }
            Ok(Err(error)) => Err(error),
        }
    }

    async fn update_settings(
        &self,
        settings: &AgentSettings,
    ) -> Result<(), AgentError>;

    /// Issues a client certificate for this agent with the given common
    /// name.
    async fn provision_client_certificate(
        &self,
        common_name: &str,
    ) -> Result<ClientCertificate, AgentError>;
}

/// Resolves agent handles by agent id
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn agent(
        &self,
        agent_id: &str,
        instance_name: &str,
    ) -> Result<Arc<dyn AgentHandle>, Error>;
}

/// Notifications sent to every running agent
#[async_trait]
pub trait AgentBroadcaster: Send + Sync {
    /// Asks all agents to drop ARP cache entries for `addresses`, which now
    /// belong to the VM `vm_cid`.
    async fn delete_arp_entries(
        &self,
        vm_cid: &str,
        addresses: &[String],
    ) -> Result<(), Error>;
}
