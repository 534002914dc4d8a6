// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fake agents, agent fleet, and VM deleter

use async_trait::async_trait;
use provisioner::agent::AgentBroadcaster;
use provisioner::agent::AgentError;
use provisioner::agent::AgentHandle;
use provisioner::agent::AgentRegistry;
use provisioner::agent::AgentSettings;
use provisioner::agent::ClientCertificate;
use provisioner::datastore::VmRecord;
use provisioner::provider::ProviderHandle;
use provisioner::vm_delete::VmDeleter;
use provisioner_common::Error;
use std::sync::Arc;
use std::sync::Mutex;

/// How every agent handed out by a [`FakeAgentRegistry`] behaves
#[derive(Clone, Debug, Default)]
pub struct FakeAgentBehavior {
    /// Returned by every ping; `None` means the agent is ready.
    pub ping_error: Option<AgentError>,
    pub update_settings_error: Option<AgentError>,
}

pub struct FakeAgent {
    agent_id: String,
    instance_name: String,
    behavior: FakeAgentBehavior,
    pings: Mutex<usize>,
    settings: Mutex<Vec<AgentSettings>>,
    certificates: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn pings(&self) -> usize {
        *self.pings.lock().unwrap()
    }

    /// Settings pushed to this agent, in order.
    pub fn settings(&self) -> Vec<AgentSettings> {
        self.settings.lock().unwrap().clone()
    }

    /// Common names of the certificates issued for this agent.
    pub fn certificates(&self) -> Vec<String> {
        self.certificates.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentHandle for FakeAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn ping(&self) -> Result<(), AgentError> {
        *self.pings.lock().unwrap() += 1;
        match &self.behavior.ping_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn update_settings(
        &self,
        settings: &AgentSettings,
    ) -> Result<(), AgentError> {
        self.settings.lock().unwrap().push(settings.clone());
        match &self.behavior.update_settings_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn provision_client_certificate(
        &self,
        common_name: &str,
    ) -> Result<ClientCertificate, AgentError> {
        self.certificates.lock().unwrap().push(common_name.to_owned());
        Ok(ClientCertificate {
            certificate: format!("certificate for {}", common_name),
            private_key: format!("private key for {}", common_name),
        })
    }
}

/// Hands out a new [`FakeAgent`] for every lookup and remembers it
#[derive(Default)]
pub struct FakeAgentRegistry {
    behavior: FakeAgentBehavior,
    agents: Mutex<Vec<Arc<FakeAgent>>>,
}

impl FakeAgentRegistry {
    pub fn new(behavior: FakeAgentBehavior) -> Self {
        FakeAgentRegistry { behavior, agents: Mutex::new(Vec::new()) }
    }

    pub fn agents(&self) -> Vec<Arc<FakeAgent>> {
        self.agents.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRegistry for FakeAgentRegistry {
    async fn agent(
        &self,
        agent_id: &str,
        instance_name: &str,
    ) -> Result<Arc<dyn AgentHandle>, Error> {
        let agent = Arc::new(FakeAgent {
            agent_id: agent_id.to_owned(),
            instance_name: instance_name.to_owned(),
            behavior: self.behavior.clone(),
            pings: Mutex::new(0),
            settings: Mutex::new(Vec::new()),
            certificates: Mutex::new(Vec::new()),
        });
        self.agents.lock().unwrap().push(agent.clone());
        Ok(agent)
    }
}

/// Records ARP flush broadcasts
#[derive(Default)]
pub struct RecordingBroadcaster {
    error: Option<Error>,
    broadcasts: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        RecordingBroadcaster::default()
    }

    pub fn failing(error: Error) -> Self {
        RecordingBroadcaster { error: Some(error), ..Default::default() }
    }

    /// `(vm cid, addresses)` of every broadcast, in order.
    pub fn broadcasts(&self) -> Vec<(String, Vec<String>)> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentBroadcaster for RecordingBroadcaster {
    async fn delete_arp_entries(
        &self,
        vm_cid: &str,
        addresses: &[String],
    ) -> Result<(), Error> {
        self.broadcasts
            .lock()
            .unwrap()
            .push((vm_cid.to_owned(), addresses.to_vec()));
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Records full VM deletions without performing them
#[derive(Default)]
pub struct RecordingVmDeleter {
    error: Option<Error>,
    deleted: Mutex<Vec<(String, String)>>,
}

impl RecordingVmDeleter {
    pub fn new() -> Self {
        RecordingVmDeleter::default()
    }

    pub fn failing(error: Error) -> Self {
        RecordingVmDeleter { error: Some(error), ..Default::default() }
    }

    /// `(provider name, vm cid)` of every deletion, in order.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl VmDeleter for RecordingVmDeleter {
    async fn delete_vm(
        &self,
        provider: &ProviderHandle,
        record: &VmRecord,
    ) -> Result<(), Error> {
        self.deleted
            .lock()
            .unwrap()
            .push((provider.name().to_owned(), record.cid.clone()));
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
