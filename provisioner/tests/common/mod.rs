// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared setup for the VM-creation integration tests

use provisioner::config::ConfigLogging;
use provisioner::config::ConfigLoggingLevel;
use provisioner::config::Timeouts;
use provisioner::context::TaskContext;
use provisioner::create_vm::VmCreatorDeps;
use provisioner::instance::InstanceIdentity;
use provisioner::instance::Placement;
use provisioner::instance::VariableSetHandle;
use provisioner::network::DefaultNetwork;
use provisioner::network::NetworkType;
use provisioner::network::Reservation;
use provisioner::provider_factory::CloudConfig;
use provisioner::provider_factory::ProviderRegistry;
use provisioner::vm_delete::ProviderVmDeleter;
use provisioner::vm_delete::VmDeleter;
use provisioner::Config;
use provisioner::CreateVmRequest;
use provisioner::Document;
use provisioner::VmCreator;
use provisioner_test_utils::dev::test_setup_log;
use provisioner_test_utils::dev::LogContext;
use provisioner_test_utils::fakes::FakeAgentBehavior;
use provisioner_test_utils::fakes::FakeAgentRegistry;
use provisioner_test_utils::fakes::FakeProvider;
use provisioner_test_utils::fakes::InMemoryEventLog;
use provisioner_test_utils::fakes::InMemoryVariableStore;
use provisioner_test_utils::fakes::InMemoryVmStore;
use provisioner_test_utils::fakes::RecordingBroadcaster;
use provisioner_test_utils::fakes::RecordingVmDeleter;
use provisioner_test_utils::fakes::StaticCloudConfigStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DIRECTOR: &str = "D";
pub const DEPLOYMENT: &str = "Dep";
pub const INSTANCE_GROUP: &str = "G";
pub const VM_CID: &str = "new-vm-cid";
pub const VARIABLE_SET_ID: u64 = 1;

pub fn test_config() -> Config {
    Config {
        director_name: String::from(DIRECTOR),
        max_vm_create_tries: 3,
        keep_unreachable_vms: false,
        flush_arp: false,
        generate_vm_passwords: false,
        agent_env: Document::new(),
        trusted_certs: None,
        mbus: None,
        legacy_dns: None,
        timeouts: Timeouts {
            provider_call: Duration::from_secs(10),
            persistence: Duration::from_secs(10),
            agent_ready: Duration::from_secs(1),
        },
        log: ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info },
    }
}

/// The collaborators a test wants to customize; everything else defaults
pub struct Fakes {
    pub config: Config,
    pub provider: FakeProvider,
    pub variables: InMemoryVariableStore,
    pub agent_behavior: FakeAgentBehavior,
    pub broadcaster: RecordingBroadcaster,
    pub vm_deleter: RecordingVmDeleter,
    /// Roll back through [`ProviderVmDeleter`] instead of recording the
    /// deletions.
    pub provider_vm_deleter: bool,
    pub events: InMemoryEventLog,
}

impl Default for Fakes {
    fn default() -> Self {
        Fakes {
            config: test_config(),
            provider: FakeProvider::new(VM_CID),
            variables: InMemoryVariableStore::new().with_variable(
                VARIABLE_SET_ID,
                "unused",
                json!("unused"),
            ),
            agent_behavior: FakeAgentBehavior::default(),
            broadcaster: RecordingBroadcaster::new(),
            vm_deleter: RecordingVmDeleter::new(),
            provider_vm_deleter: false,
            events: InMemoryEventLog::new(),
        }
    }
}

pub struct Harness {
    pub logctx: LogContext,
    pub ctx: TaskContext,
    pub creator: VmCreator,
    pub provider: Arc<FakeProvider>,
    pub variables: Arc<InMemoryVariableStore>,
    pub datastore: Arc<InMemoryVmStore>,
    pub agents: Arc<FakeAgentRegistry>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub vm_deleter: Arc<RecordingVmDeleter>,
    pub events: Arc<InMemoryEventLog>,
}

impl Harness {
    pub fn new(test_name: &str, fakes: Fakes) -> Harness {
        let logctx = test_setup_log(test_name);
        let provider = Arc::new(fakes.provider);
        let variables = Arc::new(fakes.variables);
        let datastore = Arc::new(InMemoryVmStore::new());
        let agents = Arc::new(FakeAgentRegistry::new(fakes.agent_behavior));
        let broadcaster = Arc::new(fakes.broadcaster);
        let vm_deleter = Arc::new(fakes.vm_deleter);
        let events = Arc::new(fakes.events);

        let current = CloudConfig {
            azs: BTreeMap::from([(String::from("z1"), String::from("cpi1"))]),
            provider_aliases: BTreeMap::new(),
        };
        let existing = CloudConfig {
            azs: BTreeMap::from([(
                String::from("z1"),
                String::from("old-cpi"),
            )]),
            provider_aliases: BTreeMap::from([(
                String::from("old-cpi"),
                vec![String::from("old-cpi-alias")],
            )]),
        };
        let cloud_configs = Arc::new(
            StaticCloudConfigStore::new(current)
                .with_deployment(DEPLOYMENT, existing),
        );
        let mut providers = ProviderRegistry::new();
        providers.insert("cpi1", provider.clone());
        providers.insert("old-cpi-alias", provider.clone());

        let deleter: Arc<dyn VmDeleter> = if fakes.provider_vm_deleter {
            Arc::new(ProviderVmDeleter::new(&logctx.log, datastore.clone()))
        } else {
            vm_deleter.clone()
        };
        let deps = VmCreatorDeps {
            cloud_configs,
            providers,
            variables: variables.clone(),
            datastore: datastore.clone(),
            agents: agents.clone(),
            broadcaster: broadcaster.clone(),
            vm_deleter: deleter,
            event_log: events.clone(),
        };
        let creator =
            VmCreator::new(&logctx.log, Arc::new(fakes.config), deps);
        let ctx = TaskContext::new(
            &logctx.log,
            String::from("42"),
            String::from("fake-user"),
        );

        Harness {
            logctx,
            ctx,
            creator,
            provider,
            variables,
            datastore,
            agents,
            broadcaster,
            vm_deleter,
            events,
        }
    }
}

pub fn instance() -> InstanceIdentity {
    InstanceIdentity {
        deployment: String::from(DEPLOYMENT),
        instance_group: String::from(INSTANCE_GROUP),
        index: 0,
        id: Uuid::new_v4(),
    }
}

pub fn dynamic_network() -> Reservation {
    Reservation {
        network_name: String::from("name"),
        network_type: NetworkType::Dynamic,
        cloud_properties: Document::new(),
        address: None,
        netmask: None,
        gateway: None,
        dns: vec!["10.0.0.2".parse().unwrap()],
        mac_address: None,
    }
}

pub fn manual_network() -> Reservation {
    Reservation {
        network_name: String::from("a"),
        network_type: NetworkType::Manual,
        cloud_properties: Document::new(),
        address: Some("192.168.1.3".parse().unwrap()),
        netmask: Some("255.255.255.0".parse().unwrap()),
        gateway: Some("192.168.1.1".parse().unwrap()),
        dns: vec![],
        mac_address: None,
    }
}

pub fn request() -> CreateVmRequest {
    CreateVmRequest {
        instance: instance(),
        placement: Placement {
            availability_zone: Some(String::from("z1")),
            stemcell_image_id: String::from("stemcell-id"),
            stemcell_api_version: Some(2),
            cpi_alias: None,
            provider_images: BTreeMap::new(),
        },
        reservations: vec![dynamic_network()],
        default_network: DefaultNetwork::new(),
        cloud_properties: doc(json!({ "instance_type": "m1.small" })),
        env: Document::new(),
        disk_cids: vec![],
        disk_associations: vec![],
        tags: BTreeMap::new(),
        variable_set: VariableSetHandle {
            id: VARIABLE_SET_ID,
            deployment: String::from(DEPLOYMENT),
        },
        use_existing_cloud_config: false,
    }
}

pub fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}
