// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tests for the successful path of VM creation and its side effects

use crate::common::doc;
use crate::common::manual_network;
use crate::common::request;
use crate::common::test_config;
use crate::common::Fakes;
use crate::common::Harness;
use crate::common::DEPLOYMENT;
use crate::common::VARIABLE_SET_ID;
use crate::common::VM_CID;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use provisioner::agent::AgentSettings;
use provisioner::agent::DiskAssociation;
use provisioner::config::MbusConfig;
use provisioner::create_vm::ProvisionError;
use provisioner::create_vm::Stage;
use provisioner::event_log::ACTION_CREATE;
use provisioner::event_log::OBJECT_TYPE_VM;
use provisioner::provider::CallContext;
use provisioner::provider::ProviderError;
use provisioner::provider::ProviderInfo;
use provisioner_common::Error;
use provisioner_test_utils::fakes::FakeProvider;
use provisioner_test_utils::fakes::InMemoryVariableStore;
use provisioner_test_utils::fakes::RecordingBroadcaster;
use serde_json::json;
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeMap;

#[tokio::test]
async fn test_create_vm_end_to_end() {
    let harness = Harness::new("test_create_vm_end_to_end", Fakes::default());
    let request = request();
    let instance = request.instance.clone();

    let record = harness.creator.create(&harness.ctx, request).await.unwrap();

    assert_eq!(record.cid, VM_CID);
    assert_eq!(record.instance_id, instance.id);
    assert_eq!(record.provider, "cpi1");
    assert_eq!(record.stemcell_api_version, Some(2));
    assert_eq!(harness.datastore.records(), vec![record.clone()]);

    let creates = harness.provider.create_calls();
    assert_eq!(creates.len(), 1);
    let (ctx, args) = &creates[0];
    assert_eq!(
        *ctx,
        CallContext { api_version: 2, stemcell_api_version: Some(2) }
    );
    assert_eq!(args.agent_id, record.agent_id);
    assert_eq!(args.stemcell_image_id, "stemcell-id");
    assert_eq!(
        args.cloud_properties,
        doc(json!({ "instance_type": "m1.small" }))
    );
    assert_eq!(
        args.network_settings,
        doc(json!({
            "name": {
                "type": "dynamic",
                "dns": ["10.0.0.2"],
                "cloud_properties": {},
            }
        }))
    );
    assert_eq!(
        args.env,
        doc(json!({
            "bosh": {
                "group": "D-Dep-G",
                "groups": ["D", "Dep", "G", "D-Dep", "Dep-G", "D-Dep-G"],
            }
        }))
    );

    // One agent was looked up, by the agent id the VM was created with.
    let agents = harness.agents.agents();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].instance_name(), instance.name());
    assert!(agents[0].pings() >= 1);
    assert!(agents[0].settings().is_empty());

    let metadata = harness.provider.metadata_calls();
    assert_eq!(metadata.len(), 1);
    let (vm_cid, metadata) = &metadata[0];
    assert_eq!(vm_cid, VM_CID);
    assert_eq!(metadata["group"], "D-Dep-G");
    assert_eq!(metadata["director"], "D");
    assert_eq!(metadata["deployment"], DEPLOYMENT);
    assert_eq!(metadata["name"], instance.name());

    let events = harness.events.events();
    assert_eq!(events.len(), 2);
    let (start_id, start) = &events[0];
    let (_, finish) = &events[1];
    assert_eq!(start.action, ACTION_CREATE);
    assert_eq!(start.object_type, OBJECT_TYPE_VM);
    assert_eq!(start.object_name, None);
    assert_eq!(start.parent_id, None);
    assert_eq!(start.user, "fake-user");
    assert_eq!(start.task_id, "42");
    assert_eq!(start.deployment, DEPLOYMENT);
    assert_eq!(start.instance, instance.name());
    assert_eq!(finish.parent_id, Some(*start_id));
    assert_eq!(finish.object_name.as_deref(), Some(VM_CID));
    assert_eq!(finish.error, None);

    assert!(harness.provider.delete_calls().is_empty());
    assert!(harness.vm_deleter.deleted().is_empty());
    assert!(harness.broadcaster.broadcasts().is_empty());

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_interpolates_every_document() {
    let variables = InMemoryVariableStore::new()
        .with_variable(VARIABLE_SET_ID, "instance_type", json!("m1.large"))
        .with_variable(VARIABLE_SET_ID, "subnet", json!("subnet-1"))
        .with_variable(VARIABLE_SET_ID, "env_block", json!({ "a": [1, 2] }))
        .with_variable(VARIABLE_SET_ID, "/director/pw", json!("hunter2"));
    let harness = Harness::new(
        "test_create_vm_interpolates_every_document",
        Fakes { variables, ..Default::default() },
    );
    let mut request = request();
    request.cloud_properties = doc(json!({
        "instance_type": "((instance_type))",
        "name": "vm-((instance_type))",
    }));
    request.reservations[0].cloud_properties =
        doc(json!({ "subnet": "((subnet))" }));
    request.env = doc(json!({
        "extra": "((env_block))",
        "same": "((instance_type))",
        "bosh": { "password": "((/director/pw))" },
    }));

    harness.creator.create(&harness.ctx, request).await.unwrap();

    let creates = harness.provider.create_calls();
    let (_, args) = &creates[0];
    assert_eq!(
        args.cloud_properties,
        doc(json!({
            "instance_type": "m1.large",
            "name": "vm-m1.large",
        }))
    );
    assert_eq!(
        args.network_settings["name"]["cloud_properties"],
        json!({ "subnet": "subnet-1" })
    );
    assert_eq!(args.env["extra"], json!({ "a": [1, 2] }));
    assert_eq!(args.env["same"], args.cloud_properties["instance_type"]);
    assert_eq!(args.env["bosh"]["password"], json!("hunter2"));

    // Every lookup was made against the request's variable set.
    let lookups = harness.variables.lookups();
    assert!(!lookups.is_empty());
    assert!(lookups.iter().all(|(set_id, _)| *set_id == VARIABLE_SET_ID));

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_unresolved_variable() {
    let harness = Harness::new(
        "test_create_vm_unresolved_variable",
        Fakes::default(),
    );
    let mut request = request();
    request.env = doc(json!({ "a": "((missing_b))", "b": "((missing_a))" }));

    let error =
        harness.creator.create(&harness.ctx, request).await.unwrap_err();

    assert_eq!(error.stage, Stage::Resolving);
    assert_eq!(error.attempts, 0);
    assert_eq!(error.vm_cid, None);
    assert_matches!(
        error.source,
        ProvisionError::Interpolation { document: "environment", .. }
    );
    let message = InlineErrorChain::new(&error).to_string();
    assert!(message.contains("missing_a, missing_b"), "{}", message);

    assert!(harness.provider.calls().is_empty());
    assert!(harness.datastore.records().is_empty());
    let events = harness.events.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].1.error.as_deref(), Some("InterpolationError"));
    assert_eq!(events[1].1.object_name, None);

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_generated_password() {
    let mut config = test_config();
    config.generate_vm_passwords = true;
    let provider = FakeProvider::new(VM_CID).with_create_results(vec![
        Ok(String::from("vm-cid-1")),
        Ok(String::from("vm-cid-2")),
    ]);
    let harness = Harness::new(
        "test_create_vm_generated_password",
        Fakes { config, provider, ..Default::default() },
    );

    harness.creator.create(&harness.ctx, request()).await.unwrap();
    let mut request = request();
    request.env = doc(json!({ "bosh": { "password": "my-secret-password" } }));
    harness.creator.create(&harness.ctx, request).await.unwrap();

    let envs = harness.provider.created_envs();
    let generated = envs[0]["bosh"]["password"].as_str().unwrap();
    assert_eq!(generated.len(), 64);
    assert!(generated.chars().all(|c| c.is_ascii_hexdigit()));
    // The user's password is never replaced.
    assert_eq!(envs[1]["bosh"]["password"], json!("my-secret-password"));

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_no_generated_password() {
    let harness = Harness::new(
        "test_create_vm_no_generated_password",
        Fakes::default(),
    );
    let mut request = request();
    request.env = doc(json!({ "bosh": { "password": null } }));

    harness.creator.create(&harness.ctx, request).await.unwrap();

    let envs = harness.provider.created_envs();
    assert_eq!(envs[0]["bosh"].get("password"), None);

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_mbus_certificate() {
    let mut config = test_config();
    config.mbus = Some(MbusConfig {
        server_ca: String::from("fake-ca"),
        internal_domain: String::from("bosh-internal"),
    });
    let harness = Harness::new(
        "test_create_vm_mbus_certificate",
        Fakes { config, ..Default::default() },
    );

    let record = harness.creator.create(&harness.ctx, request()).await.unwrap();

    let common_name = format!("{}.agent.bosh-internal", record.agent_id);
    let agents = harness.agents.agents();
    assert_eq!(agents[0].certificates(), vec![common_name.clone()]);

    let envs = harness.provider.created_envs();
    assert_eq!(
        envs[0]["bosh"]["mbus"]["cert"],
        json!({
            "ca": "fake-ca",
            "certificate": format!("certificate for {}", common_name),
            "private_key": format!("private key for {}", common_name),
        })
    );

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_flushes_arp() {
    let mut config = test_config();
    config.flush_arp = true;
    let harness = Harness::new(
        "test_create_vm_flushes_arp",
        Fakes { config, ..Default::default() },
    );
    let mut request = request();
    request.reservations.push(manual_network());

    harness.creator.create(&harness.ctx, request).await.unwrap();

    assert_eq!(
        harness.broadcaster.broadcasts(),
        vec![(String::from(VM_CID), vec![String::from("192.168.1.3")])]
    );

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_arp_flush_disabled() {
    let harness = Harness::new(
        "test_create_vm_arp_flush_disabled",
        Fakes::default(),
    );
    let mut request = request();
    request.reservations.push(manual_network());

    harness.creator.create(&harness.ctx, request).await.unwrap();

    assert!(harness.broadcaster.broadcasts().is_empty());

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_arp_flush_failure_is_not_fatal() {
    let mut config = test_config();
    config.flush_arp = true;
    let harness = Harness::new(
        "test_create_vm_arp_flush_failure_is_not_fatal",
        Fakes {
            config,
            broadcaster: RecordingBroadcaster::failing(Error::unavail(
                "message bus is down",
            )),
            ..Default::default()
        },
    );
    let mut request = request();
    request.reservations.push(manual_network());

    let record = harness.creator.create(&harness.ctx, request).await.unwrap();

    assert_eq!(record.cid, VM_CID);
    assert_eq!(harness.broadcaster.broadcasts().len(), 1);

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_metadata_failure_is_not_fatal() {
    for error in [
        ProviderError::cloud_error("tagging is broken"),
        ProviderError::not_implemented("set_vm_metadata"),
    ] {
        let harness = Harness::new(
            "test_create_vm_metadata_failure_is_not_fatal",
            Fakes {
                provider: FakeProvider::new(VM_CID).with_metadata_error(error),
                ..Default::default()
            },
        );

        let record =
            harness.creator.create(&harness.ctx, request()).await.unwrap();

        assert_eq!(record.cid, VM_CID);
        assert_eq!(harness.provider.metadata_calls().len(), 1);
        assert!(harness.vm_deleter.deleted().is_empty());
        assert_eq!(harness.events.events()[1].1.error, None);

        harness.logctx.cleanup_successful();
    }
}

#[tokio::test]
async fn test_create_vm_unknown_availability_zone() {
    let harness = Harness::new(
        "test_create_vm_unknown_availability_zone",
        Fakes::default(),
    );
    let mut request = request();
    request.placement.availability_zone = Some(String::from("z9"));

    let error =
        harness.creator.create(&harness.ctx, request).await.unwrap_err();

    assert_eq!(error.stage, Stage::Resolving);
    assert_eq!(error.attempts, 0);
    assert_matches!(
        error.source,
        ProvisionError::Configuration(Error::ObjectNotFound { .. })
    );
    assert!(harness.provider.calls().is_empty());
    assert!(harness.agents.agents().is_empty());
    assert_eq!(
        harness.events.events()[1].1.error.as_deref(),
        Some("ConfigurationError")
    );

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_invalid_reservation() {
    let harness = Harness::new(
        "test_create_vm_invalid_reservation",
        Fakes::default(),
    );
    let mut request = request();
    let mut manual = manual_network();
    manual.address = None;
    request.reservations.push(manual);

    let error =
        harness.creator.create(&harness.ctx, request).await.unwrap_err();

    assert_eq!(error.stage, Stage::Resolving);
    assert_matches!(
        error.source,
        ProvisionError::Configuration(Error::InvalidValue { .. })
    );
    assert!(harness.provider.create_calls().is_empty());

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_existing_cloud_config() {
    let harness = Harness::new(
        "test_create_vm_existing_cloud_config",
        Fakes::default(),
    );
    let mut request = request();
    request.use_existing_cloud_config = true;
    request.placement.provider_images = BTreeMap::from([(
        String::from("old-cpi-alias"),
        String::from("old-stemcell-id"),
    )]);

    let record = harness.creator.create(&harness.ctx, request).await.unwrap();

    assert_eq!(record.provider, "old-cpi");
    let creates = harness.provider.create_calls();
    assert_eq!(creates[0].1.stemcell_image_id, "old-stemcell-id");

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_provider_without_info() {
    let provider = FakeProvider::new(VM_CID)
        .with_info(Err(ProviderError::not_implemented("info")));
    let harness = Harness::new(
        "test_create_vm_provider_without_info",
        Fakes { provider, ..Default::default() },
    );

    harness.creator.create(&harness.ctx, request()).await.unwrap();

    // A driver that cannot describe itself only speaks version 1.
    let creates = harness.provider.create_calls();
    assert_eq!(
        creates[0].0,
        CallContext { api_version: 1, stemcell_api_version: Some(2) }
    );

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_provider_requests_older_api() {
    let provider = FakeProvider::new(VM_CID)
        .with_info(Ok(ProviderInfo {
            api_version: 2,
            stemcell_formats: vec![String::from("openstack-raw")],
        }))
        .with_requested_api_version(1);
    let harness = Harness::new(
        "test_create_vm_provider_requests_older_api",
        Fakes { provider, ..Default::default() },
    );
    harness.datastore.fail_creates_with(Error::unavail("database is down"));

    harness.creator.create(&harness.ctx, request()).await.unwrap_err();

    // The negotiated version sticks for the compensating delete too.
    let expected =
        CallContext { api_version: 1, stemcell_api_version: Some(2) };
    assert_eq!(harness.provider.create_calls()[0].0, expected);
    assert_eq!(
        harness.provider.delete_calls(),
        vec![(expected, String::from(VM_CID))]
    );

    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_create_vm_pushes_agent_settings() {
    let mut config = test_config();
    config.trusted_certs = Some(String::from("fake-trusted-certs"));
    let harness = Harness::new(
        "test_create_vm_pushes_agent_settings",
        Fakes { config, ..Default::default() },
    );
    let associations = vec![DiskAssociation {
        name: String::from("pd"),
        disk_cid: String::from("disk-cid-1"),
    }];
    let mut request = request();
    request.disk_cids = vec![String::from("disk-cid-1")];
    request.disk_associations = associations.clone();

    harness.creator.create(&harness.ctx, request).await.unwrap();

    let creates = harness.provider.create_calls();
    assert_eq!(creates[0].1.disk_cids, vec![String::from("disk-cid-1")]);
    let agents = harness.agents.agents();
    assert_eq!(
        agents[0].settings(),
        vec![AgentSettings {
            trusted_certs: Some(String::from("fake-trusted-certs")),
            disk_associations: associations,
        }]
    );

    harness.logctx.cleanup_successful();
}
