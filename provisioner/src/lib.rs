// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VM-creation core of the deployment orchestrator
//!
//! Given a desired instance, [`create_vm::VmCreator`] selects the provider
//! for the instance's placement, resolves its network settings and
//! environment (interpolating secrets against a fixed variable set), asks
//! the provider to create the VM, records the VM, waits for the in-guest
//! agent, and tags the VM with its identity.  Failures after the provider
//! has created a VM are compensated by deleting it again.
//!
//! Everything the core talks to (providers, the datastore, the variable
//! store, the agent fleet, the event log) is reached through the traits in
//! this crate so that the excluded rollout driver can plug in real
//! implementations and the test suite can plug in fakes.

pub mod agent;
pub mod config;
pub mod context;
pub mod create_vm;
pub mod datastore;
pub mod env;
pub mod event_log;
pub mod instance;
pub mod interpolate;
pub mod metadata;
pub mod network;
pub mod provider;
pub mod provider_factory;
pub mod vm_delete;

pub use config::Config;
pub use create_vm::CreateVmError;
pub use create_vm::CreateVmRequest;
pub use create_vm::VmCreator;

/// A JSON object: cloud properties, network settings, and environments are
/// all passed to providers in this form.
pub type Document = serde_json::Map<String, serde_json::Value>;
