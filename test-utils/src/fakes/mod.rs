// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory implementations of the VM-creation core's collaborators

mod agent;
mod event_log;
mod provider;
mod stores;

pub use agent::FakeAgent;
pub use agent::FakeAgentBehavior;
pub use agent::FakeAgentRegistry;
pub use agent::RecordingBroadcaster;
pub use agent::RecordingVmDeleter;
pub use event_log::InMemoryEventLog;
pub use provider::FakeProvider;
pub use provider::ProviderCall;
pub use stores::InMemoryVariableStore;
pub use stores::InMemoryVmStore;
pub use stores::StaticCloudConfigStore;
