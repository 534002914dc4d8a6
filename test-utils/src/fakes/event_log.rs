// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use provisioner::event_log::AuditEventInit;
use provisioner::event_log::EventLog;
use provisioner_common::CreateResult;
use provisioner_common::Error;
use std::sync::Mutex;

/// Event log held in memory
///
/// Event ids are assigned sequentially from 1.
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<(u64, AuditEventInit)>>,
    /// Number of writes that succeed before every further write fails.
    fail_after: Option<usize>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        InMemoryEventLog::default()
    }

    pub fn failing_after(writes: usize) -> Self {
        InMemoryEventLog { fail_after: Some(writes), ..Default::default() }
    }

    pub fn events(&self) -> Vec<(u64, AuditEventInit)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn event_create(&self, event: AuditEventInit) -> CreateResult<u64> {
        let mut events = self.events.lock().unwrap();
        if self.fail_after.is_some_and(|n| events.len() >= n) {
            return Err(Error::unavail("event log unavailable"));
        }
        let id = events.len() as u64 + 1;
        events.push((id, event));
        Ok(id)
    }
}
