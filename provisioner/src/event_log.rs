// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Audit trail of VM creation

use crate::context::TaskContext;
use crate::instance::InstanceIdentity;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use provisioner_common::CreateResult;
use serde::Deserialize;
use serde::Serialize;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::sync::Arc;

pub const ACTION_CREATE: &str = "create";
pub const OBJECT_TYPE_VM: &str = "vm";

/// An audit event to be appended to the event log
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuditEventInit {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub object_type: String,
    pub object_name: Option<String>,
    pub user: String,
    pub task_id: String,
    pub deployment: String,
    pub instance: String,
    /// Id of the event that this one completes
    pub parent_id: Option<u64>,
    /// Stable label of the failure, never its message
    pub error: Option<String>,
}

/// Append-only event sink
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends `event` and returns its id.
    async fn event_create(&self, event: AuditEventInit) -> CreateResult<u64>;
}

/// A start event that has been written and awaits its terminal event
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartedEvent {
    pub id: u64,
    deployment: String,
    instance: String,
}

/// Writes the start/terminal event pairs of VM creation
pub struct EventRecorder {
    log: Logger,
    sink: Arc<dyn EventLog>,
}

impl EventRecorder {
    pub fn new(log: &Logger, sink: Arc<dyn EventLog>) -> Self {
        EventRecorder {
            log: log.new(o!("component" => "EventRecorder")),
            sink,
        }
    }

    pub async fn vm_create_started(
        &self,
        ctx: &TaskContext,
        instance: &InstanceIdentity,
    ) -> CreateResult<StartedEvent> {
        let deployment = instance.deployment.clone();
        let instance = instance.name();
        let id = self
            .sink
            .event_create(AuditEventInit {
                timestamp: Utc::now(),
                action: String::from(ACTION_CREATE),
                object_type: String::from(OBJECT_TYPE_VM),
                object_name: None,
                user: ctx.user.clone(),
                task_id: ctx.task_id.clone(),
                deployment: deployment.clone(),
                instance: instance.clone(),
                parent_id: None,
                error: None,
            })
            .await?;
        Ok(StartedEvent { id, deployment, instance })
    }

    /// Writes the terminal event for `started`
    ///
    /// Failures are logged; the outcome being recorded stands regardless.
    pub async fn vm_create_finished(
        &self,
        ctx: &TaskContext,
        started: &StartedEvent,
        vm_cid: Option<&str>,
        error_label: Option<&str>,
    ) {
        let event = AuditEventInit {
            timestamp: Utc::now(),
            action: String::from(ACTION_CREATE),
            object_type: String::from(OBJECT_TYPE_VM),
            object_name: vm_cid.map(String::from),
            user: ctx.user.clone(),
            task_id: ctx.task_id.clone(),
            deployment: started.deployment.clone(),
            instance: started.instance.clone(),
            parent_id: Some(started.id),
            error: error_label.map(String::from),
        };
        if let Err(error) = self.sink.event_create(event).await {
            warn!(self.log, "failed to record terminal audit event";
                "parent_id" => started.id,
                InlineErrorChain::new(&error),
            );
        }
    }
}
