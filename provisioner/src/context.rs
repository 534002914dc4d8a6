// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state used by all operations performed on behalf of one task

use slog::o;
use slog::Logger;

/// Context for operations performed on behalf of a running task
///
/// The rollout driver creates one of these per task and shares it, read-only,
/// with every orchestration run it starts.  Audit events written by those
/// runs are attributed to `user` and `task_id`.
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub log: Logger,
    pub task_id: String,
    pub user: String,
}

impl TaskContext {
    pub fn new(log: &Logger, task_id: String, user: String) -> TaskContext {
        let log = log.new(o!(
            "task_id" => task_id.clone(),
            "user" => user.clone(),
        ));
        TaskContext { log, task_id, user }
    }
}
