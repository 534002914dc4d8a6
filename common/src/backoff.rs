// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for polling remote services with exponential
//! backoff.

use std::time::Duration;

pub use ::backoff::future::retry;
pub use ::backoff::Error as BackoffError;
pub use ::backoff::ExponentialBackoff;

/// Return a backoff policy for polling a service that is expected to come up
/// within a short time, giving up once `max_elapsed` has passed.
///
/// Used for agent readiness polling: the agent usually answers within a few
/// seconds of the VM booting.
pub fn agent_poll_policy(max_elapsed: Duration) -> ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(50);
    const MAX_INTERVAL: Duration = Duration::from_secs(1);
    let mut policy = internal_service_policy_with_max(
        INITIAL_INTERVAL,
        MAX_INTERVAL,
    );
    policy.max_elapsed_time = Some(max_elapsed);
    policy
}

fn internal_service_policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
) -> ExponentialBackoff {
    let current_interval = initial_interval;
    ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}
