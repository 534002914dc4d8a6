// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity metadata attached to created VMs

use crate::env::group_name;
use crate::instance::InstanceIdentity;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use std::collections::BTreeMap;

/// Returns the metadata for a VM created at `created_at`
///
/// Caller-supplied `tags` are included, except where they collide with one
/// of the built-in keys.
pub fn vm_metadata(
    director_name: &str,
    instance: &InstanceIdentity,
    created_at: DateTime<Utc>,
    tags: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut metadata = tags.clone();
    let builtin = [
        ("deployment", instance.deployment.clone()),
        ("created_at", created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("job", instance.instance_group.clone()),
        ("instance_group", instance.instance_group.clone()),
        ("index", instance.index.to_string()),
        ("director", director_name.to_owned()),
        ("id", instance.id.to_string()),
        ("name", instance.name()),
        ("group", group_name(director_name, instance)),
    ];
    for (key, value) in builtin {
        metadata.insert(key.to_owned(), value);
    }
    metadata
}
