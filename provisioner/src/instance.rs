// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity and placement of the instance a VM is being created for

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifies the instance a VM belongs to
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceIdentity {
    pub deployment: String,
    pub instance_group: String,
    pub index: u32,
    pub id: Uuid,
}

impl InstanceIdentity {
    /// The instance's name, `<instance_group>/<id>`
    pub fn name(&self) -> String {
        format!("{}/{}", self.instance_group, self.id)
    }
}

/// Where a VM is to be created: determines which provider handle is used
/// and which image it boots from.
///
/// Immutable input to provider selection.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Placement {
    /// Availability zone of the instance.  `None` (or empty) means the
    /// deployment does not use availability zones.
    pub availability_zone: Option<String>,
    /// Image (stemcell) id to boot from when the stemcell has no
    /// provider-specific upload matching the resolved provider.
    pub stemcell_image_id: String,
    /// API version the stemcell's agent speaks, if the stemcell declares one.
    pub stemcell_api_version: Option<u32>,
    /// Names the provider directly, bypassing availability-zone lookup.
    pub cpi_alias: Option<String>,
    /// Image ids of the same stemcell uploaded to specific providers, keyed
    /// by provider name.
    #[serde(default)]
    pub provider_images: BTreeMap<String, String>,
}

impl Placement {
    /// Returns the availability zone, treating an empty name as absent
    pub fn availability_zone(&self) -> Option<&str> {
        self.availability_zone.as_deref().filter(|az| !az.is_empty())
    }
}

/// Handle to a versioned snapshot of variable values
///
/// Interpolation always happens against a specific snapshot, never against
/// "latest", so that an instance's secrets resolve the same way every time
/// its VM is (re)created.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VariableSetHandle {
    pub id: u64,
    pub deployment: String,
}
