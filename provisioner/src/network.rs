// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds the network settings handed to providers and agents

use crate::config::LegacyDnsConfig;
use crate::instance::InstanceIdentity;
use crate::Document;
use provisioner_common::Error;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::IpAddr;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NetworkType {
    Dynamic,
    Manual,
    Vip,
}

/// Properties for which one of an instance's networks is the default
///
/// Ordered the way they are listed in network settings.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DefaultProperty {
    Addressable,
    Dns,
    Gateway,
}

/// Which network is the default for each property, by network name
pub type DefaultNetwork = BTreeMap<DefaultProperty, String>;

/// A network claim made for an instance before its VM is created
///
/// Produced by network planning; only read here.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Reservation {
    pub network_name: String,
    pub network_type: NetworkType,
    #[serde(default)]
    pub cloud_properties: Document,
    /// Assigned address.  Required for manual and vip networks, ignored for
    /// dynamic ones (the provider assigns those).
    pub address: Option<IpAddr>,
    pub netmask: Option<IpAddr>,
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    pub mac_address: Option<String>,
}

#[derive(Debug, Serialize)]
struct NetworkSettings<'a> {
    #[serde(rename = "type")]
    network_type: NetworkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    netmask: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway: Option<IpAddr>,
    #[serde(skip_serializing_if = "<[IpAddr]>::is_empty")]
    dns: &'a [IpAddr],
    cloud_properties: &'a Document,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    default: BTreeSet<DefaultProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dns_record_name: Option<String>,
}

/// Builds network settings from reservations
///
/// The output depends only on the inputs, so rebuilding settings for the
/// same reservations always yields an identical document.
#[derive(Clone, Debug, Default)]
pub struct NetworkSettingsResolver {
    legacy_dns: Option<LegacyDnsConfig>,
}

impl NetworkSettingsResolver {
    pub fn new(legacy_dns: Option<LegacyDnsConfig>) -> Self {
        NetworkSettingsResolver { legacy_dns }
    }

    /// Returns settings for each reserved network, keyed by network name
    pub fn build(
        &self,
        reservations: &[Reservation],
        instance: &InstanceIdentity,
        default_network: &DefaultNetwork,
    ) -> Result<Document, Error> {
        let mut settings = Document::new();
        for reservation in reservations {
            let name = &reservation.network_name;
            if settings.contains_key(name) {
                return Err(Error::invalid_value(
                    "reservations",
                    &format!("network `{}' is reserved more than once", name),
                ));
            }

            let static_address = match reservation.network_type {
                NetworkType::Dynamic => None,
                NetworkType::Manual | NetworkType::Vip => {
                    Some(reservation.address.ok_or_else(|| {
                        Error::invalid_value(
                            "reservations",
                            &format!(
                                "{} network `{}' has no assigned address",
                                reservation.network_type, name,
                            ),
                        )
                    })?)
                }
            };

            let default = default_network
                .iter()
                .filter(|(_, network)| *network == name)
                .map(|(property, _)| *property)
                .collect();

            let entry = NetworkSettings {
                network_type: reservation.network_type,
                ip: static_address,
                netmask: reservation.netmask,
                gateway: reservation.gateway,
                dns: &reservation.dns,
                cloud_properties: &reservation.cloud_properties,
                default,
                mac: reservation.mac_address.as_deref(),
                dns_record_name: self
                    .legacy_dns
                    .as_ref()
                    .map(|dns| dns_record_name(instance, name, dns)),
            };
            settings.insert(name.clone(), serde_json::to_value(&entry)?);
        }
        Ok(settings)
    }
}

/// Returns the static addresses present in built network settings
pub fn static_addresses(settings: &Document) -> Vec<String> {
    settings
        .values()
        .filter_map(|network| network.get("ip"))
        .filter_map(|ip| ip.as_str())
        .map(String::from)
        .collect()
}

fn dns_record_name(
    instance: &InstanceIdentity,
    network: &str,
    dns: &LegacyDnsConfig,
) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        instance.id,
        canonicalize(&instance.instance_group),
        canonicalize(network),
        canonicalize(&instance.deployment),
        dns.root_domain,
    )
}

/// Makes a name usable as a DNS label
fn canonicalize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}
