// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error type reported by the collaborators of the provisioning core

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

/// Failure reported by a datastore, variable store, cloud-config store, or
/// event sink
///
/// Provider drivers report `provisioner::provider::ProviderError` instead,
/// since only the driver knows whether its failure is worth retrying.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// A lookup found nothing.
    #[error("{type_name} not found ({lookup_type})")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// A create collided with an existing object.
    #[error("{type_name} already exists: {object_name}")]
    ObjectAlreadyExists { type_name: ResourceType, object_name: String },
    /// An input field was rejected.
    #[error("Invalid Value: {label}, {message}")]
    InvalidValue { label: String, message: String },

    /// Something that should not happen did.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
    /// The collaborator is down; trying again later may work.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },
}

/// Kinds of objects that collaborators look up or create
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    PartialEq,
    Serialize,
    strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceType {
    AvailabilityZone,
    CloudConfig,
    Provider,
    VariableSet,
    Vm,
}

/// Key used for a lookup that came back empty
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    ByName(String),
    ByCid(String),
}

impl Display for LookupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupType::ByName(name) => write!(f, "name {name:?}"),
            LookupType::ByCid(cid) => write!(f, "cid {cid:?}"),
        }
    }
}

impl LookupType {
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl Error {
    /// Whether the same call could succeed if made again
    pub fn retryable(&self) -> bool {
        matches!(self, Error::ServiceUnavailable { .. })
    }

    pub fn not_found_by_name(type_name: ResourceType, name: &str) -> Error {
        LookupType::ByName(name.to_owned()).into_not_found(type_name)
    }

    pub fn not_found_by_cid(type_name: ResourceType, cid: &str) -> Error {
        LookupType::ByCid(cid.to_owned()).into_not_found(type_name)
    }

    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    pub fn invalid_value(label: &str, message: &str) -> Error {
        Error::InvalidValue {
            label: label.to_owned(),
            message: message.to_owned(),
        }
    }

    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }

    /// Prefixes `context` to the internal message of an `InternalError` or
    /// `ServiceUnavailable`; other variants pass through untouched.
    pub fn internal_context<C>(self, context: C) -> Error
    where
        C: Display,
    {
        match self {
            Error::InternalError { internal_message } => Error::InternalError {
                internal_message: format!("{context}: {internal_message}"),
            },
            Error::ServiceUnavailable { internal_message } => {
                Error::ServiceUnavailable {
                    internal_message: format!("{context}: {internal_message}"),
                }
            }
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal_error(&e.to_string())
    }
}
