// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities shared by the VM provisioning crates.
//!
//! The VM-creation core itself lives in the `provisioner` crate.  This crate
//! holds the pieces that the core and the implementations of its external
//! collaborators (datastores, variable stores, agent registries, and so on)
//! both need to agree on: the common [`Error`] type and the backoff policies
//! used when polling remote services.

pub mod backoff;
pub mod error;

pub use error::Error;
pub use error::LookupType;
pub use error::ResourceType;

/// Result of a lookup that returns a single object.
pub type LookupResult<T> = Result<T, Error>;
/// Result of a create operation for the specified type.
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation for the specified type.
pub type DeleteResult = Result<(), Error>;
