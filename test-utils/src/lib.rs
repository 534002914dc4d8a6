// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test facilities for the VM provisioning crates
//!
//! `dev` holds test logging; `fakes` holds in-memory implementations of every
//! collaborator the VM-creation core talks to.  None of this should be used
//! in production code.

pub mod dev;
pub mod fakes;
