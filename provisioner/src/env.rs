// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of the environment document passed to providers

use crate::config::Config;
use crate::instance::InstanceIdentity;
use crate::Document;
use provisioner_common::Error;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;

/// Top-level environment key holding the fields this core owns
pub const RESERVED_KEY: &str = "bosh";

/// Number of random bytes in a generated VM password
const PASSWORD_BYTES: usize = 32;

/// Management-channel credentials placed in an agent's environment
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MbusCertBlock {
    pub ca: String,
    pub certificate: String,
    pub private_key: String,
}

/// Builds VM environments
///
/// The user's environment is taken as given; beneath its reserved block the
/// configured agent defaults are merged (user values win at every depth), and
/// on top of it the identity fields are set.
#[derive(Clone, Debug)]
pub struct EnvironmentBuilder {
    director_name: String,
    agent_defaults: Document,
    generate_password: bool,
}

impl EnvironmentBuilder {
    pub fn new(config: &Config) -> EnvironmentBuilder {
        EnvironmentBuilder {
            director_name: config.director_name.clone(),
            agent_defaults: config.agent_env.clone(),
            generate_password: config.generate_vm_passwords,
        }
    }

    pub fn build(
        &self,
        user_env: &Document,
        instance: &InstanceIdentity,
        mbus_cert: Option<&MbusCertBlock>,
    ) -> Result<Document, Error> {
        let mut env = user_env.clone();

        let mut reserved_block = self.agent_defaults.clone();
        match env.remove(RESERVED_KEY) {
            None | Some(Value::Null) => (),
            Some(Value::Object(user_reserved)) => {
                merge_documents(&mut reserved_block, user_reserved);
            }
            Some(_) => {
                return Err(Error::invalid_value(
                    "env",
                    &format!("`{}' must be a map", RESERVED_KEY),
                ));
            }
        }

        let names = group_names(&self.director_name, instance);
        reserved_block
            .insert(String::from("group"), Value::String(names.join("-")));
        reserved_block.insert(
            String::from("groups"),
            Value::Array(
                groups(&names).into_iter().map(Value::String).collect(),
            ),
        );

        let has_password = reserved_block
            .get("password")
            .map(|password| !password.is_null())
            .unwrap_or(false);
        if !has_password {
            reserved_block.remove("password");
            if self.generate_password {
                reserved_block.insert(
                    String::from("password"),
                    Value::String(generate_password()),
                );
            }
        }

        if let Some(cert) = mbus_cert {
            let mbus = reserved_block
                .entry("mbus")
                .or_insert_with(|| Value::Object(Document::new()));
            if !mbus.is_object() {
                *mbus = Value::Object(Document::new());
            }
            if let Value::Object(mbus) = mbus {
                mbus.insert(String::from("cert"), serde_json::to_value(cert)?);
            }
        }

        env.insert(String::from(RESERVED_KEY), Value::Object(reserved_block));
        Ok(env)
    }
}

/// Merges `overlay` into `base`.  Maps are merged key by key at every depth;
/// any other value in `overlay` replaces the one in `base`.
fn merge_documents(base: &mut Document, overlay: Document) {
    for (key, value) in overlay {
        match value {
            Value::Object(overlay) => match base.get_mut(&key) {
                Some(Value::Object(existing)) => {
                    merge_documents(existing, overlay)
                }
                _ => {
                    base.insert(key, Value::Object(overlay));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Returns the identity string tagging every VM of an instance group,
/// `<director>-<deployment>-<instance_group>`
pub fn group_name(
    director_name: &str,
    instance: &InstanceIdentity,
) -> String {
    group_names(director_name, instance).join("-")
}

fn group_names(
    director_name: &str,
    instance: &InstanceIdentity,
) -> [String; 3] {
    [
        canonicalize(director_name),
        canonicalize(&instance.deployment),
        canonicalize(&instance.instance_group),
    ]
}

/// Every ordered combination of director, deployment, and group names used
/// to tag a VM, without duplicates
fn groups(names: &[String; 3]) -> Vec<String> {
    let [director, deployment, group] = names;
    let candidates = [
        director.clone(),
        deployment.clone(),
        group.clone(),
        format!("{}-{}", director, deployment),
        format!("{}-{}", deployment, group),
        format!("{}-{}-{}", director, deployment, group),
    ];
    let mut groups: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !groups.contains(&candidate) {
            groups.push(candidate);
        }
    }
    groups
}

fn canonicalize(name: &str) -> String {
    name.replace('_', "-")
}

fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
