// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of `((name))` placeholders against a variable set
//!
//! Cloud properties, network settings and environments may refer to
//! variables (usually secrets) by name.  Before any of them is handed to a
//! provider, every placeholder is replaced with the variable's value as of
//! one specific variable set, so that all three documents of one VM agree on
//! every value they share.

use crate::instance::VariableSetHandle;
use crate::Document;
use async_trait::async_trait;
use provisioner_common::Error;
use serde_json::Value;
use slog::debug;
use slog::o;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::LazyLock;

const NAME_PATTERN: &str = r"[A-Za-z0-9_./:-]+";

static PLACEHOLDER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(&format!(r"\(\(({})\)\)", NAME_PATTERN))
        .expect("placeholder regex should be valid")
});

static WHOLE_PLACEHOLDER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(&format!(r"^\(\(({})\)\)$", NAME_PATTERN))
        .expect("whole-string placeholder regex should be valid")
});

/// Read access to versioned variable values
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Returns the value of `name` as of `variable_set`, or `None` if the
    /// variable set has no such variable.
    async fn get(
        &self,
        name: &str,
        variable_set: &VariableSetHandle,
    ) -> Result<Option<Value>, Error>;
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum InterpolationError {
    #[error("failed to find variables: {}", .names.join(", "))]
    Unresolved { names: Vec<String> },
    #[error(
        "variable `{name}' is embedded in a string but its value is not a \
         string or number"
    )]
    InvalidEmbedded { name: String },
    #[error("reading variable `{name}' from variable set {variable_set}")]
    Store {
        name: String,
        variable_set: u64,
        #[source]
        err: Error,
    },
}

/// Replaces placeholders with variable values
pub struct SecretInterpolator {
    log: Logger,
    store: Arc<dyn VariableStore>,
}

impl SecretInterpolator {
    pub fn new(log: &Logger, store: Arc<dyn VariableStore>) -> Self {
        SecretInterpolator {
            log: log.new(o!("component" => "SecretInterpolator")),
            store,
        }
    }

    /// Returns a copy of `document` with every placeholder resolved against
    /// `variable_set`
    ///
    /// Either every placeholder resolves or the document is rejected: all
    /// names that could not be found are reported together.  Each distinct
    /// name is looked up at most once per call.
    pub async fn interpolate_with_versioning(
        &self,
        document: &Document,
        variable_set: &VariableSetHandle,
    ) -> Result<Document, InterpolationError> {
        let mut names = BTreeSet::new();
        for value in document.values() {
            collect_names(value, &mut names);
        }
        if names.is_empty() {
            return Ok(document.clone());
        }

        debug!(self.log, "resolving variables";
            "variable_set" => variable_set.id,
            "deployment" => &variable_set.deployment,
            "count" => names.len(),
        );

        let mut values = BTreeMap::new();
        let mut unresolved = Vec::new();
        for name in names {
            let value =
                self.store.get(&name, variable_set).await.map_err(|err| {
                    InterpolationError::Store {
                        name: name.clone(),
                        variable_set: variable_set.id,
                        err,
                    }
                })?;
            match value {
                Some(value) => {
                    values.insert(name, value);
                }
                None => unresolved.push(name),
            }
        }
        if !unresolved.is_empty() {
            return Err(InterpolationError::Unresolved { names: unresolved });
        }

        document
            .iter()
            .map(|(key, value)| Ok((key.clone(), substitute(value, &values)?)))
            .collect()
    }
}

fn collect_names(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for captures in PLACEHOLDER.captures_iter(s) {
                names.insert(captures[1].to_owned());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_names(item, names);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_names(item, names);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => (),
    }
}

fn substitute(
    value: &Value,
    values: &BTreeMap<String, Value>,
) -> Result<Value, InterpolationError> {
    match value {
        Value::String(s) => {
            if let Some(captures) = WHOLE_PLACEHOLDER.captures(s) {
                return Ok(lookup(&captures[1], values)?.clone());
            }
            let mut result = String::with_capacity(s.len());
            let mut last = 0;
            for captures in PLACEHOLDER.captures_iter(s) {
                let (Some(whole), Some(name)) =
                    (captures.get(0), captures.get(1))
                else {
                    continue;
                };
                result.push_str(&s[last..whole.start()]);
                match lookup(name.as_str(), values)? {
                    Value::String(v) => result.push_str(v),
                    Value::Number(n) => result.push_str(&n.to_string()),
                    _ => {
                        return Err(InterpolationError::InvalidEmbedded {
                            name: name.as_str().to_owned(),
                        })
                    }
                }
                last = whole.end();
            }
            result.push_str(&s[last..]);
            Ok(Value::String(result))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute(item, values))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => Ok(Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), substitute(v, values)?)))
                .collect::<Result<_, InterpolationError>>()?,
        )),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(value.clone()),
    }
}

fn lookup<'a>(
    name: &str,
    values: &'a BTreeMap<String, Value>,
) -> Result<&'a Value, InterpolationError> {
    // Every name was collected and resolved before substitution began.
    values.get(name).ok_or_else(|| InterpolationError::Unresolved {
        names: vec![name.to_owned()],
    })
}
