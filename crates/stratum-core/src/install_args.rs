//! Legacy flat install arguments
//!
//! Older configurations describe chart values as a flat list of `name`/`value`
//! pairs rather than a nested document. An argument may carry a `valueList`,
//! in which case each element becomes its own indexed entry: `name[0]`,
//! `name[1]`, and so on. The expanded pairs are then turned into a nested
//! values layer by [`expand_to_values`].

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::values::{Values, typed_value};

/// One flat install argument
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallArg {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_list: Vec<String>,

    /// Keep the value as a string instead of inferring its type
    #[serde(default)]
    pub set_string: bool,
}

impl InstallArg {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn list<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            value_list: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// A single resolved `key = value` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub set_string: bool,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            set_string: false,
        }
    }

    /// A pair whose value is never type-inferred
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            set_string: true,
        }
    }
}

/// Expand install arguments into key/value pairs, preserving order
pub fn expand_install_args(args: &[InstallArg]) -> Result<Vec<KeyValue>> {
    let mut pairs = Vec::new();

    for arg in args {
        if arg.name.is_empty() {
            return Err(CoreError::InvalidInstallArg {
                name: String::new(),
                message: "name is empty".to_string(),
            });
        }

        match (&arg.value, arg.value_list.is_empty()) {
            (Some(_), false) => {
                return Err(CoreError::InvalidInstallArg {
                    name: arg.name.clone(),
                    message: "both value and valueList are set".to_string(),
                });
            }
            (Some(value), true) => pairs.push(KeyValue {
                key: arg.name.clone(),
                value: value.clone(),
                set_string: arg.set_string,
            }),
            (None, false) => {
                for (i, value) in arg.value_list.iter().enumerate() {
                    pairs.push(KeyValue {
                        key: format!("{}[{}]", arg.name, i),
                        value: value.clone(),
                        set_string: arg.set_string,
                    });
                }
            }
            (None, true) => {
                return Err(CoreError::InvalidInstallArg {
                    name: arg.name.clone(),
                    message: "neither value nor valueList is set".to_string(),
                });
            }
        }
    }

    Ok(pairs)
}

/// Build a nested values layer from key/value pairs; later pairs win
pub fn expand_to_values(pairs: &[KeyValue]) -> Result<Values> {
    let mut values = Values::new();
    for pair in pairs {
        let value = if pair.set_string {
            serde_json::Value::String(pair.value.clone())
        } else {
            typed_value(&pair.value)
        };
        values.set(&pair.key, value)?;
    }
    Ok(values)
}
