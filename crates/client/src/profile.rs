// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Administrative role. Unknown role strings from the backend are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    MasterAdmin,
    MallAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterAdmin => "MASTER_ADMIN",
            Self::MallAdmin => "MALL_ADMIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedMall {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The signed-in user, replaced wholesale on every fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, deserialize_with = "de_roles")]
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub assigned_malls: Vec<AssignedMall>,
    /// Remaining profile fields, kept verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl UserProfile {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.roles.contains(r))
    }

    pub fn is_master_admin(&self) -> bool {
        self.has_role(Role::MasterAdmin)
    }

    pub fn is_mall_admin(&self) -> bool {
        self.has_role(Role::MallAdmin)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn de_roles<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<Role>, D::Error> {
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value::<Role>(v).ok())
        .collect())
}

#[cfg(test)]
#[path = "profile_tests.rs"]
mod tests;
