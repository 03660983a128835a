//! Permission resolution
//!
//! Maps a role or a set of capability flags to a normalized permission set.
//! Every function here is pure and infallible: malformed input degrades to
//! the least-privileged outcome.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Grants every permission when present in a set.
pub const WILDCARD: &str = "*";

/// The fixed permission enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    DocumentsRead,
    DocumentsEdit,
    DocumentsValidate,
    DocumentsPublish,
    ProfileRead,
    UsersManage,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::DocumentsRead,
        Permission::DocumentsEdit,
        Permission::DocumentsValidate,
        Permission::DocumentsPublish,
        Permission::ProfileRead,
        Permission::UsersManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::DocumentsRead => "documents:read",
            Permission::DocumentsEdit => "documents:edit",
            Permission::DocumentsValidate => "documents:validate",
            Permission::DocumentsPublish => "documents:publish",
            Permission::ProfileRead => "profile:read",
            Permission::UsersManage => "users:manage",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == s.trim())
            .ok_or(())
    }
}

/// Session role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    User,
    Admin,
}

impl Role {
    /// Normalize a free-form role name; anything unrecognized is `Guest`.
    pub fn normalize(name: &str) -> Role {
        match name {
            "admin" => Role::Admin,
            "user" => Role::User,
            _ => Role::Guest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// Per-user capability flags driving non-admin permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityFlags {
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_validate: bool,
    #[serde(default)]
    pub can_publish: bool,
}

impl CapabilityFlags {
    pub fn all() -> Self {
        Self {
            can_edit: true,
            can_validate: true,
            can_publish: true,
        }
    }
}

/// Normalized set of permission strings
///
/// Entries are trimmed, non-empty and unique. A set containing [`WILDCARD`]
/// grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    /// Trim, drop empties and deduplicate.
    pub fn normalize<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            permissions
                .into_iter()
                .map(|permission| permission.as_ref().trim().to_string())
                .filter(|permission| !permission.is_empty())
                .collect(),
        )
    }

    pub fn wildcard() -> Self {
        Self::normalize([WILDCARD])
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.contains(WILDCARD)
    }

    /// Membership check honoring the wildcard.
    pub fn allows(&self, permission: Permission) -> bool {
        self.is_wildcard() || self.0.contains(permission.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset(&self, other: &PermissionSet) -> bool {
        other.is_wildcard() || self.0.is_subset(&other.0)
    }
}

impl From<Vec<String>> for PermissionSet {
    fn from(permissions: Vec<String>) -> Self {
        Self::normalize(permissions)
    }
}

impl From<PermissionSet> for Vec<String> {
    fn from(set: PermissionSet) -> Self {
        set.0.into_iter().collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self::normalize(iter.into_iter().map(|permission| permission.as_str()))
    }
}

/// Static role table. `Admin` maps to the wildcard.
pub fn permissions_for_role(role: Role) -> PermissionSet {
    match role {
        Role::Guest => [Permission::DocumentsRead].into_iter().collect(),
        Role::User => [Permission::DocumentsRead, Permission::ProfileRead]
            .into_iter()
            .collect(),
        Role::Admin => PermissionSet::wildcard(),
    }
}

/// Permissions for an identity driven by capability flags rather than a role.
///
/// Document read and profile read are always granted.
pub fn permissions_from_flags(flags: CapabilityFlags) -> PermissionSet {
    let mut permissions = vec![Permission::DocumentsRead, Permission::ProfileRead];

    if flags.can_edit {
        permissions.push(Permission::DocumentsEdit);
    }
    if flags.can_validate {
        permissions.push(Permission::DocumentsValidate);
    }
    if flags.can_publish {
        permissions.push(Permission::DocumentsPublish);
    }

    permissions.into_iter().collect()
}
