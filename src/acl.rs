//! Per-object access control.
//!
//! A policy is stored as JSON in the object's custom metadata under
//! [`ACL_POLICY_METADATA_KEY`].  Objects without a policy are not
//! accessible to anyone.

use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::errors::StorageError;
use crate::storage::backend::{ObjectBackend, ObjectFile};

/// Custom metadata key holding the serialized policy.
pub const ACL_POLICY_METADATA_KEY: &str = "custom:aclPolicy";

/// Permission requested on an object. `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ObjectPermission {
    #[default]
    Read,
    Write,
}

impl ObjectPermission {
    fn grants(self, requested: ObjectPermission) -> bool {
        match self {
            ObjectPermission::Write => true,
            ObjectPermission::Read => requested == ObjectPermission::Read,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessGroupType {
    /// A single user, identified by `id`.
    User,
    /// Every signed-in user.
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessGroup {
    #[serde(rename = "type")]
    pub group_type: AccessGroupType,
    #[serde(default)]
    pub id: String,
}

impl AccessGroup {
    fn has_member(&self, user_id: &str) -> bool {
        match self.group_type {
            AccessGroupType::User => self.id == user_id,
            AccessGroupType::Authenticated => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ObjectAclRule {
    pub group: AccessGroup,
    pub permission: ObjectPermission,
}

/// Visibility, owner and extra grants attached to an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAclPolicy {
    pub owner: String,
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acl_rules: Vec<ObjectAclRule>,
}

impl ObjectAclPolicy {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Decide whether `user_id` holds `requested` on an object carrying
    /// this policy.
    ///
    /// Public objects are readable by anyone, the owner holds every
    /// permission, and rules grant the rest.
    pub fn allows(&self, user_id: Option<&str>, requested: ObjectPermission) -> bool {
        if self.is_public() && requested == ObjectPermission::Read {
            return true;
        }
        let Some(user_id) = user_id else {
            return false;
        };
        if self.owner == user_id {
            return true;
        }
        self.acl_rules
            .iter()
            .any(|rule| rule.group.has_member(user_id) && rule.permission.grants(requested))
    }
}

/// Read the policy attached to `file`, if any.
///
/// A policy that fails to parse is treated as absent.
pub async fn get_object_acl_policy(
    backend: &dyn ObjectBackend,
    file: &ObjectFile,
) -> anyhow::Result<Option<ObjectAclPolicy>> {
    let metadata = backend.metadata(&file.name).await?;
    let Some(raw) = metadata.custom.get(ACL_POLICY_METADATA_KEY) else {
        return Ok(None);
    };
    match serde_json::from_str(raw) {
        Ok(policy) => Ok(Some(policy)),
        Err(e) => {
            warn!("Ignoring malformed ACL policy on {}: {}", file.name, e);
            Ok(None)
        }
    }
}

/// Attach `policy` to `file`, replacing any previous one.
pub async fn set_object_acl_policy(
    backend: &dyn ObjectBackend,
    file: &ObjectFile,
    policy: &ObjectAclPolicy,
) -> Result<(), StorageError> {
    if !backend.exists(&file.name).await? {
        return Err(StorageError::ObjectNotFound);
    }
    let raw = serde_json::to_string(policy).map_err(anyhow::Error::from)?;
    backend
        .set_custom_metadata(&file.name, ACL_POLICY_METADATA_KEY, &raw)
        .await?;
    Ok(())
}

/// Evaluate the stored policy of `file` for `user_id`.
pub async fn can_access_object(
    backend: &dyn ObjectBackend,
    user_id: Option<&str>,
    file: &ObjectFile,
    requested: ObjectPermission,
) -> anyhow::Result<bool> {
    Ok(get_object_acl_policy(backend, file)
        .await?
        .is_some_and(|policy| policy.allows(user_id, requested)))
}
