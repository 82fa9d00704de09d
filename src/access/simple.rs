//! Config-backed access control.
//!
//! [`SimpleAccessControl`] evaluates access against an immutable
//! [`AccessControlConfig`] built once at startup, typically deserialized
//! from a JSON file. There is no interior mutability and no shared default
//! state: two instances built from the same config behave identically, and
//! nothing can mutate a running instance.

use super::{
    AccessControl, AccessError, AccessListEntry, GroupQuery, MAX_LISTING, ResourceGroup,
    UserConstraint, UserQuery,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Declarative access-control configuration.
///
/// ```json
/// {
///   "keys": [
///     {
///       "publicKey": "client",
///       "privateKey": "secret",
///       "acl": [
///         { "resources": ["images.post"], "groups": ["read"], "users": ["alice"] }
///       ]
///     }
///   ],
///   "groups": { "read": ["images.get", "image.get"] },
///   "users": ["alice", "bob"]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlConfig {
    #[serde(default)]
    pub keys: Vec<KeyConfig>,

    /// Group name to resource names.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,

    /// Known users. Users named in ACL entries are folded in as well.
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    pub public_key: String,
    pub private_key: String,

    #[serde(default)]
    pub acl: Vec<AclConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclConfig {
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    /// Omitted means the entry is not restricted by user.
    pub users: Option<Vec<String>>,
}

struct KeyData {
    private_key: String,
    entries: Vec<AccessListEntry>,
}

/// An [`AccessControl`] backend over a fixed configuration.
pub struct SimpleAccessControl {
    keys: HashMap<String, KeyData>,
    groups: BTreeMap<String, BTreeSet<String>>,
    users: BTreeSet<String>,
}

impl SimpleAccessControl {
    pub fn new(config: AccessControlConfig) -> Self {
        let mut users: BTreeSet<String> = config.users.into_iter().collect();

        let groups: BTreeMap<String, BTreeSet<String>> = config
            .groups
            .into_iter()
            .map(|(name, resources)| (name, resources.into_iter().collect()))
            .collect();

        let mut keys = HashMap::new();
        for key in config.keys {
            let entries = key
                .acl
                .into_iter()
                .map(|entry| {
                    let constraint = match entry.users {
                        None => UserConstraint::Any,
                        Some(list) => {
                            users.extend(list.iter().cloned());
                            UserConstraint::Only(list.into_iter().collect())
                        }
                    };

                    AccessListEntry {
                        resources: entry.resources.into_iter().collect(),
                        groups: entry.groups.into_iter().collect(),
                        users: constraint,
                    }
                })
                .collect();

            keys.insert(
                key.public_key,
                KeyData {
                    private_key: key.private_key,
                    entries,
                },
            );
        }

        Self { keys, groups, users }
    }

    fn entry_grants(&self, entry: &AccessListEntry, resource: &str) -> bool {
        if entry.resources.contains(resource) {
            return true;
        }

        // A reference to an undefined group simply contributes nothing.
        entry.groups.iter().any(|name| {
            self.groups
                .get(name)
                .is_some_and(|resources| resources.contains(resource))
        })
    }
}

fn paginate<T>(items: Vec<T>, limit: Option<u32>, offset: Option<u32>) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.unwrap_or(0) as usize)
        .take(limit.map(|l| l as usize).unwrap_or(MAX_LISTING))
        .collect()
}

#[async_trait]
impl AccessControl for SimpleAccessControl {
    async fn has_access(
        &self,
        public_key: &str,
        resource: &str,
        user: Option<&str>,
    ) -> Result<bool, AccessError> {
        let Some(key) = self.keys.get(public_key) else {
            return Ok(false);
        };

        Ok(key
            .entries
            .iter()
            .any(|entry| self.entry_grants(entry, resource) && entry.users.admits(user)))
    }

    async fn get_private_key(&self, public_key: &str) -> Result<Option<String>, AccessError> {
        Ok(self.keys.get(public_key).map(|k| k.private_key.clone()))
    }

    async fn public_key_exists(&self, public_key: &str) -> Result<bool, AccessError> {
        Ok(self.keys.contains_key(public_key))
    }

    async fn get_users(&self, query: Option<UserQuery>) -> Result<Vec<String>, AccessError> {
        let query = query.unwrap_or_default();
        let users: Vec<String> = self.users.iter().cloned().collect();

        Ok(paginate(users, query.limit(), query.offset()))
    }

    async fn get_groups(
        &self,
        query: Option<GroupQuery>,
    ) -> Result<Vec<ResourceGroup>, AccessError> {
        let query = query.unwrap_or_default();
        let groups: Vec<ResourceGroup> = self
            .groups
            .iter()
            .map(|(name, resources)| ResourceGroup {
                name: name.clone(),
                resources: resources.clone(),
            })
            .collect();

        Ok(paginate(groups, query.limit(), query.offset()))
    }

    async fn get_group(&self, name: &str) -> Result<Option<ResourceGroup>, AccessError> {
        Ok(self.groups.get(name).map(|resources| ResourceGroup {
            name: name.to_string(),
            resources: resources.clone(),
        }))
    }

    async fn get_access_list_for_public_key(
        &self,
        public_key: &str,
    ) -> Result<Vec<AccessListEntry>, AccessError> {
        Ok(self
            .keys
            .get(public_key)
            .map(|k| k.entries.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessControlConfig, SimpleAccessControl};
    use crate::access::{AccessControl, GroupQuery, UserQuery, resource};

    fn config() -> AccessControlConfig {
        serde_json::from_str(
            r#"{
                "keys": [
                    {
                        "publicKey": "reader",
                        "privateKey": "reader-secret",
                        "acl": [{ "groups": ["read"] }]
                    },
                    {
                        "publicKey": "writer",
                        "privateKey": "writer-secret",
                        "acl": [
                            { "resources": ["images.post"], "users": ["alice"] },
                            { "groups": ["read"] }
                        ]
                    },
                    {
                        "publicKey": "bare",
                        "privateKey": "bare-secret"
                    }
                ],
                "groups": {
                    "read": ["images.get", "image.get"],
                    "empty-group": []
                },
                "users": ["alice", "bob", "carol"]
            }"#,
        )
        .unwrap()
    }

    fn backend() -> SimpleAccessControl {
        SimpleAccessControl::new(config())
    }

    #[tokio::test]
    async fn test_unknown_key_is_denied_not_an_error() {
        let access = backend();

        assert!(!access
            .has_access("missing", resource::IMAGES_GET, None)
            .await
            .unwrap());
        assert!(!access.public_key_exists("missing").await.unwrap());
        assert_eq!(None, access.get_private_key("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_direct_resource_grant() {
        let access = backend();

        assert!(access
            .has_access("writer", "images.post", Some("alice"))
            .await
            .unwrap());
        assert!(!access
            .has_access("writer", "image.delete", Some("alice"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_grant_through_group() {
        let access = backend();

        assert!(access
            .has_access("reader", resource::IMAGES_GET, None)
            .await
            .unwrap());
        assert!(access
            .has_access("reader", resource::IMAGE_GET, None)
            .await
            .unwrap());
        assert!(!access
            .has_access("reader", resource::IMAGES_POST, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_user_restriction() {
        let access = backend();

        assert!(access
            .has_access("writer", "images.post", Some("alice"))
            .await
            .unwrap());
        assert!(!access
            .has_access("writer", "images.post", Some("mallory"))
            .await
            .unwrap());
        // The restriction only applies when a user is part of the request.
        assert!(access.has_access("writer", "images.post", None).await.unwrap());
    }

    /// Adding a resource to a referenced group can only add permissions.
    #[tokio::test]
    async fn test_group_expansion_is_monotonic() {
        let mut expanded = config();
        expanded
            .groups
            .get_mut("read")
            .unwrap()
            .push("image.delete".to_string());

        let before = SimpleAccessControl::new(config());
        let after = SimpleAccessControl::new(expanded);

        for res in ["images.get", "image.get", "image.delete"] {
            let had = before.has_access("reader", res, None).await.unwrap();
            let has = after.has_access("reader", res, None).await.unwrap();
            assert!(!had || has, "expansion revoked {res}");
        }
        assert!(after.has_access("reader", "image.delete", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_group_is_distinct_from_empty_group() {
        let access = backend();

        assert!(access.get_group("nonexistent").await.unwrap().is_none());

        let empty = access.get_group("empty-group").await.unwrap().unwrap();
        assert!(empty.resources.is_empty());
    }

    #[tokio::test]
    async fn test_access_list_for_key_without_grants_is_empty() {
        let access = backend();

        assert!(access
            .get_access_list_for_public_key("bare")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            2,
            access
                .get_access_list_for_public_key("writer")
                .await
                .unwrap()
                .len()
        );
    }

    #[tokio::test]
    async fn test_user_listing_pagination() {
        let access = backend();

        assert_eq!(
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            access.get_users(None).await.unwrap()
        );
        assert_eq!(
            vec!["bob".to_string()],
            access
                .get_users(Some(UserQuery::new().with_limit(1).with_offset(1)))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_group_listing_pagination() {
        let access = backend();

        let all = access.get_groups(None).await.unwrap();
        assert_eq!(2, all.len());

        let page = access
            .get_groups(Some(GroupQuery::new().with_limit(1).with_offset(1)))
            .await
            .unwrap();
        assert_eq!(1, page.len());
        assert_eq!("read", page[0].name);
    }

    #[tokio::test]
    async fn test_private_key_lookup() {
        let access = backend();

        assert_eq!(
            Some("reader-secret".to_string()),
            access.get_private_key("reader").await.unwrap()
        );
    }
}
