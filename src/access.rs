//! # Access Control Module
//!
//! Every resource operation is gated by a public key. This module defines
//! the entities of the access-control model (key pairs, resources, resource
//! groups, access-list entries) and the [`AccessControl`] capability trait
//! that backends implement. The core only ever evaluates access-control
//! data; persisting it belongs to the backing store.
//!
//! The decision function is deliberately boolean: `has_access` answers "may
//! this key perform this operation, optionally on this user's content". The
//! lookup operations keep "not found" (`None`) distinct from both denial and
//! backend failure; only an unreachable backing store produces an error.

pub mod simple;

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

/// Upper bound on unpaginated user/group listings.
pub const MAX_LISTING: usize = 1000;

/// Resource names used by the bundled handlers.
pub mod resource {
    pub const IMAGES_GET: &str = "images.get";
    pub const IMAGES_POST: &str = "images.post";
    pub const IMAGE_GET: &str = "image.get";
    pub const IMAGE_DELETE: &str = "image.delete";
    pub const METADATA_GET: &str = "metadata.get";
    pub const METADATA_PUT: &str = "metadata.put";
    pub const USERS_GET: &str = "users.get";
    pub const GROUPS_GET: &str = "groups.get";
    pub const GROUP_GET: &str = "group.get";
    pub const ACCESS_LIST_GET: &str = "accesslist.get";
}

/// A named, reusable set of resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub name: String,
    pub resources: BTreeSet<String>,
}

/// One grant attached to a public key: a set of resources, a set of group
/// references, and an optional restriction to specific users' content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessListEntry {
    pub resources: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub users: UserConstraint,
}

/// Which users' content an access-list entry may touch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UserConstraint {
    /// The entry is not restricted by user.
    #[default]
    Any,
    /// The entry only applies to the listed users.
    Only(BTreeSet<String>),
}

impl UserConstraint {
    /// Whether the constraint admits the given user. An absent user passes:
    /// the restriction only applies when a user is part of the request.
    pub fn admits(&self, user: Option<&str>) -> bool {
        match (self, user) {
            (UserConstraint::Any, _) => true,
            (UserConstraint::Only(_), None) => true,
            (UserConstraint::Only(allowed), Some(user)) => allowed.contains(user),
        }
    }
}

/// Pagination parameters for the user listing. No other predicates exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

impl UserQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of users to return.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of users to skip.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }
}

/// Pagination parameters for the group listing. No other predicates exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

impl GroupQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of groups to return.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of groups to skip.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }
}

/// The access-control capability consumed by resource handlers and
/// administrative tooling.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Decides whether `public_key` may perform `resource`, optionally on
    /// `user`'s content.
    ///
    /// True iff the key exists, an entry for it grants the resource directly
    /// or through a referenced group, and, when a user is supplied and the
    /// entry restricts by user, the user is in the entry's allowed set.
    /// An unknown key yields `Ok(false)`, never an error.
    async fn has_access(
        &self,
        public_key: &str,
        resource: &str,
        user: Option<&str>,
    ) -> Result<bool, AccessError>;

    /// Returns the private key paired with a public key, or `None` when the
    /// public key does not exist. Callers treat `None` as "authentication
    /// must fail".
    async fn get_private_key(&self, public_key: &str) -> Result<Option<String>, AccessError>;

    /// Returns whether the public key is known to the backend.
    async fn public_key_exists(&self, public_key: &str) -> Result<bool, AccessError>;

    /// Lists users, honoring the query's `limit`/`offset`. An omitted query
    /// returns the full set bounded by [`MAX_LISTING`].
    async fn get_users(&self, query: Option<UserQuery>) -> Result<Vec<String>, AccessError>;

    /// Lists groups, honoring the query's `limit`/`offset`. An omitted query
    /// returns the full set bounded by [`MAX_LISTING`].
    async fn get_groups(
        &self,
        query: Option<GroupQuery>,
    ) -> Result<Vec<ResourceGroup>, AccessError>;

    /// Returns a group by name. `None` means no such group, which is
    /// distinct from a group that exists with zero resources.
    async fn get_group(&self, name: &str) -> Result<Option<ResourceGroup>, AccessError>;

    /// Returns the raw access-list entries for a public key, for
    /// administrative introspection. A key with no grants yields an empty
    /// list, not an error.
    async fn get_access_list_for_public_key(
        &self,
        public_key: &str,
    ) -> Result<Vec<AccessListEntry>, AccessError>;
}

/// Errors surfaced by access-control lookups.
///
/// A legitimate denial is `Ok(false)` from `has_access`; an error here
/// always means the backing store itself failed, so the two can never be
/// confused in audit trails.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access control backend unreachable: {reason}")]
    Backend { reason: String },
}
