use crate::{
    AppState,
    auth::{RequesterKey, ensure_access},
    error::ApiError,
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use imago::access::{
    AccessListEntry, GroupQuery, ResourceGroup, UserConstraint, UserQuery, resource,
};
use serde::{Deserialize, Serialize};

/// Pagination of the administrative listings. Omitting both parameters
/// returns the full (bounded) set.
#[derive(Deserialize)]
pub struct ListingParams {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Serialize, Debug)]
pub struct GroupItem {
    pub name: String,
    pub resources: Vec<String>,
}

impl GroupItem {
    fn from_group(group: ResourceGroup) -> Self {
        GroupItem {
            name: group.name,
            resources: group.resources.into_iter().collect(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct AccessEntryItem {
    pub resources: Vec<String>,
    pub groups: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

impl AccessEntryItem {
    fn from_entry(entry: AccessListEntry) -> Self {
        AccessEntryItem {
            resources: entry.resources.into_iter().collect(),
            groups: entry.groups.into_iter().collect(),
            users: match entry.users {
                UserConstraint::Any => None,
                UserConstraint::Only(users) => Some(users.into_iter().collect()),
            },
        }
    }
}

pub async fn get_users(
    State(app): State<AppState>,
    requester: RequesterKey,
    Query(params): Query<ListingParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    ensure_access(app.access.as_ref(), &requester, resource::USERS_GET, None).await?;

    let query = match (params.limit, params.offset) {
        (None, None) => None,
        (limit, offset) => {
            let mut q = UserQuery::new();
            if let Some(limit) = limit {
                q = q.with_limit(limit);
            }
            if let Some(offset) = offset {
                q = q.with_offset(offset);
            }
            Some(q)
        }
    };

    Ok(Json(app.access.get_users(query).await?))
}

pub async fn get_groups(
    State(app): State<AppState>,
    requester: RequesterKey,
    Query(params): Query<ListingParams>,
) -> Result<Json<Vec<GroupItem>>, ApiError> {
    ensure_access(app.access.as_ref(), &requester, resource::GROUPS_GET, None).await?;

    let query = match (params.limit, params.offset) {
        (None, None) => None,
        (limit, offset) => {
            let mut q = GroupQuery::new();
            if let Some(limit) = limit {
                q = q.with_limit(limit);
            }
            if let Some(offset) = offset {
                q = q.with_offset(offset);
            }
            Some(q)
        }
    };

    let groups = app.access.get_groups(query).await?;

    Ok(Json(groups.into_iter().map(GroupItem::from_group).collect()))
}

pub async fn get_group(
    State(app): State<AppState>,
    Path(name): Path<String>,
    requester: RequesterKey,
) -> Result<Json<GroupItem>, ApiError> {
    ensure_access(app.access.as_ref(), &requester, resource::GROUP_GET, None).await?;

    // A group that exists with zero resources is a valid, empty response;
    // only an unknown name is a 404.
    match app.access.get_group(&name).await? {
        Some(group) => Ok(Json(GroupItem::from_group(group))),
        None => Err(ApiError::NotFound(format!("group not found: {name}"))),
    }
}

pub async fn get_access_list(
    State(app): State<AppState>,
    Path(public_key): Path<String>,
    requester: RequesterKey,
) -> Result<Json<Vec<AccessEntryItem>>, ApiError> {
    ensure_access(
        app.access.as_ref(),
        &requester,
        resource::ACCESS_LIST_GET,
        None,
    )
    .await?;

    if !app.access.public_key_exists(&public_key).await? {
        return Err(ApiError::NotFound(format!(
            "public key not found: {public_key}"
        )));
    }

    let entries = app.access.get_access_list_for_public_key(&public_key).await?;

    Ok(Json(
        entries.into_iter().map(AccessEntryItem::from_entry).collect(),
    ))
}
