use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::require_viewer;
use crate::error::Result;
use crate::services::{CommunityService, CommunityTreeCache};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommunityRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub parent_id: Option<i64>,
}

pub struct CommunityHandlerState {
    pub communities: Arc<CommunityService>,
    pub tree: Arc<CommunityTreeCache>,
}

/// Children and ancestors of a community, from the cached hierarchy.
pub async fn get_community_position(
    path: web::Path<i64>,
    state: web::Data<CommunityHandlerState>,
) -> Result<HttpResponse> {
    let position = state.tree.position(path.into_inner());
    Ok(HttpResponse::Ok().json(position))
}

pub async fn create_community(
    body: web::Json<CreateCommunityRequest>,
    http_req: HttpRequest,
    state: web::Data<CommunityHandlerState>,
) -> Result<HttpResponse> {
    require_viewer(&http_req)?;
    body.validate()?;

    let community = state
        .communities
        .create_community(&body.name, body.parent_id)
        .await?;

    Ok(HttpResponse::Created().json(community))
}
