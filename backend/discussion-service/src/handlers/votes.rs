use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::require_viewer;
use crate::config::VoteConfig;
use crate::error::Result;
use crate::services::{RequestContext, VoteLedger};

/// `value` is -1, 0 (retract) or 1; anything else is rejected by the ledger.
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub value: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub post_id: i64,
    pub transition: &'static str,
    pub delta_total: i64,
    pub delta_count: i64,
}

pub struct VoteHandlerState {
    pub ledger: Arc<VoteLedger>,
    pub config: VoteConfig,
}

pub async fn apply_vote(
    path: web::Path<i64>,
    body: web::Json<VoteRequest>,
    http_req: HttpRequest,
    state: web::Data<VoteHandlerState>,
) -> Result<HttpResponse> {
    let voter = require_viewer(&http_req)?;
    let post_id = path.into_inner();
    let ctx = RequestContext::with_timeout(state.config.request_timeout());

    let outcome = state
        .ledger
        .apply_vote(&voter, post_id, body.value, &ctx)
        .await?;

    Ok(HttpResponse::Ok().json(VoteResponse {
        post_id,
        transition: outcome.transition.as_str(),
        delta_total: outcome.delta_total,
        delta_count: outcome.delta_count,
    }))
}
