use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

use super::optional_viewer;
use crate::config::FeedConfig;
use crate::error::{AppError, Result};
use crate::models::{FeedResponse, UserId, Visibility};
use crate::services::feed::{FeedCursor, FeedOrder, FeedService, PagingFilter};
use crate::services::RequestContext;

/// Feed request. A `cursor` continues an earlier feed and carries its own
/// filters; without one the filter fields start a new feed.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequest {
    pub order: FeedOrder,
    pub cursor: Option<String>,
    #[validate(range(min = 1))]
    pub limit: Option<i64>,
    pub communities: Option<Vec<i64>>,
    #[validate(length(min = 1, max = 128))]
    pub by_user: Option<String>,
    pub visibility: Option<Visibility>,
    pub since: Option<DateTime<Utc>>,
}

impl FeedRequest {
    fn has_start_filters(&self) -> bool {
        self.communities.is_some()
            || self.by_user.is_some()
            || self.visibility.is_some()
            || self.since.is_some()
    }

    fn start_cursor(&self) -> Result<FeedCursor> {
        let scoped = matches!(
            self.order,
            FeedOrder::ByRecencySubscribed | FeedOrder::ByPopularitySubscribed
        );
        if scoped && self.communities.is_some() {
            return Err(AppError::InvalidArgument(
                "subscribed feeds take their communities from the viewer's subscriptions"
                    .to_string(),
            ));
        }

        let filter = PagingFilter {
            communities: self.communities.clone(),
            by_user: self.by_user.clone().map(UserId::new),
            visibility: self.visibility,
        };
        FeedCursor::start(self.order, filter, self.since)
    }
}

pub struct FeedHandlerState {
    pub feed: Arc<FeedService>,
    pub config: FeedConfig,
}

pub async fn fetch_feed(
    body: web::Json<FeedRequest>,
    http_req: HttpRequest,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    body.validate()?;
    let viewer = optional_viewer(&http_req)?;
    let limit = body
        .limit
        .unwrap_or(state.config.default_page_size)
        .min(state.config.max_page_size);
    let ctx = RequestContext::with_timeout(state.config.request_timeout());

    debug!(
        order = body.order.as_str(),
        limit = limit,
        continued = body.cursor.is_some(),
        "Feed request"
    );

    let response: FeedResponse = match &body.cursor {
        Some(token) => {
            if body.has_start_filters() {
                return Err(AppError::InvalidArgument(
                    "filters cannot be changed while continuing a feed".to_string(),
                ));
            }
            state
                .feed
                .fetch_token(Some(token.as_str()), body.order, limit, viewer.as_ref(), &ctx)
                .await?
        }
        None => {
            let cursor = body.start_cursor()?;
            state
                .feed
                .fetch(&cursor, limit, viewer.as_ref(), &ctx)
                .await?
                .into()
        }
    };

    Ok(HttpResponse::Ok().json(response))
}
