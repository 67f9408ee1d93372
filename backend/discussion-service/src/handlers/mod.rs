/// HTTP handlers for discussion endpoints
///
/// This module contains handlers for:
/// - Feeds: keyset-paginated post listings behind opaque cursors
/// - Votes: casting, changing and retracting a vote on a post
/// - Communities: hierarchy position lookup and community creation
///
/// The caller's identity arrives in the `x-user-id` header, set by the gateway.
use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::{AppError, Result};
use crate::models::UserId;

pub mod communities;
pub mod feed;
pub mod votes;

pub use communities::{create_community, get_community_position, CommunityHandlerState};
pub use feed::{fetch_feed, FeedHandlerState};
pub use votes::{apply_vote, VoteHandlerState};

const USER_ID_HEADER: &str = "x-user-id";

/// Register the `/api/v1` routes. Handler state is provided by the caller.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/feeds", web::post().to(fetch_feed))
            .route("/posts/{id}/votes", web::put().to(apply_vote))
            .service(web::resource("/communities").route(web::post().to(create_community)))
            .route(
                "/communities/{id}/position",
                web::get().to(get_community_position),
            ),
    );
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// The caller's identity, if the request carries one.
fn optional_viewer(req: &HttpRequest) -> Result<Option<UserId>> {
    let Some(header_value) = req.headers().get(USER_ID_HEADER) else {
        return Ok(None);
    };

    let value = header_value
        .to_str()
        .map_err(|_| AppError::Unauthenticated("Invalid x-user-id header".into()))?
        .trim();
    if value.is_empty() {
        return Err(AppError::Unauthenticated(
            "Empty x-user-id header".into(),
        ));
    }

    Ok(Some(UserId::new(value)))
}

fn require_viewer(req: &HttpRequest) -> Result<UserId> {
    optional_viewer(req)?
        .ok_or_else(|| AppError::Unauthenticated("Missing x-user-id header".into()))
}
