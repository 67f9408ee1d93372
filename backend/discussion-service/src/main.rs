use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discussion_service::db::{
    create_pool, CommunityRepository, PostRepository, SubscriptionRepository, VoteRepository,
};
use discussion_service::handlers::{
    self, CommunityHandlerState, FeedHandlerState, VoteHandlerState,
};
use discussion_service::jobs::{start_community_tree_refresher, CommunityTreeRefresherConfig};
use discussion_service::metrics::serve_metrics;
use discussion_service::services::{
    CommunityService, CommunityTreeCache, FeedService, VoteLedger,
};
use discussion_service::Config;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Local .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting discussion-service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app.env);

    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let posts = Arc::new(PostRepository::new(pool.clone()));
    let subscriptions = Arc::new(SubscriptionRepository::new(pool.clone()));
    let communities = Arc::new(CommunityRepository::new(pool.clone()));
    let votes = Arc::new(VoteRepository::new(
        pool.clone(),
        config.database.lock_timeout_ms,
    ));

    // Serving positions from an empty tree is worse than not starting
    let tree = CommunityTreeCache::initialize(
        communities.clone(),
        config.community_tree.build_timeout(),
    )
    .await
    .context("Initial community tree build failed")?;

    tokio::spawn(start_community_tree_refresher(
        tree.clone(),
        CommunityTreeRefresherConfig::from(&config.community_tree),
    ));

    let feed_state = web::Data::new(FeedHandlerState {
        feed: Arc::new(FeedService::new(posts, subscriptions)),
        config: config.feed.clone(),
    });
    let vote_state = web::Data::new(VoteHandlerState {
        ledger: Arc::new(VoteLedger::new(votes, &config.votes)),
        config: config.votes.clone(),
    });
    let community_state = web::Data::new(CommunityHandlerState {
        communities: Arc::new(CommunityService::new(communities, tree.clone())),
        tree,
    });

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Listening on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(feed_state.clone())
            .app_data(vote_state.clone())
            .app_data(community_state.clone())
            .wrap(Logger::default())
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::get().to(serve_metrics))
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await?;

    Ok(())
}
