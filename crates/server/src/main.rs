//! Kaiwa chat server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use kaiwa_api::{chat_socket_handler, middleware::AppState, router as api_router};
use kaiwa_common::Config;
use kaiwa_core::{
    AccountService, ChatService, ConversationService, FriendService, GroupBroadcastService,
    MembershipService,
};
use kaiwa_db::repositories::{
    ConversationRepository, FriendRepository, MessageRepository, UserRepository,
};
use kaiwa_pubsub::RedisGroupBroadcast;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kaiwa=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting kaiwa server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database and run migrations
    let db = kaiwa_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    kaiwa_db::migrate(&db).await?;
    info!("Migrations completed");

    // Connect the group broadcast transport
    info!("Connecting to Redis...");
    let redis_broadcast =
        RedisGroupBroadcast::new(&config.redis.url, &config.redis.prefix).await?;
    redis_broadcast.start();
    let broadcast: GroupBroadcastService = Arc::new(redis_broadcast);
    info!("Group broadcast transport ready");

    // Initialize repositories
    let db = Arc::new(db);
    let user_repo = UserRepository::new(Arc::clone(&db));
    let friend_repo = FriendRepository::new(Arc::clone(&db));
    let conversation_repo = ConversationRepository::new(Arc::clone(&db));
    let message_repo = MessageRepository::new(Arc::clone(&db));

    // Initialize services
    let account_service = AccountService::new(user_repo.clone(), &config.auth.jwt_secret);
    let membership_service = MembershipService::new(conversation_repo.clone());
    let chat_service = ChatService::new(
        conversation_repo.clone(),
        message_repo.clone(),
        user_repo.clone(),
        membership_service,
        broadcast.clone(),
        config.chat.max_message_length,
    );
    let conversation_service = ConversationService::new(
        conversation_repo.clone(),
        message_repo,
        user_repo.clone(),
        friend_repo.clone(),
        config.chat.history_page_size,
    );
    let friend_service = FriendService::new(friend_repo, user_repo, conversation_repo);

    // Create app state
    let state = AppState {
        account_service,
        chat_service,
        conversation_service,
        friend_service,
        broadcast,
    };

    // Build router
    let app = Router::new()
        .route("/chat/channel/{conversation_id}", get(chat_socket_handler))
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            kaiwa_api::middleware::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
