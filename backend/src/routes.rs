use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{handlers, request_context, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Define routes
    Router::new()
        .route(
            "/api/articles/:article_id/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/api/articles/:article_id/comments/live",
            get(handlers::comments_live),
        )
        .route("/api/comments/:comment_id/like", post(handlers::toggle_like))
        .route(
            "/api/comments/:comment_id/report",
            post(handlers::report_comment),
        )
        .route("/api/comments/:comment_id", delete(handlers::delete_comment))
        .route("/api/moderation/reports", get(handlers::list_reports))
        .route(
            "/api/moderation/reports/:report_id/review",
            post(handlers::review_report),
        )
        .route("/api/notifications", get(handlers::list_notifications))
        .route(
            "/api/notifications/:notification_id/read",
            post(handlers::mark_notification_read),
        )
        .route("/api/profile/avatar", post(handlers::upload_avatar))
        .layer(middleware::from_fn(
            request_context::request_context_middleware,
        ))
        .with_state(state)
        .layer(cors)
}
