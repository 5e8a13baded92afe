pub mod control;
pub mod executions;
pub mod health;
pub mod progress_stream;

use axum::Router;
use crate::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Health check route (no auth required)
        .merge(health::routes())
        .nest(
            "/api/v1/automation",
            control::routes()
                .merge(progress_stream::routes())
                .nest("/executions", executions::routes()),
        )
}
