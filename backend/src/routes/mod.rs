pub mod chat;
pub mod health;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Build the `/api` router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(chat::router(state))
}
