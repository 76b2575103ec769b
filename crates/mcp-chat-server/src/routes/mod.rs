pub mod chat;
pub mod status;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

pub fn configure(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(status::routes())
        .merge(chat::routes(state))
}
