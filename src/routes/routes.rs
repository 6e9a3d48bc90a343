//! Defines the uploader's routes.
//!
//! ## Structure
//! - `GET    /`        upload page (any method other than POST)
//! - `POST   /`        multipart upload, answers with the public URL
//! - anything else     `302 Location: /`
//!
//! Basic auth, when configured, wraps every route including the fallback.

use crate::{
    handlers::upload_handlers::{redirect_to_root, upload_file, upload_form},
    middleware::basic_auth::{Credentials, basic_auth},
    services::upload_service::UploadService,
};
use axum::{Router, extract::DefaultBodyLimit, middleware, routing::post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Read-only state shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub credentials: Option<Arc<Credentials>>,
}

impl AppState {
    pub fn new(uploads: UploadService, credentials: Option<Credentials>) -> Self {
        Self {
            uploads: Arc::new(uploads),
            credentials: credentials.map(Arc::new),
        }
    }
}

/// Build the router with auth, tracing and state applied.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(upload_file).fallback(upload_form))
        .fallback(redirect_to_root)
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
