//! HTTP front door
//!
//! All pages live under the configured base URL. Everything except the
//! favicon requires an admitted hub user.

mod handlers;
mod middleware;

pub use middleware::require_user;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::services::ServeFile;

use crate::authenticator::SessionAuthenticator;
use crate::config::Config;
use crate::controller::SessionController;
use crate::views::TemplateRenderer;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub authenticator: Arc<SessionAuthenticator>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn base_url(&self) -> String {
        self.config.server.normalized_base_url()
    }

    /// Absolute path of a per-user page
    pub fn page_url(&self, page: &str, user: &str, server: &str) -> String {
        let mut url = format!("{}{page}/{}", self.base_url(), urlencoding::encode(user));
        if !server.is_empty() {
            url.push('/');
            url.push_str(&urlencoding::encode(server));
        }
        url
    }
}

pub fn router(state: AppState) -> Router {
    let mut hub = Router::new()
        .route(
            "/spawn",
            get(handlers::spawn_page).post(handlers::spawn_submit),
        )
        .route(
            "/spawn/:user",
            get(handlers::spawn_page).post(handlers::spawn_submit),
        )
        .route(
            "/spawn/:user/:server",
            get(handlers::spawn_page).post(handlers::spawn_submit),
        )
        .route(
            "/tenant",
            get(handlers::tenant_page).post(handlers::tenant_submit),
        )
        .route(
            "/tenant/:user",
            get(handlers::tenant_page).post(handlers::tenant_submit),
        )
        .route(
            "/tenant/:user/:server",
            get(handlers::tenant_page).post(handlers::tenant_submit),
        )
        .route(
            "/spawner",
            get(handlers::spawner_page).post(handlers::spawner_submit),
        )
        .route(
            "/spawner/:user",
            get(handlers::spawner_page).post(handlers::spawner_submit),
        )
        .route(
            "/spawner/:user/:server",
            get(handlers::spawner_page).post(handlers::spawner_submit),
        )
        .route("/logout", get(handlers::logout))
        .route("/api/users/:user/sessions", get(handlers::list_sessions))
        .route_layer(from_fn_with_state(state.clone(), require_user));

    if let Some(favicon) = &state.config.server.favicon {
        let file = ServeFile::new(favicon);
        hub = hub
            .route_service("/favicon", file.clone())
            .route_service("/favicon.ico", file);
    }

    let base_url = state.base_url();
    let hub = hub.with_state(state);
    match base_url.trim_end_matches('/') {
        "" => hub,
        prefix => Router::new().nest(prefix, hub),
    }
}
