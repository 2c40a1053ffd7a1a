use crate::{AppState, config::Env, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that accept anonymous requests. The development password reset is
/// only mounted outside production.
pub fn public_routes(env: &Env) -> Router<AppState> {
    let router = Router::new()
        // GET /health
        // Load balancer probe. Does not touch the database.
        .route("/health", get(|| async { "ok" }))
        // GET /api/test
        // Liveness probe under the API prefix, kept for the existing frontend.
        .route("/api/test", get(handlers::api_test))
        // POST /api/auth/login
        // Exchanges correo/contrasena for a token and the session identity.
        .route("/api/auth/login", post(handlers::login));

    match env {
        // POST /api/auth/update-password
        // Development tool: overwrite a password by email without the current one.
        Env::Local => router.route(
            "/api/auth/update-password",
            post(handlers::dev_update_password),
        ),
        Env::Production => router,
    }
}
