use axum::{Router, extract::FromRef, http::HeaderName, middleware};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Server-side services.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod password;
pub mod posts;
pub mod repository;
pub mod token;

// Client-side session helper for Rust consumers of the API.
pub mod client;

// Routing segregated by access level (Public, Authenticated).
pub mod routes;
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use posts::PostStoreState;
pub use repository::{PostgresRepository, RepositoryState};
pub use token::TokenService;

/// ApiDoc
///
/// Auto-generated OpenAPI document for every `#[utoipa::path]` handler and the
/// schemas they exchange. Served at `/api-docs/openapi.json`, browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::dev_update_password, handlers::api_test,
        handlers::list_users, handlers::list_users_by_role, handlers::list_pending_professors,
        handlers::get_user, handlers::create_user, handlers::update_user,
        handlers::update_user_password, handlers::deactivate_user,
        handlers::list_foros, handlers::get_foro, handlers::create_foro,
        handlers::update_foro, handlers::delete_foro,
        handlers::list_posts, handlers::create_post,
        handlers::list_categorias, handlers::get_categoria, handlers::create_categoria,
        handlers::update_categoria, handlers::delete_categoria
    ),
    components(
        schemas(
            models::Role, models::AccountStatus, models::Usuario, models::SessionUser,
            models::Categoria, models::Foro, models::Post,
            models::LoginRequest, models::LoginResponse, models::DevPasswordResetRequest,
            models::CreateUsuarioRequest, models::UpdateUsuarioRequest,
            models::UpdatePasswordRequest, models::CreateForoRequest, models::UpdateForoRequest,
            models::CreateCategoriaRequest, models::UpdateCategoriaRequest,
            models::CreatePostRequest, models::PostCreatedResponse, models::MessageResponse,
            models::UsuarioResponse, models::UsuariosResponse,
            posts::PersistenceStrategy, posts::PersistenceAttempt,
        )
    ),
    tags(
        (name = "foro-api", description = "Foro académico: autenticación, usuarios y foros")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, immutable container of shared services, cloned into every request.
#[derive(Clone)]
pub struct AppState {
    /// Identity, foro and categoria persistence.
    pub repo: RepositoryState,
    /// Post persistence primitives driven by the fallback writer.
    pub posts: PostStoreState,
    /// Signing keys derived from the process-wide secret.
    pub tokens: TokenService,
    pub config: AppConfig,
}

impl AppState {
    /// Wires one `PostgresRepository` in as both the repository and the post store.
    pub fn postgres(pool: sqlx::PgPool, config: AppConfig) -> Self {
        let store = std::sync::Arc::new(PostgresRepository::new(pool));
        Self {
            repo: store.clone(),
            posts: store,
            tokens: TokenService::from_config(&config),
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for PostStoreState {
    fn from_ref(app_state: &AppState) -> PostStoreState {
        app_state.posts.clone()
    }
}

impl FromRef<AppState> for TokenService {
    fn from_ref(app_state: &AppState) -> TokenService {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing tree, attaches authentication to the protected half,
/// and wraps everything in the correlation, tracing and CORS layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes(&state.config.env))
        // route_layer: unmatched paths still 404 instead of 401.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_auth,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Opens the per-request span, tagged with the `x-request-id` assigned by
/// `SetRequestIdLayer` so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
