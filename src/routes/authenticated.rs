use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Authenticated Router Module
///
/// Everything under `/api` that needs a token. The caller wraps this router in
/// `require_auth`, so every handler here runs with a verified `AuthUser` in the
/// request extensions. Role requirements live in the handler signatures.
pub fn authenticated_routes() -> Router<AppState> {
    Router::new()
        .nest("/api/usuarios", usuario_routes())
        .nest("/api/foros", foro_routes())
        .nest("/api/categorias", categoria_routes())
}

fn usuario_routes() -> Router<AppState> {
    Router::new()
        // GET/POST /api/usuarios
        // Admin: list every identity, or register a new one.
        .route(
            "/",
            get(handlers::list_users).post(handlers::create_user),
        )
        // GET /api/usuarios/tipo/{tipo}
        // Admin: identities of one role.
        .route("/tipo/{tipo}", get(handlers::list_users_by_role))
        // GET /api/usuarios/profesores/pendientes
        // Admin: professors awaiting credential validation.
        .route(
            "/profesores/pendientes",
            get(handlers::list_pending_professors),
        )
        // GET/PUT/DELETE /api/usuarios/{id}
        // Self or admin may read and update; only admin may deactivate.
        .route(
            "/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::deactivate_user),
        )
        // PUT /api/usuarios/{id}/password
        // Self or admin, with the current password.
        .route("/{id}/password", put(handlers::update_user_password))
}

fn foro_routes() -> Router<AppState> {
    Router::new()
        // GET/POST /api/foros
        // Anyone authenticated may list; admin or professor may create.
        .route("/", get(handlers::list_foros).post(handlers::create_foro))
        // GET/PUT/DELETE /api/foros/{id}
        .route(
            "/{id}",
            get(handlers::get_foro)
                .put(handlers::update_foro)
                .delete(handlers::delete_foro),
        )
        // GET/POST /api/foros/{id}/publicaciones
        // Posts are written through the fallback writer.
        .route(
            "/{id}/publicaciones",
            get(handlers::list_posts).post(handlers::create_post),
        )
}

fn categoria_routes() -> Router<AppState> {
    Router::new()
        // GET/POST /api/categorias
        // Anyone authenticated may list; only admin may create.
        .route(
            "/",
            get(handlers::list_categorias).post(handlers::create_categoria),
        )
        // GET/PUT/DELETE /api/categorias/{id}
        .route(
            "/{id}",
            get(handlers::get_categoria)
                .put(handlers::update_categoria)
                .delete(handlers::delete_categoria),
        )
}
