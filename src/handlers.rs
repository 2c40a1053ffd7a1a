use crate::{
    AppState,
    auth::{AdminOnly, AdminOrProfessor, AuthUser},
    error::{ApiError, ApiResult},
    models::{
        AccountStatus, Categoria, CreateCategoriaRequest, CreateForoRequest, CreatePostRequest,
        CreateUsuarioRequest, DevPasswordResetRequest, Foro, LoginRequest, LoginResponse,
        MessageResponse, NewUsuario, Post, PostCreatedResponse, Role, SessionUser,
        UpdateCategoriaRequest, UpdateForoRequest, UpdatePasswordRequest, UpdateUsuarioRequest,
        UsuarioResponse, UsuariosResponse,
    },
    password::{hash_password, verify_password},
    posts::{self, NewPost},
    repository::RepoError,
    token::TokenSubject,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Every account must belong to the institutional mail domain.
pub const INSTITUTIONAL_DOMAIN: &str = "@cucep.edu.mx";

/// The bootstrap administrator. Cannot be deactivated through the API.
pub const PRINCIPAL_ADMIN_EMAIL: &str = "admin@cucep.edu.mx";

pub const MIN_PASSWORD_LEN: usize = 6;

/// Blank optional strings are stored as NULL.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// --- Auth ---

/// login
///
/// [Public Route] Exchanges institutional credentials for a signed token.
///
/// Checks run in a fixed order so the status code tells the client what went
/// wrong: missing fields (400), unknown email (404), inactive account (403),
/// wrong password (401). Only an active account with a matching password
/// receives a token.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing credentials"),
        (status = 401, description = "Wrong password"),
        (status = 403, description = "Account inactive or suspended"),
        (status = 404, description = "Unknown email")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let correo = payload.correo.trim();
    if correo.is_empty() || payload.contrasena.is_empty() {
        return Err(ApiError::validation("Correo y contraseña son requeridos"));
    }

    let usuario = state
        .repo
        .find_user_by_email(correo)
        .await?
        .ok_or_else(|| ApiError::not_found("Usuario no encontrado"))?;

    if usuario.estado_cuenta != AccountStatus::Active {
        tracing::warn!(user_id = usuario.id, estado = usuario.estado_cuenta.as_str(), "login refused for non-active account");
        return Err(ApiError::forbidden("Cuenta inactiva o suspendida"));
    }

    if !verify_password(&payload.contrasena, &usuario.password_hash) {
        tracing::info!(user_id = usuario.id, "login failed: wrong password");
        return Err(ApiError::unauthorized("Contraseña incorrecta"));
    }

    let token = state.tokens.issue(&TokenSubject::from(&usuario))?;

    // Last-login bookkeeping never blocks a successful login.
    if let Err(e) = state.repo.record_login(usuario.id).await {
        tracing::warn!(user_id = usuario.id, "could not record login time: {}", e);
    }

    tracing::info!(user_id = usuario.id, role = %usuario.tipo_usuario, "login successful");
    Ok(Json(LoginResponse {
        mensaje: "Login exitoso".to_string(),
        token,
        usuario: SessionUser::from(&usuario),
    }))
}

/// dev_update_password
///
/// [Public Route, local environment only] Re-hashes and stores a password for
/// the given email. Only mounted when `APP_ENV` is not `production`.
#[utoipa::path(
    post,
    path = "/api/auth/update-password",
    request_body = DevPasswordResetRequest,
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Missing fields"),
        (status = 404, description = "Unknown email")
    )
)]
pub async fn dev_update_password(
    State(state): State<AppState>,
    Json(payload): Json<DevPasswordResetRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Email y password son requeridos"));
    }

    let digest = hash_password(&payload.password)?;
    if !state.repo.set_password_hash_by_email(email, &digest).await? {
        return Err(ApiError::not_found("Usuario no encontrado"));
    }

    tracing::warn!(email, "password replaced through the development reset route");
    Ok(Json(MessageResponse::new("Contraseña actualizada exitosamente")))
}

/// api_test
///
/// [Public Route] Liveness probe under the `/api` prefix.
#[utoipa::path(
    get,
    path = "/api/test",
    responses((status = 200, description = "API is up", body = MessageResponse))
)]
pub async fn api_test() -> Json<MessageResponse> {
    Json(MessageResponse::new("La API funciona correctamente"))
}

// --- Usuarios ---

/// list_users
///
/// [Admin Route] Every identity, newest first.
#[utoipa::path(
    get,
    path = "/api/usuarios",
    responses(
        (status = 200, description = "All users", body = UsuariosResponse),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn list_users(
    _admin: AdminOnly,
    State(state): State<AppState>,
) -> ApiResult<Json<UsuariosResponse>> {
    let usuarios = state.repo.list_users().await?;
    Ok(Json(UsuariosResponse::new("Usuarios obtenidos exitosamente", usuarios)))
}

/// list_users_by_role
///
/// [Admin Route] Filters identities by `tipo_usuario`.
#[utoipa::path(
    get,
    path = "/api/usuarios/tipo/{tipo}",
    params(("tipo" = String, Path, description = "estudiante, profesor or administrador")),
    responses(
        (status = 200, description = "Users of that type", body = UsuariosResponse),
        (status = 400, description = "Unknown type")
    )
)]
pub async fn list_users_by_role(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Path(tipo): Path<String>,
) -> ApiResult<Json<UsuariosResponse>> {
    let role: Role = tipo.parse().map_err(|_| {
        ApiError::validation(
            "Tipo de usuario inválido. Debe ser: estudiante, profesor o administrador",
        )
    })?;

    let usuarios = state.repo.list_users_by_role(role).await?;
    Ok(Json(UsuariosResponse::new(
        format!("Usuarios de tipo {role} obtenidos exitosamente"),
        usuarios,
    )))
}

/// list_pending_professors
///
/// [Admin Route] Professors whose credentials have not been validated yet.
#[utoipa::path(
    get,
    path = "/api/usuarios/profesores/pendientes",
    responses((status = 200, description = "Pending professors", body = UsuariosResponse))
)]
pub async fn list_pending_professors(
    _admin: AdminOnly,
    State(state): State<AppState>,
) -> ApiResult<Json<UsuariosResponse>> {
    let usuarios = state.repo.list_pending_professors().await?;
    Ok(Json(UsuariosResponse::new(
        "Profesores pendientes obtenidos exitosamente",
        usuarios,
    )))
}

/// get_user
///
/// [Authenticated Route] One identity. Callers may read their own record;
/// administrators may read any.
#[utoipa::path(
    get,
    path = "/api/usuarios/{id}",
    params(("id" = i32, Path, description = "usuario.id")),
    responses(
        (status = 200, description = "User", body = UsuarioResponse),
        (status = 403, description = "Neither self nor administrator"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn get_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<UsuarioResponse>> {
    user.ensure_self_or_admin(id)?;

    let usuario = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Usuario no encontrado"))?;

    Ok(Json(UsuarioResponse {
        mensaje: "Usuario obtenido exitosamente".to_string(),
        usuario,
    }))
}

/// create_user
///
/// [Admin Route] Registers a new identity in the institutional domain.
///
/// Students must carry a matricula and professors a cedula profesional. The
/// password is hashed before it reaches the repository.
#[utoipa::path(
    post,
    path = "/api/usuarios",
    request_body = CreateUsuarioRequest,
    responses(
        (status = 201, description = "User created", body = UsuarioResponse),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Email, matricula or cedula already registered")
    )
)]
pub async fn create_user(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Json(payload): Json<CreateUsuarioRequest>,
) -> ApiResult<(StatusCode, Json<UsuarioResponse>)> {
    let email = payload.email.trim().to_string();
    if payload.nombre.trim().is_empty()
        || payload.apellido_paterno.trim().is_empty()
        || email.is_empty()
        || payload.password.is_empty()
        || payload.tipo_usuario.trim().is_empty()
    {
        return Err(ApiError::validation(
            "Faltan campos obligatorios: nombre, apellido_paterno, email, password, tipo_usuario",
        ));
    }

    if !email.ends_with(INSTITUTIONAL_DOMAIN) {
        return Err(ApiError::validation(format!(
            "El email debe ser del dominio {INSTITUTIONAL_DOMAIN}"
        )));
    }

    let tipo_usuario: Role = payload.tipo_usuario.trim().parse().map_err(|_| {
        ApiError::validation(
            "Tipo de usuario inválido. Debe ser: estudiante, profesor o administrador",
        )
    })?;

    let matricula = non_blank(payload.matricula);
    let cedula_profesional = non_blank(payload.cedula_profesional);

    match tipo_usuario {
        Role::Student if matricula.is_none() => {
            return Err(ApiError::validation(
                "Los estudiantes deben proporcionar una matrícula",
            ));
        }
        Role::Professor if cedula_profesional.is_none() => {
            return Err(ApiError::validation(
                "Los profesores deben proporcionar una cédula profesional",
            ));
        }
        _ => {}
    }

    if state.repo.email_exists(&email).await? {
        return Err(ApiError::conflict("El email ya está registrado"));
    }

    let new_user = NewUsuario {
        nombre: payload.nombre.trim().to_string(),
        apellido_paterno: payload.apellido_paterno.trim().to_string(),
        apellido_materno: non_blank(payload.apellido_materno),
        email,
        password_hash: hash_password(&payload.password)?,
        tipo_usuario,
        matricula,
        cedula_profesional,
        telefono: non_blank(payload.telefono),
    };

    let usuario = state.repo.create_user(new_user).await.map_err(|e| match e {
        RepoError::Conflict(_) => {
            ApiError::conflict("El email, matrícula o cédula ya están registrados")
        }
        other => other.into(),
    })?;

    tracing::info!(user_id = usuario.id, created_by = admin.id, role = %usuario.tipo_usuario, "user created");
    Ok((
        StatusCode::CREATED,
        Json(UsuarioResponse {
            mensaje: "Usuario creado exitosamente".to_string(),
            usuario,
        }),
    ))
}

/// update_user
///
/// [Authenticated Route] Partial profile update for self or, for administrators,
/// any user. Only administrators may change `estado_cuenta`.
#[utoipa::path(
    put,
    path = "/api/usuarios/{id}",
    params(("id" = i32, Path, description = "usuario.id")),
    request_body = UpdateUsuarioRequest,
    responses(
        (status = 200, description = "User updated", body = UsuarioResponse),
        (status = 400, description = "Nothing to update"),
        (status = 403, description = "Not allowed"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn update_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUsuarioRequest>,
) -> ApiResult<Json<UsuarioResponse>> {
    user.ensure_self_or_admin(id)?;

    if payload.estado_cuenta.is_some() && !user.role.is_admin() {
        return Err(ApiError::forbidden(
            "Acceso denegado: solo administradores pueden cambiar el estado de la cuenta",
        ));
    }

    if state.repo.get_user(id).await?.is_none() {
        return Err(ApiError::not_found("Usuario no encontrado"));
    }

    if payload.is_empty() {
        return Err(ApiError::validation(
            "No se proporcionaron campos para actualizar",
        ));
    }

    let usuario = state
        .repo
        .update_user(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("Usuario no encontrado"))?;

    Ok(Json(UsuarioResponse {
        mensaje: "Usuario actualizado exitosamente".to_string(),
        usuario,
    }))
}

/// update_user_password
///
/// [Authenticated Route] Changes a password after re-checking the current one.
#[utoipa::path(
    put,
    path = "/api/usuarios/{id}/password",
    params(("id" = i32, Path, description = "usuario.id")),
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Missing or too short"),
        (status = 401, description = "Current password is wrong"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn update_user_password(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    user.ensure_self_or_admin(id)?;

    if payload.password_actual.is_empty() || payload.password_nuevo.is_empty() {
        return Err(ApiError::validation(
            "Se requiere la contraseña actual y la nueva contraseña",
        ));
    }

    if payload.password_nuevo.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "La nueva contraseña debe tener al menos {MIN_PASSWORD_LEN} caracteres"
        )));
    }

    let usuario = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Usuario no encontrado"))?;

    if !verify_password(&payload.password_actual, &usuario.password_hash) {
        return Err(ApiError::unauthorized("La contraseña actual es incorrecta"));
    }

    let digest = hash_password(&payload.password_nuevo)?;
    if !state.repo.update_password_hash(id, &digest).await? {
        return Err(ApiError::not_found("Usuario no encontrado"));
    }

    tracing::info!(user_id = id, changed_by = user.id, "password changed");
    Ok(Json(MessageResponse::new("Contraseña actualizada exitosamente")))
}

/// deactivate_user
///
/// [Admin Route] Soft delete: the row stays, `estado_cuenta` becomes `inactivo`.
#[utoipa::path(
    delete,
    path = "/api/usuarios/{id}",
    params(("id" = i32, Path, description = "usuario.id")),
    responses(
        (status = 200, description = "User deactivated", body = MessageResponse),
        (status = 403, description = "Principal administrator is protected"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn deactivate_user(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<MessageResponse>> {
    let usuario = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Usuario no encontrado"))?;

    if usuario.email == PRINCIPAL_ADMIN_EMAIL {
        return Err(ApiError::forbidden(
            "No se puede eliminar el administrador principal del sistema",
        ));
    }

    if !state.repo.deactivate_user(id).await? {
        return Err(ApiError::not_found("Usuario no encontrado"));
    }

    tracing::info!(user_id = id, deactivated_by = admin.id, "user deactivated");
    Ok(Json(MessageResponse::new("Usuario desactivado exitosamente")))
}

// --- Foros ---

#[utoipa::path(
    get,
    path = "/api/foros",
    responses((status = 200, description = "All foros", body = [Foro]))
)]
pub async fn list_foros(State(state): State<AppState>) -> ApiResult<Json<Vec<Foro>>> {
    Ok(Json(state.repo.list_foros().await?))
}

#[utoipa::path(
    get,
    path = "/api/foros/{id}",
    params(("id" = i32, Path, description = "foro.id")),
    responses(
        (status = 200, description = "Foro", body = Foro),
        (status = 404, description = "Unknown foro")
    )
)]
pub async fn get_foro(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Foro>> {
    state
        .repo
        .get_foro(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Foro no encontrado"))
}

/// create_foro
///
/// [Admin or Professor Route] Opens a new foro owned by the caller.
#[utoipa::path(
    post,
    path = "/api/foros",
    request_body = CreateForoRequest,
    responses(
        (status = 201, description = "Foro created", body = Foro),
        (status = 400, description = "Missing titulo")
    )
)]
pub async fn create_foro(
    AdminOrProfessor(user): AdminOrProfessor,
    State(state): State<AppState>,
    Json(mut payload): Json<CreateForoRequest>,
) -> ApiResult<(StatusCode, Json<Foro>)> {
    payload.titulo = payload.titulo.trim().to_string();
    if payload.titulo.is_empty() {
        return Err(ApiError::validation("El título del foro es requerido"));
    }

    let foro = state.repo.create_foro(payload, user.id).await?;
    tracing::info!(foro_id = foro.id, created_by = user.id, "foro created");
    Ok((StatusCode::CREATED, Json(foro)))
}

#[utoipa::path(
    put,
    path = "/api/foros/{id}",
    params(("id" = i32, Path, description = "foro.id")),
    request_body = UpdateForoRequest,
    responses(
        (status = 200, description = "Foro updated", body = Foro),
        (status = 404, description = "Unknown foro")
    )
)]
pub async fn update_foro(
    _admin: AdminOrProfessor,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateForoRequest>,
) -> ApiResult<Json<Foro>> {
    if matches!(payload.titulo.as_deref(), Some(t) if t.trim().is_empty()) {
        return Err(ApiError::validation("El título del foro no puede estar vacío"));
    }

    state
        .repo
        .update_foro(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Foro no encontrado"))
}

#[utoipa::path(
    delete,
    path = "/api/foros/{id}",
    params(("id" = i32, Path, description = "foro.id")),
    responses(
        (status = 200, description = "Foro deleted", body = MessageResponse),
        (status = 404, description = "Unknown foro"),
        (status = 409, description = "Foro still referenced")
    )
)]
pub async fn delete_foro(
    AdminOrProfessor(user): AdminOrProfessor,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.repo.delete_foro(id).await? {
        return Err(ApiError::not_found("Foro no encontrado"));
    }
    tracing::info!(foro_id = id, deleted_by = user.id, "foro deleted");
    Ok(Json(MessageResponse::new("Foro eliminado exitosamente")))
}

// --- Publicaciones ---

/// list_posts
///
/// [Authenticated Route] A foro's posts merged from every storage layout that
/// exists, oldest first. Each post says which layout it came from.
#[utoipa::path(
    get,
    path = "/api/foros/{id}/publicaciones",
    params(("id" = i32, Path, description = "foro.id")),
    responses(
        (status = 200, description = "Posts", body = [Post]),
        (status = 404, description = "Unknown foro")
    )
)]
pub async fn list_posts(
    State(state): State<AppState>,
    Path(foro_id): Path<i32>,
) -> ApiResult<Json<Vec<Post>>> {
    if state.repo.get_foro(foro_id).await?.is_none() {
        return Err(ApiError::not_found("Foro no encontrado"));
    }
    Ok(Json(posts::read_posts(state.posts.as_ref(), foro_id).await))
}

/// create_post
///
/// [Authenticated Route] Stores a post authored by the caller through the
/// fallback writer. A 500 from here carries every failed attempt in `intentos`.
#[utoipa::path(
    post,
    path = "/api/foros/{id}/publicaciones",
    params(("id" = i32, Path, description = "foro.id")),
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Post stored", body = PostCreatedResponse),
        (status = 400, description = "Empty content"),
        (status = 404, description = "Unknown foro"),
        (status = 500, description = "No storage layout accepted the post")
    )
)]
pub async fn create_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(foro_id): Path<i32>,
    Json(payload): Json<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<PostCreatedResponse>)> {
    let contenido = payload.contenido.trim();
    if contenido.is_empty() {
        return Err(ApiError::validation("El contenido de la publicación es requerido"));
    }

    if state.repo.get_foro(foro_id).await?.is_none() {
        return Err(ApiError::not_found("Foro no encontrado"));
    }

    let new_post = NewPost {
        foro_id,
        autor_id: user.id,
        contenido: contenido.to_string(),
    };
    let written = posts::write_post(state.posts.as_ref(), &new_post).await?;

    Ok((
        StatusCode::CREATED,
        Json(PostCreatedResponse {
            mensaje: "Publicación creada exitosamente".to_string(),
            publicacion: written.post,
            estrategia: written.strategy,
            intentos_fallidos: written.failed_attempts,
        }),
    ))
}

// --- Categorias ---

#[utoipa::path(
    get,
    path = "/api/categorias",
    responses((status = 200, description = "All categories", body = [Categoria]))
)]
pub async fn list_categorias(State(state): State<AppState>) -> ApiResult<Json<Vec<Categoria>>> {
    Ok(Json(state.repo.list_categorias().await?))
}

#[utoipa::path(
    get,
    path = "/api/categorias/{id}",
    params(("id" = i32, Path, description = "categoria.id")),
    responses(
        (status = 200, description = "Category", body = Categoria),
        (status = 404, description = "Unknown category")
    )
)]
pub async fn get_categoria(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Categoria>> {
    state
        .repo
        .get_categoria(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Categoría no encontrada"))
}

#[utoipa::path(
    post,
    path = "/api/categorias",
    request_body = CreateCategoriaRequest,
    responses(
        (status = 201, description = "Category created", body = Categoria),
        (status = 400, description = "Missing nombre"),
        (status = 409, description = "Duplicate nombre")
    )
)]
pub async fn create_categoria(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Json(mut payload): Json<CreateCategoriaRequest>,
) -> ApiResult<(StatusCode, Json<Categoria>)> {
    payload.nombre = payload.nombre.trim().to_string();
    if payload.nombre.is_empty() {
        return Err(ApiError::validation("El nombre de la categoría es requerido"));
    }

    let categoria = state.repo.create_categoria(payload).await.map_err(|e| match e {
        RepoError::Conflict(_) => ApiError::conflict("Ya existe una categoría con ese nombre"),
        other => other.into(),
    })?;
    Ok((StatusCode::CREATED, Json(categoria)))
}

#[utoipa::path(
    put,
    path = "/api/categorias/{id}",
    params(("id" = i32, Path, description = "categoria.id")),
    request_body = UpdateCategoriaRequest,
    responses(
        (status = 200, description = "Category updated", body = Categoria),
        (status = 404, description = "Unknown category")
    )
)]
pub async fn update_categoria(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateCategoriaRequest>,
) -> ApiResult<Json<Categoria>> {
    state
        .repo
        .update_categoria(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Categoría no encontrada"))
}

#[utoipa::path(
    delete,
    path = "/api/categorias/{id}",
    params(("id" = i32, Path, description = "categoria.id")),
    responses(
        (status = 200, description = "Category deleted", body = MessageResponse),
        (status = 404, description = "Unknown category")
    )
)]
pub async fn delete_categoria(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.repo.delete_categoria(id).await? {
        return Err(ApiError::not_found("Categoría no encontrada"));
    }
    Ok(Json(MessageResponse::new("Categoría eliminada exitosamente")))
}
