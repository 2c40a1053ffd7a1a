use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::{
    error::{ApiError, ApiResult},
    models::Role,
    token::{Claims, TokenService},
};

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request, taken verbatim from the
/// verified token claims. The role is the one captured at login; it is not
/// re-read from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    /// `usuario.id` of the token holder.
    pub id: i32,
    pub email: String,
    pub role: Role,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

impl AuthUser {
    /// Passes when the caller is the target user or an administrator.
    pub fn ensure_self_or_admin(&self, target_id: i32) -> ApiResult<()> {
        if self.id == target_id || self.role.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden(
                "Acceso denegado: solo puedes gestionar tu propia cuenta",
            ))
        }
    }
}

/// authenticate
///
/// The per-request state machine:
/// no `Authorization` header is 401, a header without a bearer token is 401,
/// and a token that fails verification (bad signature, expired, malformed) is 403.
pub fn authenticate(headers: &HeaderMap, tokens: &TokenService) -> ApiResult<AuthUser> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Token no proporcionado"))?;

    let token = value
        .to_str()
        .ok()
        .and_then(bearer_token)
        .ok_or_else(|| ApiError::unauthorized("Token inválido o ausente"))?;

    let claims = tokens.verify(token).map_err(|e| {
        tracing::debug!("token rejected: {}", e);
        ApiError::from(e)
    })?;

    Ok(claims.into())
}

/// Pulls `<token>` out of `Bearer <token>`. The scheme is matched case-insensitively.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// AuthUser Extractor Implementation
///
/// Reuses the identity `require_auth` already attached to the request when the
/// route sits behind it; otherwise runs `authenticate` on the headers itself.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let tokens = TokenService::from_ref(state);
        let user = authenticate(&parts.headers, &tokens)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// require_auth
///
/// Route layer for every protected router. Short-circuits with 401/403 before the
/// handler runs and attaches the resolved `AuthUser` to the request extensions.
pub async fn require_auth(
    State(tokens): State<TokenService>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(request.headers(), &tokens)?;
    tracing::debug!(user_id = user.id, role = %user.role, "request authenticated");
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// RoleGate
///
/// Role policies applied downstream of authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleGate {
    AdminOnly,
    AdminOrProfessor,
}

impl RoleGate {
    pub fn allows(&self, role: Role) -> bool {
        match self {
            RoleGate::AdminOnly => role.is_admin(),
            RoleGate::AdminOrProfessor => role.is_admin_or_professor(),
        }
    }

    pub fn check(&self, user: &AuthUser) -> ApiResult<()> {
        if self.allows(user.role) {
            return Ok(());
        }
        tracing::warn!(user_id = user.id, role = %user.role, gate = ?self, "role gate denied request");
        Err(ApiError::forbidden(match self {
            RoleGate::AdminOnly => "Acceso denegado: solo administradores",
            RoleGate::AdminOrProfessor => "Acceso denegado: se requiere rol profesor o admin",
        }))
    }
}

/// AdminOnly
///
/// Extractor that authenticates and then requires the administrator role.
#[derive(Debug, Clone)]
pub struct AdminOnly(pub AuthUser);

impl<S> FromRequestParts<S> for AdminOnly
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        RoleGate::AdminOnly.check(&user)?;
        Ok(AdminOnly(user))
    }
}

/// AdminOrProfessor
///
/// Extractor that authenticates and then requires the administrator or professor role.
#[derive(Debug, Clone)]
pub struct AdminOrProfessor(pub AuthUser);

impl<S> FromRequestParts<S> for AdminOrProfessor
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        RoleGate::AdminOrProfessor.check(&user)?;
        Ok(AdminOrProfessor(user))
    }
}
