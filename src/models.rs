use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::posts::{PersistenceAttempt, PersistenceStrategy};

// --- Enumerations stored as TEXT columns ---

/// Raised when a TEXT column (or request field) holds a value outside an enum's domain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Role
///
/// The RBAC field of an identity. Persisted in `usuario.tipo_usuario` using the
/// Spanish labels the frontend already understands; the English names are accepted
/// on input as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum Role {
    #[serde(rename = "administrador", alias = "admin")]
    Admin,
    #[serde(rename = "profesor", alias = "professor")]
    Professor,
    #[default]
    #[serde(rename = "estudiante", alias = "student")]
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "administrador",
            Role::Professor => "profesor",
            Role::Student => "estudiante",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn is_admin_or_professor(&self) -> bool {
        matches!(self, Role::Admin | Role::Professor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administrador" | "admin" => Ok(Role::Admin),
            "profesor" | "professor" => Ok(Role::Professor),
            "estudiante" | "student" => Ok(Role::Student),
            other => Err(UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// AccountStatus
///
/// Lifecycle of an identity. Accounts are never hard-deleted; deactivation only
/// flips this field to `inactivo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum AccountStatus {
    #[default]
    #[serde(rename = "activo", alias = "active")]
    Active,
    #[serde(rename = "inactivo", alias = "inactive")]
    Inactive,
    #[serde(rename = "suspendido", alias = "suspended")]
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "activo",
            AccountStatus::Inactive => "inactivo",
            AccountStatus::Suspended => "suspendido",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activo" | "active" => Ok(AccountStatus::Active),
            "inactivo" | "inactive" => Ok(AccountStatus::Inactive),
            "suspendido" | "suspended" => Ok(AccountStatus::Suspended),
            other => Err(UnknownVariant {
                kind: "account status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for AccountStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// --- Core Application Schemas (Mapped to Database) ---

/// Usuario
///
/// The canonical identity record stored in the `usuario` table. The password hash
/// is loaded for credential checks but never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Usuario {
    pub id: i32,
    pub nombre: String,
    pub apellido_paterno: String,
    pub apellido_materno: Option<String>,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub tipo_usuario: Role,
    pub matricula: Option<String>,
    pub cedula_profesional: Option<String>,
    pub telefono: Option<String>,
    // 'pendiente' until an administrator validates a professor's credentials.
    pub estado_validacion: Option<String>,
    #[sqlx(try_from = "String")]
    pub estado_cuenta: AccountStatus,
    pub avatar_url: Option<String>,
    #[ts(type = "string")]
    pub fecha_creacion: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub ultima_conexion: Option<DateTime<Utc>>,
}

/// SessionUser
///
/// The identity payload returned by login and cached client-side next to the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SessionUser {
    pub id: i32,
    pub nombre: String,
    pub apellido: String,
    pub email: String,
    pub tipo: Role,
}

impl From<&Usuario> for SessionUser {
    fn from(usuario: &Usuario) -> Self {
        Self {
            id: usuario.id,
            nombre: usuario.nombre.clone(),
            apellido: usuario.apellido_paterno.clone(),
            email: usuario.email.clone(),
            tipo: usuario.tipo_usuario,
        }
    }
}

/// Categoria
///
/// A grouping for foros, stored in the `categoria` table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Categoria {
    pub id: i32,
    pub nombre: String,
    pub descripcion: Option<String>,
}

/// Foro
///
/// A discussion board, stored in the `foro` table. Posts reference it by id.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Foro {
    pub id: i32,
    pub titulo: String,
    pub descripcion: Option<String>,
    pub categoria_id: Option<i32>,
    // FK to usuario.id; NULL for foros seeded before creator tracking existed.
    pub creado_por: Option<i32>,
    #[ts(type = "string")]
    pub fecha_creacion: DateTime<Utc>,
}

/// Post
///
/// Logical view of a forum message, independent of which physical layout stored
/// it. Always loaded joined with the author's identity fields. `origen` is filled
/// in by the writer/reader after the row is decoded.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Post {
    #[ts(type = "number")]
    pub id: i64,
    pub foro_id: i32,
    pub autor_id: i32,
    pub autor_nombre: String,
    pub autor_email: String,
    pub contenido: String,
    #[ts(type = "string")]
    pub fecha_creacion: DateTime<Utc>,
    pub editado: bool,
    // Only the thread-numbered layout assigns sequence numbers.
    pub numero_publicacion: Option<i32>,
    pub es_primera: bool,
    #[sqlx(skip)]
    pub origen: PersistenceStrategy,
}

// --- Request Payloads (Input Schemas) ---

/// LoginRequest
///
/// Input payload for `POST /auth/login`. Missing fields deserialize to empty
/// strings so the handler can answer 400 with a readable message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct LoginRequest {
    #[serde(default)]
    pub correo: String,
    #[serde(default)]
    pub contrasena: String,
}

/// DevPasswordResetRequest
///
/// Input payload for the local-only `POST /auth/update-password` tool.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct DevPasswordResetRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// CreateUsuarioRequest
///
/// Input payload for `POST /usuarios`. `tipo_usuario` is kept as a raw string so an
/// unknown value yields a 400 instead of a deserialization rejection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CreateUsuarioRequest {
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub apellido_paterno: String,
    pub apellido_materno: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tipo_usuario: String,
    pub matricula: Option<String>,
    pub cedula_profesional: Option<String>,
    pub telefono: Option<String>,
}

/// NewUsuario
///
/// A validated creation request with the password already hashed. This is what
/// the repository receives; plaintext never crosses into the persistence layer.
#[derive(Debug, Clone, Default)]
pub struct NewUsuario {
    pub nombre: String,
    pub apellido_paterno: String,
    pub apellido_materno: Option<String>,
    pub email: String,
    pub password_hash: String,
    pub tipo_usuario: Role,
    pub matricula: Option<String>,
    pub cedula_profesional: Option<String>,
    pub telefono: Option<String>,
}

/// UpdateUsuarioRequest
///
/// Partial update payload for `PUT /usuarios/{id}`. Only `Some` fields are written.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct UpdateUsuarioRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apellido_paterno: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apellido_materno: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telefono: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estado_cuenta: Option<AccountStatus>,
}

impl UpdateUsuarioRequest {
    pub fn is_empty(&self) -> bool {
        self.nombre.is_none()
            && self.apellido_paterno.is_none()
            && self.apellido_materno.is_none()
            && self.telefono.is_none()
            && self.avatar_url.is_none()
            && self.estado_cuenta.is_none()
    }
}

/// UpdatePasswordRequest
///
/// Input payload for `PUT /usuarios/{id}/password`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub password_actual: String,
    #[serde(default)]
    pub password_nuevo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CreateForoRequest {
    #[serde(default)]
    pub titulo: String,
    pub descripcion: Option<String>,
    pub categoria_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct UpdateForoRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub titulo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descripcion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categoria_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CreateCategoriaRequest {
    #[serde(default)]
    pub nombre: String,
    pub descripcion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct UpdateCategoriaRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descripcion: Option<String>,
}

/// CreatePostRequest
///
/// Input payload for `POST /foros/{id}/publicaciones`. The author comes from the token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub contenido: String,
}

// --- Response Envelopes (Output Schemas) ---

/// LoginResponse
///
/// Output of a successful login. The client stores `token` and `usuario` together.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub mensaje: String,
    pub token: String,
    pub usuario: SessionUser,
}

/// Plain acknowledgement body.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub mensaje: String,
}

impl MessageResponse {
    pub fn new(mensaje: impl Into<String>) -> Self {
        Self {
            mensaje: mensaje.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UsuarioResponse {
    pub mensaje: String,
    pub usuario: Usuario,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UsuariosResponse {
    pub mensaje: String,
    pub total: usize,
    pub usuarios: Vec<Usuario>,
}

impl UsuariosResponse {
    pub fn new(mensaje: impl Into<String>, usuarios: Vec<Usuario>) -> Self {
        Self {
            mensaje: mensaje.into(),
            total: usuarios.len(),
            usuarios,
        }
    }
}

/// PostCreatedResponse
///
/// Output of the post writer: the stored post, the layout that accepted it, and
/// every layout that was tried and failed first.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PostCreatedResponse {
    pub mensaje: String,
    pub publicacion: Post,
    pub estrategia: PersistenceStrategy,
    pub intentos_fallidos: Vec<PersistenceAttempt>,
}
