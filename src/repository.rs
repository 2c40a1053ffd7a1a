use crate::models::{
    Categoria, CreateCategoriaRequest, CreateForoRequest, Foro, NewUsuario, Post, Role,
    UpdateCategoriaRequest, UpdateForoRequest, UpdateUsuarioRequest, Usuario,
};
use crate::posts::{NewPost, PersistenceStrategy, PostStore, StoreError, ThreadNumbering};
use async_trait::async_trait;
use sqlx::{PgPool, query_builder::QueryBuilder};
use std::sync::Arc;

/// RepoError
///
/// Persistence failures, already classified so handlers can map them onto the
/// HTTP taxonomy without inspecting driver errors.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,

    /// Unique or foreign-key constraint violation.
    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Conflict("El registro ya existe".to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::Conflict(
                "El registro está referenciado por otros datos".to_string(),
            ),
            _ => RepoError::Database(err),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// The abstract contract for identity, foro and categoria persistence. Handlers
/// talk to `Arc<dyn Repository>` and never see the concrete store, which lets the
/// tests swap in hand-written mocks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Identity ---
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<Usuario>>;
    async fn get_user(&self, id: i32) -> RepoResult<Option<Usuario>>;
    async fn list_users(&self) -> RepoResult<Vec<Usuario>>;
    async fn list_users_by_role(&self, role: Role) -> RepoResult<Vec<Usuario>>;
    // Professors whose credentials still await administrator validation.
    async fn list_pending_professors(&self) -> RepoResult<Vec<Usuario>>;
    async fn email_exists(&self, email: &str) -> RepoResult<bool>;
    async fn create_user(&self, user: NewUsuario) -> RepoResult<Usuario>;
    // Partial update; `None` when the user does not exist.
    async fn update_user(&self, id: i32, req: UpdateUsuarioRequest) -> RepoResult<Option<Usuario>>;
    async fn update_password_hash(&self, id: i32, password_hash: &str) -> RepoResult<bool>;
    async fn set_password_hash_by_email(&self, email: &str, password_hash: &str) -> RepoResult<bool>;
    // Soft delete: flips estado_cuenta to 'inactivo'.
    async fn deactivate_user(&self, id: i32) -> RepoResult<bool>;
    async fn record_login(&self, id: i32) -> RepoResult<()>;

    // --- Foros ---
    async fn list_foros(&self) -> RepoResult<Vec<Foro>>;
    async fn get_foro(&self, id: i32) -> RepoResult<Option<Foro>>;
    async fn create_foro(&self, req: CreateForoRequest, creado_por: i32) -> RepoResult<Foro>;
    async fn update_foro(&self, id: i32, req: UpdateForoRequest) -> RepoResult<Option<Foro>>;
    async fn delete_foro(&self, id: i32) -> RepoResult<bool>;

    // --- Categorias ---
    async fn list_categorias(&self) -> RepoResult<Vec<Categoria>>;
    async fn get_categoria(&self, id: i32) -> RepoResult<Option<Categoria>>;
    async fn create_categoria(&self, req: CreateCategoriaRequest) -> RepoResult<Categoria>;
    async fn update_categoria(
        &self,
        id: i32,
        req: UpdateCategoriaRequest,
    ) -> RepoResult<Option<Categoria>>;
    async fn delete_categoria(&self, id: i32) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_COLUMNS: &str = "id, nombre, apellido_paterno, apellido_materno, email, password_hash, \
     tipo_usuario, matricula, cedula_profesional, telefono, estado_validacion, estado_cuenta, \
     avatar_url, fecha_creacion::timestamptz AS fecha_creacion, \
     ultima_conexion::timestamptz AS ultima_conexion";

const FORO_COLUMNS: &str = "id, titulo, descripcion, categoria_id, creado_por, \
     fecha_creacion::timestamptz AS fecha_creacion";

const CREATE_FORO_MENSAJES: &str = r#"
    CREATE TABLE IF NOT EXISTS foro_mensajes (
        id SERIAL PRIMARY KEY,
        foro_id INTEGER NOT NULL,
        usuario_id INTEGER NOT NULL REFERENCES usuario(id),
        contenido TEXT NOT NULL,
        fecha_creacion TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

const CREATE_FORO_MENSAJES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_foro_mensajes_foro ON foro_mensajes (foro_id)";

/// PostgresRepository
///
/// The concrete implementation of `Repository` and `PostStore`, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<Usuario>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM usuario WHERE email = $1");
        Ok(sqlx::query_as::<_, Usuario>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user(&self, id: i32) -> RepoResult<Option<Usuario>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM usuario WHERE id = $1");
        Ok(sqlx::query_as::<_, Usuario>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_users(&self) -> RepoResult<Vec<Usuario>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM usuario ORDER BY fecha_creacion DESC");
        Ok(sqlx::query_as::<_, Usuario>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_users_by_role(&self, role: Role) -> RepoResult<Vec<Usuario>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM usuario WHERE tipo_usuario = $1 ORDER BY fecha_creacion DESC"
        );
        Ok(sqlx::query_as::<_, Usuario>(&sql)
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_pending_professors(&self) -> RepoResult<Vec<Usuario>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM usuario \
             WHERE tipo_usuario = $1 AND estado_validacion = 'pendiente' \
             ORDER BY fecha_creacion ASC"
        );
        Ok(sqlx::query_as::<_, Usuario>(&sql)
            .bind(Role::Professor.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn email_exists(&self, email: &str) -> RepoResult<bool> {
        let found: Option<i32> = sqlx::query_scalar("SELECT id FROM usuario WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// create_user
    ///
    /// Inserts a new identity. A racing duplicate that slips past the handler's
    /// pre-check surfaces as `RepoError::Conflict` from the unique index.
    async fn create_user(&self, user: NewUsuario) -> RepoResult<Usuario> {
        let sql = format!(
            "INSERT INTO usuario (nombre, apellido_paterno, apellido_materno, email, password_hash, \
             tipo_usuario, matricula, cedula_profesional, telefono) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Usuario>(&sql)
            .bind(user.nombre)
            .bind(user.apellido_paterno)
            .bind(user.apellido_materno)
            .bind(user.email)
            .bind(user.password_hash)
            .bind(user.tipo_usuario.as_str())
            .bind(user.matricula)
            .bind(user.cedula_profesional)
            .bind(user.telefono)
            .fetch_one(&self.pool)
            .await?)
    }

    /// update_user
    ///
    /// Builds the SET clause from the `Some` fields only, keeping every value
    /// parameterized through `QueryBuilder`.
    async fn update_user(&self, id: i32, req: UpdateUsuarioRequest) -> RepoResult<Option<Usuario>> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE usuario SET ");
        let mut fields = builder.separated(", ");

        if let Some(nombre) = req.nombre {
            fields.push("nombre = ").push_bind_unseparated(nombre);
        }
        if let Some(apellido_paterno) = req.apellido_paterno {
            fields
                .push("apellido_paterno = ")
                .push_bind_unseparated(apellido_paterno);
        }
        if let Some(apellido_materno) = req.apellido_materno {
            fields
                .push("apellido_materno = ")
                .push_bind_unseparated(apellido_materno);
        }
        if let Some(telefono) = req.telefono {
            fields.push("telefono = ").push_bind_unseparated(telefono);
        }
        if let Some(avatar_url) = req.avatar_url {
            fields.push("avatar_url = ").push_bind_unseparated(avatar_url);
        }
        if let Some(estado_cuenta) = req.estado_cuenta {
            fields
                .push("estado_cuenta = ")
                .push_bind_unseparated(estado_cuenta.as_str());
        }
        fields.push("fecha_actualizacion = CURRENT_TIMESTAMP");

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(" RETURNING ");
        builder.push(USER_COLUMNS);

        Ok(builder
            .build_query_as::<Usuario>()
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_password_hash(&self, id: i32, password_hash: &str) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE usuario SET password_hash = $1, fecha_actualizacion = CURRENT_TIMESTAMP WHERE id = $2",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_password_hash_by_email(&self, email: &str, password_hash: &str) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE usuario SET password_hash = $1, fecha_actualizacion = CURRENT_TIMESTAMP WHERE email = $2",
        )
        .bind(password_hash)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_user(&self, id: i32) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE usuario SET estado_cuenta = 'inactivo', fecha_actualizacion = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, id: i32) -> RepoResult<()> {
        sqlx::query("UPDATE usuario SET ultima_conexion = CURRENT_TIMESTAMP WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- FOROS ---

    async fn list_foros(&self) -> RepoResult<Vec<Foro>> {
        let sql = format!("SELECT {FORO_COLUMNS} FROM foro ORDER BY id ASC");
        Ok(sqlx::query_as::<_, Foro>(&sql).fetch_all(&self.pool).await?)
    }

    async fn get_foro(&self, id: i32) -> RepoResult<Option<Foro>> {
        let sql = format!("SELECT {FORO_COLUMNS} FROM foro WHERE id = $1");
        Ok(sqlx::query_as::<_, Foro>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_foro(&self, req: CreateForoRequest, creado_por: i32) -> RepoResult<Foro> {
        let sql = format!(
            "INSERT INTO foro (titulo, descripcion, categoria_id, creado_por) \
             VALUES ($1, $2, $3, $4) RETURNING {FORO_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Foro>(&sql)
            .bind(req.titulo)
            .bind(req.descripcion)
            .bind(req.categoria_id)
            .bind(creado_por)
            .fetch_one(&self.pool)
            .await?)
    }

    /// update_foro
    ///
    /// Uses `COALESCE` so only the provided fields change.
    async fn update_foro(&self, id: i32, req: UpdateForoRequest) -> RepoResult<Option<Foro>> {
        let sql = format!(
            "UPDATE foro SET titulo = COALESCE($2, titulo), \
             descripcion = COALESCE($3, descripcion), \
             categoria_id = COALESCE($4, categoria_id) \
             WHERE id = $1 RETURNING {FORO_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Foro>(&sql)
            .bind(id)
            .bind(req.titulo)
            .bind(req.descripcion)
            .bind(req.categoria_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_foro(&self, id: i32) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM foro WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- CATEGORIAS ---

    async fn list_categorias(&self) -> RepoResult<Vec<Categoria>> {
        Ok(sqlx::query_as::<_, Categoria>(
            "SELECT id, nombre, descripcion FROM categoria ORDER BY nombre ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_categoria(&self, id: i32) -> RepoResult<Option<Categoria>> {
        Ok(sqlx::query_as::<_, Categoria>(
            "SELECT id, nombre, descripcion FROM categoria WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_categoria(&self, req: CreateCategoriaRequest) -> RepoResult<Categoria> {
        Ok(sqlx::query_as::<_, Categoria>(
            "INSERT INTO categoria (nombre, descripcion) VALUES ($1, $2) RETURNING id, nombre, descripcion",
        )
        .bind(req.nombre)
        .bind(req.descripcion)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_categoria(
        &self,
        id: i32,
        req: UpdateCategoriaRequest,
    ) -> RepoResult<Option<Categoria>> {
        Ok(sqlx::query_as::<_, Categoria>(
            "UPDATE categoria SET nombre = COALESCE($2, nombre), descripcion = COALESCE($3, descripcion) \
             WHERE id = $1 RETURNING id, nombre, descripcion",
        )
        .bind(id)
        .bind(req.nombre)
        .bind(req.descripcion)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_categoria(&self, id: i32) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM categoria WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- POST LAYOUTS ---

/// Maps "relation does not exist" onto `MissingTable` so callers can tell an
/// absent layout apart from a broken one.
fn classify(strategy: PersistenceStrategy, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01") => {
            StoreError::MissingTable(strategy.table())
        }
        _ => StoreError::Database(err),
    }
}

/// A concurrent `CREATE TABLE IF NOT EXISTS` can still lose the race on the
/// catalog and report a duplicate; the table exists either way.
fn is_duplicate_object(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("42P07") | Some("42710") | Some("23505")
        ),
        _ => false,
    }
}

/// SELECT list for one layout, joined with the author and shaped as `Post`.
fn select_posts_sql(strategy: PersistenceStrategy, filter: &str) -> String {
    let author = "u.id AS autor_id, (u.nombre || ' ' || u.apellido_paterno) AS autor_nombre, \
                  u.email AS autor_email";
    match strategy {
        PersistenceStrategy::ThreadNumbered => format!(
            "SELECT p.id::BIGINT AS id, p.foro_id, {author}, p.contenido, \
             p.fecha_creacion::timestamptz AS fecha_creacion, COALESCE(p.editado, FALSE) AS editado, \
             p.numero_publicacion, COALESCE(p.es_primera, FALSE) AS es_primera \
             FROM publicacion p JOIN usuario u ON u.id = p.usuario_id \
             WHERE {filter} ORDER BY p.numero_publicacion ASC, p.id ASC"
        ),
        PersistenceStrategy::ForoMessages => format!(
            "SELECT p.id::BIGINT AS id, p.foro_id, {author}, p.contenido, \
             p.fecha_creacion::timestamptz AS fecha_creacion, FALSE AS editado, \
             NULL::INTEGER AS numero_publicacion, FALSE AS es_primera \
             FROM foro_mensajes p JOIN usuario u ON u.id = p.usuario_id \
             WHERE {filter} ORDER BY p.fecha_creacion ASC, p.id ASC"
        ),
        PersistenceStrategy::ChannelMessages => format!(
            "SELECT p.id::BIGINT AS id, p.canal_id AS foro_id, {author}, p.contenido, \
             p.fecha_envio::timestamptz AS fecha_creacion, COALESCE(p.editado, FALSE) AS editado, \
             NULL::INTEGER AS numero_publicacion, FALSE AS es_primera \
             FROM mensaje_chat p JOIN usuario u ON u.id = p.usuario_id \
             WHERE {filter} ORDER BY p.fecha_envio ASC, p.id ASC"
        ),
    }
}

fn foro_column(strategy: PersistenceStrategy) -> &'static str {
    match strategy {
        PersistenceStrategy::ChannelMessages => "p.canal_id",
        _ => "p.foro_id",
    }
}

#[async_trait]
impl PostStore for PostgresRepository {
    /// insert_thread_post
    ///
    /// Locks the parent foro row for the length of the transaction, so two posts
    /// to the same foro cannot compute the same next number.
    async fn insert_thread_post(&self, post: &NewPost) -> Result<i64, StoreError> {
        let strategy = PersistenceStrategy::ThreadNumbered;
        let mut tx = self.pool.begin().await?;

        let foro: Option<i32> = sqlx::query_scalar("SELECT id FROM foro WHERE id = $1 FOR UPDATE")
            .bind(post.foro_id)
            .fetch_optional(&mut *tx)
            .await?;
        if foro.is_none() {
            return Err(StoreError::ForoNotFound(post.foro_id));
        }

        let max_existing: Option<i32> =
            sqlx::query_scalar("SELECT MAX(numero_publicacion) FROM publicacion WHERE foro_id = $1")
                .bind(post.foro_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| classify(strategy, e))?;
        let numbering = ThreadNumbering::after(max_existing);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO publicacion (foro_id, usuario_id, contenido, numero_publicacion, es_primera) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id::BIGINT",
        )
        .bind(post.foro_id)
        .bind(post.autor_id)
        .bind(&post.contenido)
        .bind(numbering.numero)
        .bind(numbering.es_primera)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| classify(strategy, e))?;

        tx.commit().await?;
        tracing::debug!(foro_id = post.foro_id, numero = numbering.numero, "numbered post inserted");
        Ok(id)
    }

    async fn ensure_foro_messages_table(&self) -> Result<(), StoreError> {
        let present: bool =
            sqlx::query_scalar("SELECT to_regclass('public.foro_mensajes') IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        if present {
            return Ok(());
        }

        tracing::warn!("table foro_mensajes is missing, creating it");
        for statement in [CREATE_FORO_MENSAJES, CREATE_FORO_MENSAJES_INDEX] {
            match sqlx::query(statement).execute(&self.pool).await {
                Ok(_) => {}
                Err(e) if is_duplicate_object(&e) => {
                    tracing::debug!("foro_mensajes created concurrently: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn insert_foro_message(&self, post: &NewPost) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "INSERT INTO foro_mensajes (foro_id, usuario_id, contenido) VALUES ($1, $2, $3) RETURNING id::BIGINT",
        )
        .bind(post.foro_id)
        .bind(post.autor_id)
        .bind(&post.contenido)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(PersistenceStrategy::ForoMessages, e))
    }

    async fn insert_channel_message(&self, post: &NewPost) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "INSERT INTO mensaje_chat (canal_id, usuario_id, contenido) VALUES ($1, $2, $3) RETURNING id::BIGINT",
        )
        .bind(post.foro_id)
        .bind(post.autor_id)
        .bind(&post.contenido)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(PersistenceStrategy::ChannelMessages, e))
    }

    async fn fetch_post(&self, strategy: PersistenceStrategy, id: i64) -> Result<Post, StoreError> {
        let sql = select_posts_sql(strategy, "p.id = $1");
        sqlx::query_as::<_, Post>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(strategy, e))
    }

    async fn list_posts(
        &self,
        strategy: PersistenceStrategy,
        foro_id: i32,
    ) -> Result<Vec<Post>, StoreError> {
        let filter = format!("{} = $1", foro_column(strategy));
        let sql = select_posts_sql(strategy, &filter);
        sqlx::query_as::<_, Post>(&sql)
            .bind(foro_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(strategy, e))
    }
}
