#![allow(dead_code)]

//! Shared scaffolding for the integration tests: in-memory implementations of
//! `Repository` and `PostStore`, plus request/response helpers.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response, header},
};
use chrono::{Duration, TimeZone, Utc};
use foro_api::{
    AppConfig, AppState,
    config::Env,
    models::{
        AccountStatus, Categoria, CreateCategoriaRequest, CreateForoRequest, Foro, NewUsuario,
        Post, Role, UpdateCategoriaRequest, UpdateForoRequest, UpdateUsuarioRequest, Usuario,
    },
    password::hash_password_with_cost,
    posts::{NewPost, PersistenceStrategy, PostStore, StoreError, ThreadNumbering},
    repository::{RepoError, RepoResult, Repository},
    token::{TokenService, TokenSubject},
};
use serde_json::Value;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

// bcrypt's minimum cost keeps the suite fast.
pub const TEST_COST: u32 = 4;

pub fn usuario(id: i32, email: &str, role: Role, password: &str) -> Usuario {
    Usuario {
        id,
        nombre: format!("Nombre{id}"),
        apellido_paterno: format!("Apellido{id}"),
        email: email.to_string(),
        password_hash: hash_password_with_cost(password, TEST_COST).unwrap(),
        tipo_usuario: role,
        estado_cuenta: AccountStatus::Active,
        fecha_creacion: Utc::now(),
        ..Default::default()
    }
}

pub fn admin() -> Usuario {
    usuario(1, "admin@cucep.edu.mx", Role::Admin, "admin-pass")
}

pub fn professor() -> Usuario {
    usuario(2, "profe@cucep.edu.mx", Role::Professor, "profe-pass")
}

pub fn student() -> Usuario {
    let mut u = usuario(3, "alumno@cucep.edu.mx", Role::Student, "alumno-pass");
    u.matricula = Some("A0001".to_string());
    u
}

// --- In-memory Repository ---

#[derive(Default)]
pub struct MockRepo {
    pub users: Mutex<Vec<Usuario>>,
    pub foros: Mutex<Vec<Foro>>,
    pub categorias: Mutex<Vec<Categoria>>,
}

impl MockRepo {
    pub fn with_users(users: Vec<Usuario>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Default::default()
        }
    }

    pub fn with_foro(self, id: i32, titulo: &str) -> Self {
        self.foros.lock().unwrap().push(Foro {
            id,
            titulo: titulo.to_string(),
            fecha_creacion: Utc::now(),
            ..Default::default()
        });
        self
    }

    pub fn user(&self, id: i32) -> Option<Usuario> {
        self.users.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }
}

#[async_trait]
impl Repository for MockRepo {
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<Usuario>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, id: i32) -> RepoResult<Option<Usuario>> {
        Ok(self.user(id))
    }

    async fn list_users(&self) -> RepoResult<Vec<Usuario>> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn list_users_by_role(&self, role: Role) -> RepoResult<Vec<Usuario>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.tipo_usuario == role)
            .cloned()
            .collect())
    }

    async fn list_pending_professors(&self) -> RepoResult<Vec<Usuario>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| {
                u.tipo_usuario == Role::Professor
                    && u.estado_validacion.as_deref() == Some("pendiente")
            })
            .cloned()
            .collect())
    }

    async fn email_exists(&self, email: &str) -> RepoResult<bool> {
        Ok(self.users.lock().unwrap().iter().any(|u| u.email == email))
    }

    async fn create_user(&self, user: NewUsuario) -> RepoResult<Usuario> {
        let mut users = self.users.lock().unwrap();
        let duplicate = users.iter().any(|u| {
            u.email == user.email
                || (user.matricula.is_some() && u.matricula == user.matricula)
        });
        if duplicate {
            return Err(RepoError::Conflict("El registro ya existe".to_string()));
        }
        let created = Usuario {
            id: users.iter().map(|u| u.id).max().unwrap_or(0) + 1,
            nombre: user.nombre,
            apellido_paterno: user.apellido_paterno,
            apellido_materno: user.apellido_materno,
            email: user.email,
            password_hash: user.password_hash,
            tipo_usuario: user.tipo_usuario,
            matricula: user.matricula,
            cedula_profesional: user.cedula_profesional,
            telefono: user.telefono,
            estado_validacion: (user.tipo_usuario == Role::Professor)
                .then(|| "pendiente".to_string()),
            estado_cuenta: AccountStatus::Active,
            fecha_creacion: Utc::now(),
            ..Default::default()
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: i32, req: UpdateUsuarioRequest) -> RepoResult<Option<Usuario>> {
        let mut users = self.users.lock().unwrap();
        let Some(u) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(v) = req.nombre {
            u.nombre = v;
        }
        if let Some(v) = req.apellido_paterno {
            u.apellido_paterno = v;
        }
        if let Some(v) = req.apellido_materno {
            u.apellido_materno = Some(v);
        }
        if let Some(v) = req.telefono {
            u.telefono = Some(v);
        }
        if let Some(v) = req.avatar_url {
            u.avatar_url = Some(v);
        }
        if let Some(v) = req.estado_cuenta {
            u.estado_cuenta = v;
        }
        Ok(Some(u.clone()))
    }

    async fn update_password_hash(&self, id: i32, password_hash: &str) -> RepoResult<bool> {
        let mut users = self.users.lock().unwrap();
        Ok(match users.iter_mut().find(|u| u.id == id) {
            Some(u) => {
                u.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn set_password_hash_by_email(&self, email: &str, password_hash: &str) -> RepoResult<bool> {
        let mut users = self.users.lock().unwrap();
        Ok(match users.iter_mut().find(|u| u.email == email) {
            Some(u) => {
                u.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn deactivate_user(&self, id: i32) -> RepoResult<bool> {
        let mut users = self.users.lock().unwrap();
        Ok(match users.iter_mut().find(|u| u.id == id) {
            Some(u) => {
                u.estado_cuenta = AccountStatus::Inactive;
                true
            }
            None => false,
        })
    }

    async fn record_login(&self, id: i32) -> RepoResult<()> {
        if let Some(u) = self.users.lock().unwrap().iter_mut().find(|u| u.id == id) {
            u.ultima_conexion = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_foros(&self) -> RepoResult<Vec<Foro>> {
        Ok(self.foros.lock().unwrap().clone())
    }

    async fn get_foro(&self, id: i32) -> RepoResult<Option<Foro>> {
        Ok(self.foros.lock().unwrap().iter().find(|f| f.id == id).cloned())
    }

    async fn create_foro(&self, req: CreateForoRequest, creado_por: i32) -> RepoResult<Foro> {
        let mut foros = self.foros.lock().unwrap();
        let foro = Foro {
            id: foros.iter().map(|f| f.id).max().unwrap_or(0) + 1,
            titulo: req.titulo,
            descripcion: req.descripcion,
            categoria_id: req.categoria_id,
            creado_por: Some(creado_por),
            fecha_creacion: Utc::now(),
        };
        foros.push(foro.clone());
        Ok(foro)
    }

    async fn update_foro(&self, id: i32, req: UpdateForoRequest) -> RepoResult<Option<Foro>> {
        let mut foros = self.foros.lock().unwrap();
        let Some(f) = foros.iter_mut().find(|f| f.id == id) else {
            return Ok(None);
        };
        if let Some(v) = req.titulo {
            f.titulo = v;
        }
        if let Some(v) = req.descripcion {
            f.descripcion = Some(v);
        }
        if let Some(v) = req.categoria_id {
            f.categoria_id = Some(v);
        }
        Ok(Some(f.clone()))
    }

    async fn delete_foro(&self, id: i32) -> RepoResult<bool> {
        let mut foros = self.foros.lock().unwrap();
        let before = foros.len();
        foros.retain(|f| f.id != id);
        Ok(foros.len() < before)
    }

    async fn list_categorias(&self) -> RepoResult<Vec<Categoria>> {
        Ok(self.categorias.lock().unwrap().clone())
    }

    async fn get_categoria(&self, id: i32) -> RepoResult<Option<Categoria>> {
        Ok(self.categorias.lock().unwrap().iter().find(|c| c.id == id).cloned())
    }

    async fn create_categoria(&self, req: CreateCategoriaRequest) -> RepoResult<Categoria> {
        let mut categorias = self.categorias.lock().unwrap();
        if categorias.iter().any(|c| c.nombre == req.nombre) {
            return Err(RepoError::Conflict("El registro ya existe".to_string()));
        }
        let categoria = Categoria {
            id: categorias.iter().map(|c| c.id).max().unwrap_or(0) + 1,
            nombre: req.nombre,
            descripcion: req.descripcion,
        };
        categorias.push(categoria.clone());
        Ok(categoria)
    }

    async fn update_categoria(
        &self,
        id: i32,
        req: UpdateCategoriaRequest,
    ) -> RepoResult<Option<Categoria>> {
        let mut categorias = self.categorias.lock().unwrap();
        let Some(c) = categorias.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if let Some(v) = req.nombre {
            c.nombre = v;
        }
        if let Some(v) = req.descripcion {
            c.descripcion = Some(v);
        }
        Ok(Some(c.clone()))
    }

    async fn delete_categoria(&self, id: i32) -> RepoResult<bool> {
        let mut categorias = self.categorias.lock().unwrap();
        let before = categorias.len();
        categorias.retain(|c| c.id != id);
        Ok(categorias.len() < before)
    }
}

// --- In-memory PostStore ---

/// Simulates the three post layouts. Each layout can be made unavailable to
/// exercise the writer's fallback order.
pub struct MockPostStore {
    pub foro_ids: Vec<i32>,
    pub thread_available: bool,
    pub foro_messages_exists: AtomicBool,
    pub foro_messages_creatable: bool,
    pub channel_available: bool,
    pub fail_fetch: bool,
    pub calls: Mutex<Vec<&'static str>>,
    pub rows: Mutex<Vec<(PersistenceStrategy, Post)>>,
}

impl MockPostStore {
    pub fn new(foro_ids: Vec<i32>) -> Self {
        Self {
            foro_ids,
            thread_available: true,
            foro_messages_exists: AtomicBool::new(true),
            foro_messages_creatable: true,
            channel_available: true,
            fail_fetch: false,
            calls: Mutex::new(Vec::new()),
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn without_thread_table(mut self) -> Self {
        self.thread_available = false;
        self
    }

    pub fn without_foro_messages_table(self) -> Self {
        self.foro_messages_exists.store(false, Ordering::SeqCst);
        self
    }

    pub fn foro_messages_uncreatable(mut self) -> Self {
        self.foro_messages_exists.store(false, Ordering::SeqCst);
        self.foro_messages_creatable = false;
        self
    }

    pub fn without_channel_table(mut self) -> Self {
        self.channel_available = false;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rows_in(&self, strategy: PersistenceStrategy) -> Vec<Post> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == strategy)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Seeds numbered posts 1..=count in `foro_id`.
    pub fn seed_thread(&self, foro_id: i32, count: i32) {
        for _ in 0..count {
            self.push_row(PersistenceStrategy::ThreadNumbered, foro_id, 99, "seed", None);
        }
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn push_row(
        &self,
        strategy: PersistenceStrategy,
        foro_id: i32,
        autor_id: i32,
        contenido: &str,
        numbering: Option<ThreadNumbering>,
    ) -> i64 {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i64 + 1;
        let numbering = numbering.or_else(|| {
            (strategy == PersistenceStrategy::ThreadNumbered).then(|| {
                let max = rows
                    .iter()
                    .filter(|(s, p)| *s == strategy && p.foro_id == foro_id)
                    .filter_map(|(_, p)| p.numero_publicacion)
                    .max();
                ThreadNumbering::after(max)
            })
        });
        rows.push((
            strategy,
            Post {
                id,
                foro_id,
                autor_id,
                autor_nombre: format!("Autor {autor_id}"),
                autor_email: format!("autor{autor_id}@cucep.edu.mx"),
                contenido: contenido.to_string(),
                fecha_creacion: base_time() + Duration::seconds(id),
                editado: false,
                numero_publicacion: numbering.map(|n| n.numero),
                es_primera: numbering.is_some_and(|n| n.es_primera),
                origen: PersistenceStrategy::default(),
            },
        ));
        id
    }

    fn unavailable(strategy: PersistenceStrategy) -> StoreError {
        StoreError::MissingTable(strategy.table())
    }

    fn available(&self, strategy: PersistenceStrategy) -> bool {
        match strategy {
            PersistenceStrategy::ThreadNumbered => self.thread_available,
            PersistenceStrategy::ForoMessages => self.foro_messages_exists.load(Ordering::SeqCst),
            PersistenceStrategy::ChannelMessages => self.channel_available,
        }
    }
}

pub fn base_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

#[async_trait]
impl PostStore for MockPostStore {
    async fn insert_thread_post(&self, post: &NewPost) -> Result<i64, StoreError> {
        self.record("insert_thread_post");
        if !self.thread_available {
            return Err(Self::unavailable(PersistenceStrategy::ThreadNumbered));
        }
        if !self.foro_ids.contains(&post.foro_id) {
            return Err(StoreError::ForoNotFound(post.foro_id));
        }
        Ok(self.push_row(
            PersistenceStrategy::ThreadNumbered,
            post.foro_id,
            post.autor_id,
            &post.contenido,
            None,
        ))
    }

    async fn ensure_foro_messages_table(&self) -> Result<(), StoreError> {
        self.record("ensure_foro_messages_table");
        if self.foro_messages_exists.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.foro_messages_creatable {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "permission denied for schema public".to_string(),
            )));
        }
        self.foro_messages_exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_foro_message(&self, post: &NewPost) -> Result<i64, StoreError> {
        self.record("insert_foro_message");
        if !self.available(PersistenceStrategy::ForoMessages) {
            return Err(Self::unavailable(PersistenceStrategy::ForoMessages));
        }
        Ok(self.push_row(
            PersistenceStrategy::ForoMessages,
            post.foro_id,
            post.autor_id,
            &post.contenido,
            None,
        ))
    }

    async fn insert_channel_message(&self, post: &NewPost) -> Result<i64, StoreError> {
        self.record("insert_channel_message");
        if !self.channel_available {
            return Err(Self::unavailable(PersistenceStrategy::ChannelMessages));
        }
        Ok(self.push_row(
            PersistenceStrategy::ChannelMessages,
            post.foro_id,
            post.autor_id,
            &post.contenido,
            None,
        ))
    }

    async fn fetch_post(&self, strategy: PersistenceStrategy, id: i64) -> Result<Post, StoreError> {
        self.record("fetch_post");
        if self.fail_fetch {
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|(s, p)| *s == strategy && p.id == id)
            .map(|(_, p)| p.clone())
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn list_posts(
        &self,
        strategy: PersistenceStrategy,
        foro_id: i32,
    ) -> Result<Vec<Post>, StoreError> {
        if !self.available(strategy) {
            return Err(Self::unavailable(strategy));
        }
        Ok(self
            .rows_in(strategy)
            .into_iter()
            .filter(|p| p.foro_id == foro_id)
            .collect())
    }
}

// --- State and HTTP helpers ---

pub fn test_config(env: Env) -> AppConfig {
    AppConfig {
        env,
        ..AppConfig::default()
    }
}

pub fn test_state(repo: Arc<MockRepo>, posts: Arc<MockPostStore>) -> AppState {
    test_state_with_config(repo, posts, test_config(Env::Local))
}

pub fn test_state_with_config(
    repo: Arc<MockRepo>,
    posts: Arc<MockPostStore>,
    config: AppConfig,
) -> AppState {
    AppState {
        repo,
        posts,
        tokens: TokenService::from_config(&config),
        config,
    }
}

pub fn token_for(state: &AppState, usuario: &Usuario) -> String {
    state.tokens.issue(&TokenSubject::from(usuario)).unwrap()
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
