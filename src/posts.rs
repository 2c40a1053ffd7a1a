//! Forum post writer
//!
//! Post storage has lived in three different tables across deployments. A new post
//! is offered to each [`PersistenceStrategy`] in [`PersistenceStrategy::PRIORITY`]
//! order and the first one that accepts it wins. Failures are collected, never
//! thrown, until every strategy has been exhausted.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::models::Post;

/// PersistenceStrategy
///
/// One physical layout a post can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PersistenceStrategy {
    /// `publicacion`: per-foro numbered posts with a first-post marker.
    #[default]
    ThreadNumbered,
    /// `foro_mensajes`: flat per-foro messages. Created on first use.
    ForoMessages,
    /// `mensaje_chat`: chat messages, with the foro id reused as the channel id.
    ChannelMessages,
}

impl PersistenceStrategy {
    /// The order strategies are tried in. First success short-circuits.
    pub const PRIORITY: [PersistenceStrategy; 3] = [
        PersistenceStrategy::ThreadNumbered,
        PersistenceStrategy::ForoMessages,
        PersistenceStrategy::ChannelMessages,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            PersistenceStrategy::ThreadNumbered => "publicacion",
            PersistenceStrategy::ForoMessages => "foro_mensajes",
            PersistenceStrategy::ChannelMessages => "mensaje_chat",
        }
    }
}

/// One failed strategy and the reason it gave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PersistenceAttempt {
    pub estrategia: PersistenceStrategy,
    pub error: String,
}

/// A post as submitted, before any layout has been chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub foro_id: i32,
    pub autor_id: i32,
    pub contenido: String,
}

/// ThreadNumbering
///
/// Sequence assignment for the numbered layout: one past the highest number
/// already in the foro, starting at 1. Only number 1 is the first post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadNumbering {
    pub numero: i32,
    pub es_primera: bool,
}

impl ThreadNumbering {
    pub fn after(max_existing: Option<i32>) -> Self {
        let numero = max_existing.map_or(1, |max| max + 1);
        Self {
            numero,
            es_primera: numero == 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("foro {0} does not exist")]
    ForoNotFound(i32),

    #[error("table {0} does not exist")]
    MissingTable(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Raised once every strategy has failed, or as soon as the target foro turns
/// out not to exist. Lists each attempt in order.
#[derive(Debug, Clone, thiserror::Error)]
#[error("all persistence strategies failed ({})", summarize(.attempts))]
pub struct PostWriteError {
    pub attempts: Vec<PersistenceAttempt>,
    /// Set when the numbered layout reported the foro missing. No other layout
    /// is tried then, since none of them can check the foro.
    pub missing_foro: Option<i32>,
}

fn summarize(attempts: &[PersistenceAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.estrategia.table(), a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// PostStore
///
/// Per-layout persistence primitives. The writer decides the order; implementors
/// only know how to talk to one table at a time.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert into `publicacion`, verifying the foro exists and assigning the
    /// next [`ThreadNumbering`]. Returns the new row id.
    async fn insert_thread_post(&self, post: &NewPost) -> Result<i64, StoreError>;

    /// Create `foro_mensajes` if it is absent. Must be safe under concurrent first use.
    async fn ensure_foro_messages_table(&self) -> Result<(), StoreError>;

    async fn insert_foro_message(&self, post: &NewPost) -> Result<i64, StoreError>;

    async fn insert_channel_message(&self, post: &NewPost) -> Result<i64, StoreError>;

    /// Re-read one stored row joined with its author.
    async fn fetch_post(&self, strategy: PersistenceStrategy, id: i64) -> Result<Post, StoreError>;

    /// All rows of one layout for a foro. `MissingTable` when the layout doesn't exist.
    async fn list_posts(
        &self,
        strategy: PersistenceStrategy,
        foro_id: i32,
    ) -> Result<Vec<Post>, StoreError>;
}

pub type PostStoreState = Arc<dyn PostStore>;

/// The outcome of a successful write.
#[derive(Debug, Clone)]
pub struct WrittenPost {
    pub post: Post,
    pub strategy: PersistenceStrategy,
    /// Strategies tried before `strategy` succeeded.
    pub failed_attempts: Vec<PersistenceAttempt>,
}

async fn persist(
    store: &dyn PostStore,
    strategy: PersistenceStrategy,
    post: &NewPost,
) -> Result<i64, StoreError> {
    match strategy {
        PersistenceStrategy::ThreadNumbered => store.insert_thread_post(post).await,
        PersistenceStrategy::ForoMessages => {
            store.ensure_foro_messages_table().await?;
            store.insert_foro_message(post).await
        }
        PersistenceStrategy::ChannelMessages => store.insert_channel_message(post).await,
    }
}

/// write_post
///
/// Runs the fallback protocol. On success the row is re-read joined with the
/// author and tagged with the strategy that stored it.
///
/// A row that was inserted but cannot be re-read ends the protocol with an error
/// instead of falling through, so the same post is never stored twice.
pub async fn write_post(
    store: &dyn PostStore,
    post: &NewPost,
) -> Result<WrittenPost, PostWriteError> {
    let mut attempts = Vec::new();

    for strategy in PersistenceStrategy::PRIORITY {
        match persist(store, strategy, post).await {
            Ok(id) => {
                tracing::info!(
                    foro_id = post.foro_id,
                    post_id = id,
                    table = strategy.table(),
                    "post stored"
                );

                return match store.fetch_post(strategy, id).await {
                    Ok(mut stored) => {
                        stored.origen = strategy;
                        Ok(WrittenPost {
                            post: stored,
                            strategy,
                            failed_attempts: attempts,
                        })
                    }
                    Err(e) => {
                        attempts.push(PersistenceAttempt {
                            estrategia: strategy,
                            error: format!("stored as id {id} but could not be re-read: {e}"),
                        });
                        Err(PostWriteError {
                            attempts,
                            missing_foro: None,
                        })
                    }
                };
            }
            Err(StoreError::ForoNotFound(foro_id)) => {
                tracing::warn!(foro_id, "post rejected, foro does not exist");
                attempts.push(PersistenceAttempt {
                    estrategia: strategy,
                    error: StoreError::ForoNotFound(foro_id).to_string(),
                });
                return Err(PostWriteError {
                    attempts,
                    missing_foro: Some(foro_id),
                });
            }
            Err(e) => {
                tracing::warn!(
                    foro_id = post.foro_id,
                    table = strategy.table(),
                    error = %e,
                    "post strategy failed, trying next"
                );
                attempts.push(PersistenceAttempt {
                    estrategia: strategy,
                    error: e.to_string(),
                });
            }
        }
    }

    Err(PostWriteError {
        attempts,
        missing_foro: None,
    })
}

/// read_posts
///
/// Collects a foro's posts from every layout that exists, oldest first. Layouts
/// whose table is missing are skipped; other failures are logged and skipped.
pub async fn read_posts(store: &dyn PostStore, foro_id: i32) -> Vec<Post> {
    let mut posts = Vec::new();

    for strategy in PersistenceStrategy::PRIORITY {
        match store.list_posts(strategy, foro_id).await {
            Ok(rows) => posts.extend(rows.into_iter().map(|mut p| {
                p.origen = strategy;
                p
            })),
            Err(StoreError::MissingTable(table)) => {
                tracing::debug!(table, "post layout not present");
            }
            Err(e) => {
                tracing::warn!(table = strategy.table(), error = %e, "failed to list posts");
            }
        }
    }

    posts.sort_by(|a, b| {
        a.fecha_creacion
            .cmp(&b.fecha_creacion)
            .then_with(|| a.id.cmp(&b.id))
    });
    posts
}
