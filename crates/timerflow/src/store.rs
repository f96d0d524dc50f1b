// crates/timerflow/src/store.rs
//
// Storage contract shared by every persisted entity. `update` must merge the
// patch and bump the mutation timestamp in one step against the backing store.

use async_trait::async_trait;
use std::fmt::Display;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{collection} {id} not found")]
    NotFound { collection: &'static str, id: String },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found<E: Entity>(id: E::Id) -> Self {
        StoreError::NotFound {
            collection: E::COLLECTION,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A record type the [`Store`] contract can persist.
pub trait Entity: Clone + Send + Sync + 'static {
    type Id: Copy + Send + Sync + Display + 'static;
    /// Everything needed to create a record; the store fills in id and timestamps.
    type New: Send + 'static;
    /// Structured partial update applied by [`Store::update`].
    type Patch: Send + 'static;

    const COLLECTION: &'static str;

    fn id(&self) -> Self::Id;
}

#[async_trait]
pub trait Store<E: Entity>: Send + Sync {
    async fn create(&self, new: E::New) -> Result<E, StoreError>;

    async fn get(&self, id: E::Id) -> Result<E, StoreError>;

    /// Atomically merge `patch` into the record and advance its update
    /// timestamp. `owner`, when given, is recorded on the entity.
    async fn update(
        &self,
        id: E::Id,
        patch: E::Patch,
        owner: Option<Uuid>,
    ) -> Result<E, StoreError>;
}
