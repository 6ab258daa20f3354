//! The Territory Store: the server that owns territory records.
//!
//! The sync engine never calls the store directly. It emits
//! [`StoreRequest`]s; a [`StoreWorker`] runs them off the UI thread and hands
//! back [`StoreReply`]s.

mod http;
mod memory;
mod worker;

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use worker::StoreWorker;

use crate::territory::{NewTerritory, ProvisionalId, Team, Territory, TerritoryId, TerritoryPatch};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("territory {0} not found")]
    NotFound(TerritoryId),
    #[error("store answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode store response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

/// CRUD surface of the Territory Store plus the read-only team list
pub trait TerritoryStore: Send + Sync {
    fn list(&self) -> Result<Vec<Territory>, StoreError>;
    fn create(&self, body: &NewTerritory) -> Result<Territory, StoreError>;
    fn update(&self, id: &TerritoryId, patch: &TerritoryPatch) -> Result<Territory, StoreError>;
    fn delete(&self, id: &TerritoryId) -> Result<(), StoreError>;
    fn teams(&self) -> Result<Vec<Team>, StoreError>;
}

/// A store call the engine wants made
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    /// `generation` orders list replies; stale ones are dropped
    List { generation: u64 },
    Teams,
    Create { provisional: ProvisionalId, body: NewTerritory },
    Update { id: TerritoryId, patch: TerritoryPatch },
    Delete { id: TerritoryId },
}

/// Outcome of a [`StoreRequest`], tagged with what the engine needs to route it
#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    Listed { generation: u64, result: Result<Vec<Territory>, StoreError> },
    Teams(Result<Vec<Team>, StoreError>),
    Created { provisional: ProvisionalId, result: Result<Territory, StoreError> },
    Updated { id: TerritoryId, result: Result<Territory, StoreError> },
    Deleted { id: TerritoryId, result: Result<(), StoreError> },
}

/// Run one request to completion against `store`
pub fn execute(store: &dyn TerritoryStore, request: StoreRequest) -> StoreReply {
    match request {
        StoreRequest::List { generation } => StoreReply::Listed {
            generation,
            result: store.list(),
        },
        StoreRequest::Teams => StoreReply::Teams(store.teams()),
        StoreRequest::Create { provisional, body } => StoreReply::Created {
            provisional,
            result: store.create(&body),
        },
        StoreRequest::Update { id, patch } => {
            let result = store.update(&id, &patch);
            StoreReply::Updated { id, result }
        }
        StoreRequest::Delete { id } => {
            let result = store.delete(&id);
            StoreReply::Deleted { id, result }
        }
    }
}
