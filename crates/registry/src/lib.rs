// registry/src/lib.rs

//! Job and collection registry
//!
//! Jobs are external data sources the stakers measure; collections
//! aggregate the results of member jobs. Both share one id space.

pub mod asset;
pub mod registry;

pub use asset::{Asset, AssetType, Collection, Job, JobSpec, PriorResult};
pub use registry::Registry;

use oracle_core::{Amount, AssetId, CoreError, ErrorKind};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Field must not be empty: {0}")]
    EmptyField(&'static str),

    #[error("Insufficient credit: required {required}, provided {provided}")]
    InsufficientCredit { required: Amount, provided: Amount },

    #[error("Asset not found: {0}")]
    AssetNotFound(AssetId),

    #[error("Asset {0} is not a job")]
    NotAJob(AssetId),

    #[error("Asset {0} is not a collection")]
    NotACollection(AssetId),

    #[error("Job {job_id} is already a member of collection {collection_id}")]
    DuplicateMember { collection_id: AssetId, job_id: AssetId },

    #[error("Only the creator may modify collection {0}")]
    NotCreator(AssetId),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InsufficientCredit { .. } => ErrorKind::Economic,
            RegistryError::Core(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }
}
