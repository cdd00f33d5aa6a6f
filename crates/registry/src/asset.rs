// registry/src/asset.rs

use oracle_core::{AggregationMethod, Amount, AssetId, Epoch};
use oracle_crypto::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    Job,
    Collection,
}

/// Caller-supplied description of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub url: String,
    /// Path into the source's response, e.g. a JSON selector
    pub selector: String,
    pub name: String,
    /// Re-reported every epoch instead of once
    pub repeat: bool,
}

/// An external data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: AssetId,
    /// Epoch of creation
    pub epoch: Epoch,
    pub url: String,
    pub selector: String,
    pub name: String,
    pub repeat: bool,
    pub creator: Address,
    pub credit: Amount,
    pub fulfilled: bool,
    pub result: Option<Amount>,
    pub epoch_fulfilled: Option<Epoch>,
}

impl Job {
    /// One-shot jobs accept a result only in the epoch they were first fulfilled
    pub fn accepts_result(&self, epoch: Epoch) -> bool {
        self.repeat || !self.fulfilled || self.epoch_fulfilled == Some(epoch)
    }
}

/// A derived value over member job results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: AssetId,
    pub name: String,
    pub aggregation_method: AggregationMethod,
    pub epoch: Epoch,
    pub creator: Address,
    pub credit: Amount,
    pub result: Option<Amount>,
    /// Append-only
    pub job_ids: Vec<AssetId>,
}

/// An asset's result as it stood before a block overwrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorResult {
    pub id: AssetId,
    pub result: Option<Amount>,
    /// Always false for collections
    pub fulfilled: bool,
    pub epoch_fulfilled: Option<Epoch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Asset {
    Job(Job),
    Collection(Collection),
}

impl Asset {
    pub fn id(&self) -> AssetId {
        match self {
            Asset::Job(job) => job.id,
            Asset::Collection(collection) => collection.id,
        }
    }

    pub fn asset_type(&self) -> AssetType {
        match self {
            Asset::Job(_) => AssetType::Job,
            Asset::Collection(_) => AssetType::Collection,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Asset::Job(job) => &job.name,
            Asset::Collection(collection) => &collection.name,
        }
    }

    pub fn prior_result(&self) -> PriorResult {
        match self {
            Asset::Job(job) => PriorResult {
                id: job.id,
                result: job.result.clone(),
                fulfilled: job.fulfilled,
                epoch_fulfilled: job.epoch_fulfilled,
            },
            Asset::Collection(collection) => PriorResult {
                id: collection.id,
                result: collection.result.clone(),
                fulfilled: false,
                epoch_fulfilled: None,
            },
        }
    }

    pub fn result(&self) -> Option<&Amount> {
        match self {
            Asset::Job(job) => job.result.as_ref(),
            Asset::Collection(collection) => collection.result.as_ref(),
        }
    }
}
