// registry/src/registry.rs

use crate::{Asset, Collection, Job, JobSpec, PriorResult, RegistryError, RegistryResult};
use oracle_core::{
    aggregate, AggregationMethod, Amount, AssetId, Balances, Epoch, EventLog, Moment, OracleEvent,
};
use oracle_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Every job and collection, under one monotonically assigned id space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    assets: BTreeMap<AssetId, Asset>,
    num_assets: u64,
    min_job_credit: Amount,
}

impl Registry {
    pub fn new(min_job_credit: Amount) -> Self {
        Self {
            assets: BTreeMap::new(),
            num_assets: 0,
            min_job_credit,
        }
    }

    fn check_credit(&self, credit: &Amount) -> RegistryResult<()> {
        if *credit < self.min_job_credit {
            return Err(RegistryError::InsufficientCredit {
                required: self.min_job_credit.clone(),
                provided: credit.clone(),
            });
        }
        Ok(())
    }

    fn next_id(&mut self) -> AssetId {
        self.num_assets += 1;
        self.num_assets
    }

    /// Register a job, charging `credit` from the creator's balance
    pub fn create_job(
        &mut self,
        creator: Address,
        spec: JobSpec,
        credit: Amount,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> RegistryResult<AssetId> {
        if spec.url.trim().is_empty() {
            return Err(RegistryError::EmptyField("url"));
        }
        if spec.name.trim().is_empty() {
            return Err(RegistryError::EmptyField("name"));
        }
        self.check_credit(&credit)?;
        balances.debit(creator, &credit)?;

        let id = self.next_id();
        let job = Job {
            id,
            epoch: now.epoch,
            url: spec.url,
            selector: spec.selector,
            name: spec.name,
            repeat: spec.repeat,
            creator,
            credit,
            fulfilled: false,
            result: None,
            epoch_fulfilled: None,
        };

        tracing::info!("Job {} '{}' created by {} in epoch {}", id, job.name, creator, now.epoch);

        events.emit(
            now,
            OracleEvent::JobCreated {
                id,
                epoch: now.epoch,
                url: job.url.clone(),
                selector: job.selector.clone(),
                name: job.name.clone(),
                repeat: job.repeat,
                creator,
                credit: job.credit.clone(),
                timestamp: now.timestamp,
            },
        );
        self.assets.insert(id, Asset::Job(job));

        Ok(id)
    }

    /// Register a collection over existing jobs
    pub fn create_collection(
        &mut self,
        creator: Address,
        name: String,
        aggregation_method: AggregationMethod,
        job_ids: Vec<AssetId>,
        credit: Amount,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> RegistryResult<AssetId> {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyField("name"));
        }
        let mut seen = BTreeSet::new();
        for job_id in &job_ids {
            self.job(*job_id)?;
            if !seen.insert(*job_id) {
                return Err(RegistryError::DuplicateMember {
                    collection_id: self.num_assets + 1,
                    job_id: *job_id,
                });
            }
        }
        self.check_credit(&credit)?;
        balances.debit(creator, &credit)?;

        let id = self.next_id();
        tracing::info!(
            "Collection {} '{}' created by {} over {} jobs",
            id,
            name,
            creator,
            job_ids.len()
        );

        events.emit(
            now,
            OracleEvent::CollectionCreated {
                id,
                epoch: now.epoch,
                name: name.clone(),
                aggregation_method,
                job_ids: job_ids.clone(),
                creator,
                credit: credit.clone(),
                timestamp: now.timestamp,
            },
        );
        self.assets.insert(
            id,
            Asset::Collection(Collection {
                id,
                name,
                aggregation_method,
                epoch: now.epoch,
                creator,
                credit,
                result: None,
                job_ids,
            }),
        );

        Ok(id)
    }

    pub fn add_job_to_collection(
        &mut self,
        caller: Address,
        collection_id: AssetId,
        job_id: AssetId,
        now: &Moment,
        events: &mut EventLog,
    ) -> RegistryResult<()> {
        self.job(job_id)?;
        let collection = self.collection_mut(collection_id)?;
        if collection.creator != caller {
            return Err(RegistryError::NotCreator(collection_id));
        }
        if collection.job_ids.contains(&job_id) {
            return Err(RegistryError::DuplicateMember {
                collection_id,
                job_id,
            });
        }
        collection.job_ids.push(job_id);
        let job_ids = collection.job_ids.clone();

        tracing::info!("Job {} added to collection {}", job_id, collection_id);

        events.emit(
            now,
            OracleEvent::CollectionUpdated {
                id: collection_id,
                epoch: now.epoch,
                job_ids,
                timestamp: now.timestamp,
            },
        );
        Ok(())
    }

    /// Write an oracle answer. Returns whether the result was stored; a
    /// one-shot job already settled in an earlier epoch keeps its result.
    pub fn fulfill_asset(
        &mut self,
        id: AssetId,
        value: Amount,
        now: &Moment,
        events: &mut EventLog,
    ) -> RegistryResult<bool> {
        let asset = self
            .assets
            .get_mut(&id)
            .ok_or(RegistryError::AssetNotFound(id))?;

        match asset {
            Asset::Job(job) => {
                if !job.accepts_result(now.epoch) {
                    tracing::debug!("Job {} already fulfilled, ignoring epoch {}", id, now.epoch);
                    return Ok(false);
                }
                job.result = Some(value.clone());
                if !job.fulfilled {
                    job.fulfilled = true;
                    job.epoch_fulfilled = Some(now.epoch);
                }

                events.emit(
                    now,
                    OracleEvent::JobReported {
                        id,
                        epoch: now.epoch,
                        value,
                        fulfilled: job.fulfilled,
                        timestamp: now.timestamp,
                    },
                );
            }
            Asset::Collection(collection) => {
                collection.result = Some(value.clone());
                events.emit(
                    now,
                    OracleEvent::CollectionReported {
                        id,
                        epoch: now.epoch,
                        value,
                        timestamp: now.timestamp,
                    },
                );
            }
        }
        Ok(true)
    }

    /// Recompute every collection containing one of `reported`.
    /// Returns the collections whose result was written.
    pub fn refresh_collections(
        &mut self,
        reported: &[AssetId],
        now: &Moment,
        events: &mut EventLog,
    ) -> RegistryResult<Vec<AssetId>> {
        let reported: BTreeSet<AssetId> = reported.iter().copied().collect();
        let mut updates = Vec::new();

        for asset in self.assets.values() {
            let Asset::Collection(collection) = asset else {
                continue;
            };
            if !collection.job_ids.iter().any(|id| reported.contains(id)) {
                continue;
            }
            if let Some(value) = self.aggregate_members(collection) {
                updates.push((collection.id, value));
            }
        }

        let mut refreshed = Vec::with_capacity(updates.len());
        for (id, value) in updates {
            self.fulfill_asset(id, value, now, events)?;
            refreshed.push(id);
        }
        Ok(refreshed)
    }

    /// Results a block over `job_ids` may overwrite: the jobs themselves
    /// and every collection holding one of them. Fails on an unknown job.
    pub fn prior_results(&self, job_ids: &[AssetId]) -> RegistryResult<Vec<PriorResult>> {
        let mut priors = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            self.job(*job_id)?;
            if let Some(asset) = self.assets.get(job_id) {
                priors.push(asset.prior_result());
            }
        }

        let jobs: BTreeSet<AssetId> = job_ids.iter().copied().collect();
        for asset in self.assets.values() {
            if let Asset::Collection(collection) = asset {
                if collection.job_ids.iter().any(|id| jobs.contains(id)) {
                    priors.push(asset.prior_result());
                }
            }
        }
        Ok(priors)
    }

    /// Roll results back to `priors`, emitting one event per changed asset
    pub fn restore_results(
        &mut self,
        priors: &[PriorResult],
        now: &Moment,
        events: &mut EventLog,
    ) -> RegistryResult<()> {
        for prior in priors {
            let asset = self
                .assets
                .get_mut(&prior.id)
                .ok_or(RegistryError::AssetNotFound(prior.id))?;
            if asset.prior_result() == *prior {
                continue;
            }

            match asset {
                Asset::Job(job) => {
                    job.result = prior.result.clone();
                    job.fulfilled = prior.fulfilled;
                    job.epoch_fulfilled = prior.epoch_fulfilled;
                }
                Asset::Collection(collection) => collection.result = prior.result.clone(),
            }

            tracing::warn!("Reverted result of asset {} in epoch {}", prior.id, now.epoch);
            events.emit(
                now,
                OracleEvent::ResultReverted {
                    id: prior.id,
                    epoch: now.epoch,
                    restored: prior.result.clone(),
                    timestamp: now.timestamp,
                },
            );
        }
        Ok(())
    }

    /// Apply the collection's method over fulfilled members, one vote each
    fn aggregate_members(&self, collection: &Collection) -> Option<Amount> {
        let mut counts: BTreeMap<Amount, Amount> = BTreeMap::new();
        for job_id in &collection.job_ids {
            if let Some(result) = self.get_result(*job_id) {
                let count = counts.entry(result.clone()).or_default();
                *count = count.checked_add(&Amount::from_u64(1))?;
            }
        }
        aggregate(collection.aggregation_method, &counts)
    }

    pub fn get_asset(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(&id)
    }

    pub fn get_job(&self, id: AssetId) -> Option<&Job> {
        match self.assets.get(&id) {
            Some(Asset::Job(job)) => Some(job),
            _ => None,
        }
    }

    pub fn get_collection(&self, id: AssetId) -> Option<&Collection> {
        match self.assets.get(&id) {
            Some(Asset::Collection(collection)) => Some(collection),
            _ => None,
        }
    }

    pub fn get_result(&self, id: AssetId) -> Option<&Amount> {
        self.assets.get(&id).and_then(Asset::result)
    }

    pub fn is_job(&self, id: AssetId) -> bool {
        self.get_job(id).is_some()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.assets.values().filter_map(|asset| match asset {
            Asset::Job(job) => Some(job),
            Asset::Collection(_) => None,
        })
    }

    pub fn num_assets(&self) -> u64 {
        self.num_assets
    }

    /// Epoch the job was first fulfilled in, if ever
    pub fn epoch_fulfilled(&self, id: AssetId) -> Option<Epoch> {
        self.get_job(id).and_then(|job| job.epoch_fulfilled)
    }

    fn job(&self, id: AssetId) -> RegistryResult<&Job> {
        match self.assets.get(&id) {
            Some(Asset::Job(job)) => Ok(job),
            Some(Asset::Collection(_)) => Err(RegistryError::NotAJob(id)),
            None => Err(RegistryError::AssetNotFound(id)),
        }
    }

    fn collection_mut(&mut self, id: AssetId) -> RegistryResult<&mut Collection> {
        match self.assets.get_mut(&id) {
            Some(Asset::Collection(collection)) => Ok(collection),
            Some(Asset::Job(_)) => Err(RegistryError::NotACollection(id)),
            None => Err(RegistryError::AssetNotFound(id)),
        }
    }
}
