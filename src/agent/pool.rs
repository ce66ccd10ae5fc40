// Agent Pools
// The one shared mutable resource of the orchestrator. A pool hands out
// exclusive leases under a bounded semaphore; the lease is a scoped
// acquisition released on drop on every exit path, including panics and
// aborted tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::agent::{Agent, AgentError};
use crate::parser::models::{Pipeline, Pool};

pub const DEFAULT_POOL_NAME: &str = "default";

/// A named pool of agent capacity.
pub struct AgentPool {
    name: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    agent: Arc<dyn Agent>,
}

impl AgentPool {
    pub fn new(name: impl Into<String>, capacity: usize, agent: Arc<dyn Agent>) -> Self {
        // A zero-capacity pool would deadlock every job; clamp it.
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            agent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire an exclusive agent lease, waiting while the pool is at
    /// capacity. Waiters are served in FIFO order, which keeps dispatch
    /// deterministic when ready work queues up.
    pub async fn lease(&self) -> Result<AgentLease, AgentError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::PoolClosed(self.name.clone()))?;
        trace!(pool = %self.name, "agent lease acquired");
        Ok(AgentLease {
            agent: Arc::clone(&self.agent),
            _permit: permit,
        })
    }
}

/// An exclusive hold on one agent slot for the duration of a job.
pub struct AgentLease {
    agent: Arc<dyn Agent>,
    _permit: OwnedSemaphorePermit,
}

impl AgentLease {
    pub fn agent(&self) -> &dyn Agent {
        self.agent.as_ref()
    }
}

/// All pools a pipeline references, plus the fallback default pool.
pub struct PoolSet {
    pools: HashMap<String, Arc<AgentPool>>,
    default_pool: Arc<AgentPool>,
}

impl PoolSet {
    /// Collect every pool the definition references and size each one:
    /// the first declared capacity for a name wins, unspecified pools get
    /// the scheduler default.
    pub fn build(pipeline: &Pipeline, default_capacity: usize, agent: Arc<dyn Agent>) -> Self {
        let mut capacities: HashMap<String, Option<usize>> = HashMap::new();
        let mut note = |pool: &Pool| {
            let entry = capacities.entry(pool.name().to_string()).or_insert(None);
            if entry.is_none() {
                *entry = pool.capacity();
            }
        };

        if let Some(pool) = &pipeline.pool {
            note(pool);
        }
        for stage in &pipeline.stages {
            if let Some(pool) = &stage.pool {
                note(pool);
            }
            for job in &stage.jobs {
                if let Some(pool) = &job.pool {
                    note(pool);
                }
            }
        }

        let mut pools = HashMap::new();
        for (name, capacity) in capacities {
            let pool = Arc::new(AgentPool::new(
                name.clone(),
                capacity.unwrap_or(default_capacity),
                Arc::clone(&agent),
            ));
            pools.insert(name, pool);
        }

        let default_pool = pools
            .get(DEFAULT_POOL_NAME)
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(AgentPool::new(DEFAULT_POOL_NAME, default_capacity, agent))
            });

        Self {
            pools,
            default_pool,
        }
    }

    /// Resolve a job's pool: job override, then stage, then pipeline, then
    /// the default pool.
    pub fn resolve(&self, candidates: &[Option<&Pool>]) -> Arc<AgentPool> {
        for candidate in candidates.iter().flatten() {
            if let Some(pool) = self.pools.get(candidate.name()) {
                return Arc::clone(pool);
            }
        }
        Arc::clone(&self.default_pool)
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentPool>> {
        self.pools.get(name).cloned()
    }
}
