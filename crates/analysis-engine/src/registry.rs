//! Variant → pool registry.
//!
//! The primary pool is created by [`EngineRegistry::start`]; other variants get
//! their pool on first demand. Each variant has one cell, so two concurrent
//! first requests never build the same pool twice, and building one variant's
//! pool never blocks lookups of another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{AppConfig, EngineSettings, EngineSpec, Variant};
use crate::pool::{EnginePool, PoolStats};

pub struct EngineRegistry {
    primary: EngineSpec,
    alternate: EngineSpec,
    settings: EngineSettings,
    pools: Mutex<HashMap<Variant, Arc<OnceCell<EnginePool>>>>,
}

impl EngineRegistry {
    /// Registry with no pools created yet.
    pub fn new(primary: EngineSpec, alternate: EngineSpec, settings: EngineSettings) -> Self {
        Self {
            primary,
            alternate,
            settings,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.primary.clone(),
            config.alternate.clone(),
            config.engine.clone(),
        )
    }

    /// Build the registry and eagerly create the primary pool.
    pub async fn start(config: &AppConfig) -> Self {
        let registry = Self::from_config(config);
        registry.pool(Variant::Primary).await;
        registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn spec(&self, variant: Variant) -> &EngineSpec {
        match variant {
            Variant::Primary => &self.primary,
            Variant::Alternate => &self.alternate,
        }
    }

    /// Pool for `variant`, creating it on first use.
    pub async fn pool(&self, variant: Variant) -> EnginePool {
        let cell = self.pools.lock().entry(variant).or_default().clone();
        cell.get_or_init(|| async {
            if variant != Variant::Primary {
                info!(variant = %variant, "Lazy initializing engine pool");
            }
            EnginePool::start(variant, self.spec(variant).clone(), self.settings.clone()).await
        })
        .await
        .clone()
    }

    fn created(&self, variant: Variant) -> Option<EnginePool> {
        let cell = self.pools.lock().get(&variant).cloned()?;
        cell.get().cloned()
    }

    /// Statistics without creating the pool. A pool still starting up
    /// reports as not initialized.
    pub async fn stats(&self, variant: Variant) -> PoolStats {
        match self.created(variant) {
            Some(pool) => pool.stats(),
            None => PoolStats {
                variant,
                capacity: self.settings.pool_size,
                idle: 0,
                leased: 0,
                initialized: false,
            },
        }
    }

    pub async fn stats_all(&self) -> Vec<PoolStats> {
        let mut all = Vec::with_capacity(Variant::ALL.len());
        for variant in Variant::ALL {
            all.push(self.stats(variant).await);
        }
        all
    }

    /// Shut down every pool created so far.
    pub async fn shutdown(&self) {
        let pools: Vec<EnginePool> = Variant::ALL.into_iter().filter_map(|v| self.created(v)).collect();
        for pool in pools {
            pool.shutdown().await;
        }
    }
}
