// SPDX-License-Identifier: MIT OR Apache-2.0
//! Courier node composition root.
//!
//! [`Node::open`] constructs every component once from a single
//! [`CourierConfig`] and wires them together — there are no singletons and
//! no implicit configuration anywhere below this layer.
//! [`Node::start_background`] spawns the long-running tasks: the TTL engine
//! and the lifecycle pump that turns expiry events into receipts.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use anyhow::{Context, Result};
use courier_cache::CacheBudget;
use courier_config::CourierConfig;
use courier_crypto::NodeKeys;
use courier_policy::ForwardingPolicy;
use courier_receipt::{ReceiptService, ReceiptType};
use courier_service::BundleService;
use courier_store::QueueStore;
use courier_sync::{SyncEndpoint, SyncSession};
use courier_trust::{Keyring, TrustLevel, TrustStore};
use courier_ttl::{LifecycleEvent, TtlEngine};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handles to a node's spawned background tasks.
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal every task to stop and wait for them.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// A fully wired courier node.
pub struct Node {
    /// The configuration everything was built from.
    pub config: CourierConfig,
    /// Node identity keys.
    pub keys: Arc<NodeKeys>,
    /// The durable queue store.
    pub store: Arc<QueueStore>,
    /// Keyrings and trust levels.
    pub trust: Arc<TrustStore>,
    /// Cache budget accountant.
    pub cache: Arc<CacheBudget>,
    /// Forwarding policy engine.
    pub policy: Arc<ForwardingPolicy>,
    /// Bundle façade.
    pub bundles: Arc<BundleService>,
    /// Receipt service.
    pub receipts: Arc<ReceiptService>,
}

impl Node {
    /// Build a node from configuration: load or generate keys, open the
    /// store (running migrations), load the trust store, and wire every
    /// component.
    ///
    /// The node's own key is seeded into the `verified` keyring so it may
    /// author its own `private` receipt bundles.
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to initialize.
    pub async fn open(config: CourierConfig) -> Result<Node> {
        config.validate().context("invalid configuration")?;
        for warning in config.warnings() {
            warn!(%warning, "configuration warning");
        }
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {}", config.data_dir.display()))?;

        let keys = Arc::new(
            NodeKeys::load_or_generate(&config.keys_dir()).context("node keypair")?,
        );
        let store = Arc::new(QueueStore::open(&config.db_path()).context("bundle store")?);
        let trust =
            Arc::new(TrustStore::load(&config.trust_store_path()).context("trust store")?);

        if !trust
            .is_in_keyring(keys.public_key_pem(), Keyring::Verified)
            .await
        {
            trust
                .add_key(keys.public_key_pem(), Keyring::Verified, TrustLevel::Verified)
                .await
                .context("seed self-trust")?;
        }

        let cache = Arc::new(CacheBudget::with_thresholds(
            store.clone(),
            config.storage_budget_bytes,
            config.warn_threshold,
            config.evict_threshold,
            config.evict_target,
        ));
        let policy = Arc::new(ForwardingPolicy::new(store.clone(), trust.clone()));
        let bundles = Arc::new(BundleService::new(
            keys.clone(),
            store.clone(),
            trust.clone(),
            config.default_hop_limit,
        ));
        let receipts = Arc::new(ReceiptService::new(
            bundles.clone(),
            store.clone(),
            keys.fingerprint().to_string(),
        ));

        info!(fingerprint = keys.fingerprint(), "node ready");
        Ok(Node {
            config,
            keys,
            store,
            trust,
            cache,
            policy,
            bundles,
            receipts,
        })
    }

    /// The responder other peers sync against.
    #[must_use]
    pub fn sync_endpoint(&self) -> SyncEndpoint {
        SyncEndpoint::new(
            self.store.clone(),
            self.bundles.clone(),
            self.receipts.clone(),
            self.policy.clone(),
            self.cache.clone(),
        )
    }

    /// A session driver for initiating rounds against peers.
    #[must_use]
    pub fn sync_session(&self, max_bundles: usize) -> SyncSession {
        SyncSession::new(self.sync_endpoint(), max_bundles)
    }

    /// Spawn the TTL engine and the lifecycle-receipt pump.
    #[must_use]
    pub fn start_background(&self) -> BackgroundTasks {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, mut event_rx) = mpsc::channel::<LifecycleEvent>(256);

        let engine = TtlEngine::new(
            self.store.clone(),
            std::time::Duration::from_secs(self.config.ttl_check_interval_seconds),
            self.config.expired_retention_days,
            self.config.quarantine_retention_days,
        )
        .with_events(event_tx);
        let ttl_handle = tokio::spawn(engine.run(shutdown_rx));

        let receipts = self.receipts.clone();
        let pump_handle = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    LifecycleEvent::Expired(bundle) => {
                        if let Err(e) = receipts
                            .emit(
                                &bundle,
                                ReceiptType::Expired,
                                Some("Bundle TTL expired".to_string()),
                            )
                            .await
                        {
                            warn!(bundle_id = %bundle.bundle_id, error = %e, "failed to emit expired receipt");
                        }
                    }
                }
            }
        });

        BackgroundTasks {
            shutdown: shutdown_tx,
            handles: vec![ttl_handle, pump_handle],
        }
    }

    /// Run a cache eviction pass and emit `deleted` receipts for what it
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error on persistence failure.
    pub async fn enforce_cache(&self) -> Result<usize> {
        let report = self.cache.enforce().await?;
        for evicted in &report.evicted {
            if let Err(e) = self
                .receipts
                .emit(
                    evicted,
                    ReceiptType::Deleted,
                    Some("Cache eviction".to_string()),
                )
                .await
            {
                warn!(bundle_id = %evicted.bundle_id, error = %e, "failed to emit deleted receipt");
            }
        }
        Ok(report.count())
    }
}
