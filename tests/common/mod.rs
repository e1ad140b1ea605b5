// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared two-node harness for the end-to-end scenarios.
#![allow(dead_code)]

use courier_config::CourierConfig;
use courier_model::{Bundle, BundleDraft, Priority};
use courier_node::Node;
use courier_policy::PeerContext;
use courier_sync::{ChannelTransport, SyncReport};
use courier_trust::{Keyring, TrustLevel};
use serde_json::{Map, Value};
use tempfile::TempDir;

/// A node plus the tempdir its state lives in.
pub struct TestNode {
    _dir: TempDir,
    pub node: Node,
}

impl TestNode {
    /// Open a node on fresh temp state with the default 2 GiB budget.
    pub async fn open() -> TestNode {
        Self::open_with(|_| {}).await
    }

    /// Open a node with a config tweak applied first.
    pub async fn open_with(tweak: impl FnOnce(&mut CourierConfig)) -> TestNode {
        let dir = TempDir::new().unwrap();
        let mut config = CourierConfig {
            data_dir: dir.path().join("node"),
            ..CourierConfig::default()
        };
        tweak(&mut config);
        let node = Node::open(config).await.unwrap();
        TestNode { _dir: dir, node }
    }

    /// How this node appears to a peer: its key, with good standing.
    pub fn context(&self) -> PeerContext {
        PeerContext::new(self.node.keys.public_key_pem())
            .trust_score(0.8)
            .local(true)
    }

    /// Author a bundle and stage it in `pending`.
    pub async fn stage(&self, draft: BundleDraft) -> Bundle {
        let bundle = self.node.bundles.create_bundle(draft).await.unwrap();
        self.node
            .policy
            .move_to_pending(&bundle.bundle_id)
            .await
            .unwrap();
        bundle
    }

    /// Move every outbox bundle (receipts included) into `pending`.
    pub async fn stage_outbox(&self) {
        let outbox = self
            .node
            .bundles
            .list_bundles(courier_model::QueueName::Outbox, 1000, 0)
            .await
            .unwrap();
        for bundle in outbox {
            self.node
                .policy
                .move_to_pending(&bundle.bundle_id)
                .await
                .unwrap();
        }
    }
}

/// Mutual pairing: each node records the other's key as a verified local
/// community member.
pub async fn pair(a: &TestNode, b: &TestNode) {
    a.node
        .trust
        .add_key(
            b.node.keys.public_key_pem(),
            Keyring::Verified,
            TrustLevel::Verified,
        )
        .await
        .unwrap();
    a.node
        .trust
        .add_key(
            b.node.keys.public_key_pem(),
            Keyring::Local,
            TrustLevel::Verified,
        )
        .await
        .unwrap();
    b.node
        .trust
        .add_key(
            a.node.keys.public_key_pem(),
            Keyring::Verified,
            TrustLevel::Verified,
        )
        .await
        .unwrap();
    b.node
        .trust
        .add_key(
            a.node.keys.public_key_pem(),
            Keyring::Local,
            TrustLevel::Verified,
        )
        .await
        .unwrap();
}

/// Run one initiator round from `a` against `b`.
pub async fn sync(a: &TestNode, b: &TestNode) -> SyncReport {
    let (mut ta, mut tb) = ChannelTransport::pair(64);
    let b_endpoint = b.node.sync_endpoint();
    let a_ctx = a.context();
    let server = tokio::spawn(async move { b_endpoint.serve(&mut tb, &a_ctx).await });

    let report = a
        .node
        .sync_session(100)
        .run(&mut ta, &b.context())
        .await
        .unwrap();
    server.await.unwrap().unwrap();
    report
}

/// A simple offer draft.
pub fn offer(note: &str, priority: Priority) -> BundleDraft {
    let mut payload = Map::new();
    payload.insert("note".into(), Value::String(note.into()));
    BundleDraft::new("mutual-aid", "mesh:offer", payload).priority(priority)
}
