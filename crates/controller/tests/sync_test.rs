//! Control loops against mock data nodes

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{dead_address, wait_until, MockDataNode, MockNodeState};
use controller::event::event_channel;
use controller::failover::{FailOverConfig, FailOverExecutor};
use controller::migrator::{Migrator, MigratorConfig};
use controller::node_client::NodeClient;
use controller::probe::{HealthProbe, ProbeConfig};
use controller::store::{FailOverKind, MetaStore, MigrateTask};
use controller::syncer::{Syncer, SyncerConfig};
use metadata::{Cluster, SlotRange};
use persist::MemoryPersist;
use tokio::sync::watch;

const RPC_TIMEOUT: Duration = Duration::from_millis(500);

fn leader_store() -> Arc<MetaStore> {
    let store = Arc::new(MetaStore::new(Arc::new(MemoryPersist::new())));
    store.set_leader(true);
    store
}

async fn create_cluster(store: &MetaStore, addrs: &[String], replica: usize) -> Cluster {
    store.create_namespace("testNs").await.unwrap();
    let info = Cluster::assemble(addrs, replica).unwrap();
    store
        .create_cluster("testNs", "testCluster", Some(info.clone()))
        .await
        .unwrap();
    info
}

#[tokio::test]
async fn test_syncer_pushes_topology() {
    let master = MockDataNode::start().await;
    let replica = MockDataNode::start().await;
    let store = leader_store();

    let (event_tx, event_rx) = event_channel();
    store.install_event_sender(event_tx);
    let (term_tx, term_rx) = watch::channel(false);
    let syncer = Syncer::new(
        Arc::clone(&store),
        SyncerConfig {
            rpc_timeout: RPC_TIMEOUT,
            cluster_timeout: Duration::from_secs(5),
        },
    );
    let handle = tokio::spawn(syncer.run(event_rx, term_rx));

    let info = create_cluster(
        &store,
        &[master.addr.clone(), replica.addr.clone()],
        2,
    )
    .await;

    let master_state = Arc::clone(&master.state);
    let replica_state = Arc::clone(&replica.state);
    assert!(
        wait_until(
            || !master_state.lock().pushes.is_empty() && !replica_state.lock().pushes.is_empty(),
            Duration::from_secs(5)
        )
        .await,
        "topology was not pushed to both nodes"
    );

    let master_id = info.shards[0].master().unwrap().id.clone();
    let replica_id = info.shards[0].replicas()[0].id.clone();
    {
        let state = master.state.lock();
        assert_eq!(state.node_id.as_deref(), Some(master_id.as_str()));
        let (payload, version) = &state.pushes[0];
        assert_eq!(*version, 1);
        assert!(payload.contains(&master_id));
        assert!(payload.contains(&replica_id));
        assert!(payload.contains("master 0-16383"));
    }
    assert_eq!(
        replica.state.lock().node_id.as_deref(),
        Some(replica_id.as_str())
    );

    let _ = term_tx.send(true);
    let _ = handle.await;
}

#[tokio::test]
async fn test_sync_skips_version_already_applied() {
    let node = MockDataNode::start().await;
    let store = leader_store();
    create_cluster(&store, &[node.addr.clone()], 1).await;

    let mut syncer = Syncer::new(
        Arc::clone(&store),
        SyncerConfig {
            rpc_timeout: RPC_TIMEOUT,
            cluster_timeout: Duration::from_secs(5),
        },
    );
    syncer.sync_cluster("testNs", "testCluster").await.unwrap();
    assert_eq!(node.state.lock().pushes.len(), 1);
    let commands = node.state.lock().commands;

    // the same version is not pushed again
    syncer.sync_cluster("testNs", "testCluster").await.unwrap();
    assert_eq!(node.state.lock().commands, commands);

    // a mutation bumps the version and the next sync goes out
    let replica = metadata::NodeInfo::new("127.0.0.1:7200", metadata::Role::Replica);
    store
        .add_node("testNs", "testCluster", 0, replica)
        .await
        .unwrap();
    syncer.sync_cluster("testNs", "testCluster").await.unwrap();
    let state = node.state.lock();
    assert_eq!(state.pushes.len(), 2);
    assert_eq!(state.pushes[1].1, 2);
}

#[tokio::test]
async fn test_new_term_resyncs_existing_clusters() {
    let node = MockDataNode::start().await;
    let store = leader_store();
    // the topology exists before any event consumer does, as after a
    // leadership change where the event log was lost
    create_cluster(&store, &[node.addr.clone()], 1).await;

    let (_event_tx, event_rx) = event_channel();
    let (term_tx, term_rx) = watch::channel(false);
    let syncer = Syncer::new(
        Arc::clone(&store),
        SyncerConfig {
            rpc_timeout: RPC_TIMEOUT,
            cluster_timeout: Duration::from_secs(5),
        },
    );
    let handle = tokio::spawn(syncer.run(event_rx, term_rx));

    let state = Arc::clone(&node.state);
    assert!(
        wait_until(|| !state.lock().pushes.is_empty(), Duration::from_secs(5)).await,
        "full resync did not reach the node"
    );
    assert_eq!(node.state.lock().pushes[0].1, 1);

    let _ = term_tx.send(true);
    let _ = handle.await;
}

#[tokio::test]
async fn test_stale_push_is_idempotent() {
    let node = MockDataNode::start().await;
    {
        let mut state = node.state.lock();
        state.version = 5;
    }

    let mut client = NodeClient::connect(&node.addr, None, RPC_TIMEOUT)
        .await
        .unwrap();
    // an equal version is rejected by the node but treated as success
    client.set_nodes("payload", 5).await.unwrap();
    assert!(node.state.lock().pushes.is_empty());

    client.set_nodes("payload", 6).await.unwrap();
    assert_eq!(node.state.lock().pushes.len(), 1);

    // replaying the same version again changes nothing
    client.set_nodes("payload", 6).await.unwrap();
    assert_eq!(node.state.lock().pushes.len(), 1);
    assert_eq!(node.state.lock().version, 6);
}

#[tokio::test]
async fn test_probe_queues_auto_failover() {
    let store = leader_store();
    let dead_master = dead_address().await;
    let replica = MockDataNode::start().await;
    create_cluster(&store, &[dead_master, replica.addr.clone()], 2).await;

    let probe = HealthProbe::new(
        Arc::clone(&store),
        ProbeConfig {
            interval: Duration::from_millis(50),
            fail_threshold: 3,
            ping_timeout: Duration::from_millis(200),
        },
    );

    for _ in 0..2 {
        probe.probe_once().await.unwrap();
        assert!(store
            .list_failover_tasks("testNs", "testCluster")
            .await
            .unwrap()
            .is_empty());
    }
    probe.probe_once().await.unwrap();

    let tasks = store
        .list_failover_tasks("testNs", "testCluster")
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].shard_idx, 0);
    assert_eq!(tasks[0].kind, FailOverKind::Auto);
    assert_eq!(tasks[0].probe_count, 3);
}

#[tokio::test]
async fn test_failover_promotes_best_replica() {
    let store = leader_store();
    let dead_master = dead_address().await;
    let lagging = MockDataNode::start_with(MockNodeState {
        repl_offset: 10,
        ..Default::default()
    })
    .await;
    let caught_up = MockDataNode::start_with(MockNodeState {
        repl_offset: 100,
        ..Default::default()
    })
    .await;
    let info = create_cluster(
        &store,
        &[dead_master, lagging.addr.clone(), caught_up.addr.clone()],
        3,
    )
    .await;
    let expected_master = info.shards[0].nodes[2].id.clone();

    let executor = FailOverExecutor::new(
        Arc::clone(&store),
        FailOverConfig {
            interval: Duration::from_millis(50),
            rpc_timeout: RPC_TIMEOUT,
        },
    );
    let task = controller::store::FailOverTask {
        namespace: "testNs".to_string(),
        cluster: "testCluster".to_string(),
        shard_idx: 0,
        kind: FailOverKind::Auto,
        probe_count: 5,
        queued_at: 0,
        started_at: 0,
        finished_at: 0,
        error_detail: None,
    };
    store.update_failover_task(&task).await.unwrap();
    executor.execute_task(task).await.unwrap();

    let updated = store.get_cluster("testNs", "testCluster").await.unwrap();
    let shard = &updated.shards[0];
    assert_eq!(shard.master().unwrap().id, expected_master);
    // the dead master was dropped from the shard
    assert_eq!(shard.nodes.len(), 2);
    assert!(updated.version > info.version);

    let history = store
        .failover_history("testNs", "testCluster")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].error_detail.is_none());
    assert!(store
        .list_failover_tasks("testNs", "testCluster")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failover_without_replicas_records_error() {
    let store = leader_store();
    let dead_master = dead_address().await;
    create_cluster(&store, &[dead_master], 1).await;

    let executor = FailOverExecutor::new(
        Arc::clone(&store),
        FailOverConfig {
            interval: Duration::from_millis(50),
            rpc_timeout: RPC_TIMEOUT,
        },
    );
    let task = controller::store::FailOverTask {
        namespace: "testNs".to_string(),
        cluster: "testCluster".to_string(),
        shard_idx: 0,
        kind: FailOverKind::Manual,
        probe_count: 0,
        queued_at: 0,
        started_at: 0,
        finished_at: 0,
        error_detail: None,
    };
    executor.execute_task(task).await.unwrap();

    let history = store
        .failover_history("testNs", "testCluster")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error_detail.as_deref(), Some("no replica"));
}

#[tokio::test]
async fn test_migration_moves_slot_range() {
    let store = leader_store();
    let source = MockDataNode::start().await;
    let target = MockDataNode::start().await;
    let info = create_cluster(&store, &[source.addr.clone(), target.addr.clone()], 1).await;
    let target_master_id = info.shards[1].master().unwrap().id.clone();

    let range = SlotRange::new(0, 100).unwrap();
    let task = MigrateTask {
        task_id: 1,
        sub_id: 1,
        namespace: "testNs".to_string(),
        cluster: "testCluster".to_string(),
        source: 0,
        target: 1,
        slot_ranges: vec![range],
        error_detail: None,
        pending_time: 0,
        doing_time: 0,
        done_time: 0,
    };
    store
        .add_pending_migrate_tasks("testNs", "testCluster", vec![task])
        .await
        .unwrap();

    let migrator = Migrator::new(
        Arc::clone(&store),
        MigratorConfig {
            interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            task_timeout: Duration::from_secs(5),
            rpc_timeout: RPC_TIMEOUT,
        },
    );
    migrator.drive_cluster("testNs", "testCluster").await.unwrap();

    // the source master was told to hand the range to the target master
    let migrations = source.state.lock().migrations.clone();
    assert_eq!(migrations, vec![("0-99".to_string(), target_master_id)]);

    let updated = store.get_cluster("testNs", "testCluster").await.unwrap();
    assert!(!updated.shards[0].has_slot(0));
    assert!(updated.shards[0].has_slot(100));
    assert!(updated.shards[1].has_slot(0));
    assert!(updated.shards[1].has_slot(99));
    assert!(updated.shards[0].migrating_slot.is_none());
    assert!(updated.shards[1].import_slot.is_none());
    assert!(updated.is_initialized());

    let history = store.migrate_history("testNs", "testCluster").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].error_detail.is_none());
    assert!(history[0].done_time > 0);
    assert!(store
        .doing_migrate_task("testNs", "testCluster")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .pending_migrate_tasks("testNs", "testCluster")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_migration_freezes_group() {
    let store = leader_store();
    let source = MockDataNode::start_with(MockNodeState {
        migrate_state: "fail",
        ..Default::default()
    })
    .await;
    let target = MockDataNode::start().await;
    create_cluster(&store, &[source.addr.clone(), target.addr.clone()], 1).await;

    let make_task = |sub_id: u64, range: SlotRange| MigrateTask {
        task_id: 3,
        sub_id,
        namespace: "testNs".to_string(),
        cluster: "testCluster".to_string(),
        source: 0,
        target: 1,
        slot_ranges: vec![range],
        error_detail: None,
        pending_time: 0,
        doing_time: 0,
        done_time: 0,
    };
    store
        .add_pending_migrate_tasks(
            "testNs",
            "testCluster",
            vec![
                make_task(1, SlotRange::new(0, 100).unwrap()),
                make_task(2, SlotRange::new(100, 200).unwrap()),
            ],
        )
        .await
        .unwrap();

    let migrator = Migrator::new(
        Arc::clone(&store),
        MigratorConfig {
            interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            task_timeout: Duration::from_secs(5),
            rpc_timeout: RPC_TIMEOUT,
        },
    );
    // first pass runs sub-task 1 and fails it
    migrator.drive_cluster("testNs", "testCluster").await.unwrap();
    // second pass must not advance to sub-task 2
    migrator.drive_cluster("testNs", "testCluster").await.unwrap();

    let history = store.migrate_history("testNs", "testCluster").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sub_id, 1);
    assert!(history[0].error_detail.is_some());

    // the sibling stays queued and the slots stayed put
    let pending = store
        .pending_migrate_tasks("testNs", "testCluster")
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].len(), 1);
    assert_eq!(pending[0][0].sub_id, 2);

    let updated = store.get_cluster("testNs", "testCluster").await.unwrap();
    assert!(updated.shards[0].has_slot(0));
    assert!(updated.shards[0].migrating_slot.is_none());
}
