//! Persisted key schema
//!
//! Task ids in keys are zero-padded to 20 digits so lexicographic key
//! order equals numeric order.

/// Election key holding the current controller identity
pub const LEADER_KEY: &str = "/controller/leader";

/// Prefix under which namespace markers live
pub const NAMESPACE_PREFIX: &str = "/namespace/";

pub fn namespace_key(namespace: &str) -> String {
    format!("{}{}", NAMESPACE_PREFIX, namespace)
}

/// Prefix covering every record of a namespace's clusters
pub fn namespace_root(namespace: &str) -> String {
    format!("/{}/", namespace)
}

/// Prefix covering every record of one cluster
pub fn cluster_root(namespace: &str, cluster: &str) -> String {
    format!("/{}/{}/", namespace, cluster)
}

pub fn cluster_info_key(namespace: &str, cluster: &str) -> String {
    format!("/{}/{}/info", namespace, cluster)
}

fn padded(id: u64) -> String {
    format!("{:020}", id)
}

fn task_suffix(task_id: u64, sub_id: u64) -> String {
    format!("{}_{}", padded(task_id), padded(sub_id))
}

pub fn migrate_pending_prefix(namespace: &str, cluster: &str) -> String {
    format!("/{}/{}/migrate/pending/", namespace, cluster)
}

pub fn migrate_pending_key(namespace: &str, cluster: &str, task_id: u64) -> String {
    format!("{}{}", migrate_pending_prefix(namespace, cluster), padded(task_id))
}

pub fn migrate_doing_prefix(namespace: &str, cluster: &str) -> String {
    format!("/{}/{}/migrate/doing/", namespace, cluster)
}

pub fn migrate_doing_key(namespace: &str, cluster: &str, task_id: u64, sub_id: u64) -> String {
    format!(
        "{}{}",
        migrate_doing_prefix(namespace, cluster),
        task_suffix(task_id, sub_id)
    )
}

/// Prefix matching every doing entry of one task group
pub fn migrate_doing_task_prefix(namespace: &str, cluster: &str, task_id: u64) -> String {
    format!("{}{}_", migrate_doing_prefix(namespace, cluster), padded(task_id))
}

pub fn migrate_history_prefix(namespace: &str, cluster: &str) -> String {
    format!("/{}/{}/migrate/history/", namespace, cluster)
}

pub fn migrate_history_key(namespace: &str, cluster: &str, task_id: u64, sub_id: u64) -> String {
    format!(
        "{}{}",
        migrate_history_prefix(namespace, cluster),
        task_suffix(task_id, sub_id)
    )
}

/// Prefix matching every history entry of one task group
pub fn migrate_history_task_prefix(namespace: &str, cluster: &str, task_id: u64) -> String {
    format!(
        "{}{}_",
        migrate_history_prefix(namespace, cluster),
        padded(task_id)
    )
}

pub fn failover_tasks_prefix(namespace: &str, cluster: &str) -> String {
    format!("/{}/{}/failover/tasks/", namespace, cluster)
}

pub fn failover_task_key(namespace: &str, cluster: &str, shard_idx: usize) -> String {
    format!("{}{}", failover_tasks_prefix(namespace, cluster), shard_idx)
}

pub fn failover_history_prefix(namespace: &str, cluster: &str) -> String {
    format!("/{}/{}/failover/history/", namespace, cluster)
}

pub fn failover_history_key(
    namespace: &str,
    cluster: &str,
    timestamp: i64,
    shard_idx: usize,
) -> String {
    format!(
        "{}{:020}_{}",
        failover_history_prefix(namespace, cluster),
        timestamp.max(0),
        shard_idx
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(namespace_key("ns"), "/namespace/ns");
        assert_eq!(cluster_info_key("ns", "c"), "/ns/c/info");
        assert_eq!(
            migrate_pending_key("ns", "c", 1),
            "/ns/c/migrate/pending/00000000000000000001"
        );
        assert_eq!(
            migrate_history_key("ns", "c", 1, 2),
            "/ns/c/migrate/history/00000000000000000001_00000000000000000002"
        );
        assert_eq!(failover_task_key("ns", "c", 0), "/ns/c/failover/tasks/0");
    }

    #[test]
    fn test_padded_keys_sort_numerically() {
        let early = migrate_history_key("ns", "c", 2, 1);
        let late = migrate_history_key("ns", "c", 10, 1);
        assert!(early < late);
    }
}
