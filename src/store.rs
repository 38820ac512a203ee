//! Persisted instance and cluster state owned by an external collaborator.
//!
//! The orchestrator only reads rows, flips `is_provisioned`, and deletes an
//! instance row when compensation runs. [`MemoryInstanceStore`] backs the
//! daemon and the test suite.

use std::collections::HashMap;
use std::future::ready;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::backend::BackendFuture;
use crate::channel::expand_tilde;
use crate::cloud_init::read_ambient;
use crate::error::ProvisionError;

/// Role a machine plays, which drives its firewall rules.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceKind {
    /// A plain compose host.
    #[default]
    Compose,
    /// A Kubernetes control-plane node.
    KubernetesControlPlane,
    /// A Kubernetes worker node.
    KubernetesWorker,
}

/// An instance row.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Unique machine name, also used as the remote working directory name.
    pub name: String,
    /// Plan the instance was ordered with.
    pub plan_id: String,
    /// Role of the machine.
    #[serde(default)]
    pub kind: InstanceKind,
    /// When the collaborator's expiry sweep will reclaim the instance.
    #[serde(default)]
    pub expires_at_utc: Option<DateTime<Utc>>,
    /// Set once the final pipeline state has succeeded.
    #[serde(default)]
    pub is_provisioned: bool,
    /// Owning cluster.
    pub cluster_id: Uuid,
}

/// A cluster row.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster identifier.
    pub id: Uuid,
    /// Owning user, absent for unclaimed demo clusters.
    pub user_id: Option<String>,
    /// Names of the instances in the cluster.
    pub instances: Vec<String>,
}

/// Errors raised by an [`InstanceStore`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the named instance row does not exist.
    #[error("instance '{0}' not found")]
    InstanceNotFound(String),
    /// Raised when the backing store cannot be reached.
    #[error("instance store unavailable: {0}")]
    Unavailable(String),
    /// Raised when an inventory file cannot be read or parsed.
    #[error("invalid inventory: {0}")]
    Inventory(String),
}

impl From<StoreError> for ProvisionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::InstanceNotFound(name) => Self::NotFound {
                resource: format!("instance '{name}'"),
            },
            StoreError::Unavailable(message) | StoreError::Inventory(message) => {
                Self::Provider { message }
            }
        }
    }
}

/// Narrow persistence interface used by the orchestrator.
pub trait InstanceStore: Send + Sync {
    /// Loads an instance by name.
    fn find_instance<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<Instance>, StoreError>;

    /// Loads a cluster by id.
    fn find_cluster(&self, id: Uuid) -> BackendFuture<'_, Option<Cluster>, StoreError>;

    /// Marks the named instance as provisioned.
    fn mark_provisioned<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), StoreError>;

    /// Deletes the named instance, returning whether a row was removed.
    fn delete_instance<'a>(&'a self, name: &'a str) -> BackendFuture<'a, bool, StoreError>;
}

/// Rows loaded into a [`MemoryInstanceStore`] at startup.
///
/// The file is YAML (JSON also parses) with `clusters` and `instances` lists
/// using the same camelCase keys as the rows themselves.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Inventory {
    /// Cluster rows.
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    /// Instance rows.
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Inventory {
    /// Parses inventory text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inventory`] for malformed documents.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        serde_yaml::from_str(text).map_err(|err| StoreError::Inventory(err.to_string()))
    }

    /// Reads and parses the inventory at `path`. A leading `~` expands to the
    /// home directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inventory`] when the file cannot be read or
    /// parsed.
    pub fn load(path: &str) -> Result<Self, StoreError> {
        let expanded = expand_tilde(path);
        let text = read_ambient(Utf8Path::new(&expanded))
            .map_err(|message| StoreError::Inventory(format!("{expanded}: {message}")))?;
        Self::parse(&text)
    }
}

#[derive(Debug, Default)]
struct Tables {
    instances: HashMap<String, Instance>,
    clusters: HashMap<Uuid, Cluster>,
}

/// In-memory [`InstanceStore`] shared between clones.
#[derive(Clone, Debug, Default)]
pub struct MemoryInstanceStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryInstanceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a store holding the rows of `inventory`.
    #[must_use]
    pub fn from_inventory(inventory: Inventory) -> Self {
        let store = Self::new();
        for cluster in inventory.clusters {
            store.insert_cluster(cluster);
        }
        for instance in inventory.instances {
            store.insert_instance(instance);
        }
        store
    }

    /// Inserts or replaces a cluster row.
    pub fn insert_cluster(&self, cluster: Cluster) {
        self.lock().clusters.insert(cluster.id, cluster);
    }

    /// Inserts or replaces an instance row and links it to its cluster.
    pub fn insert_instance(&self, instance: Instance) {
        let mut tables = self.lock();
        if let Some(cluster) = tables.clusters.get_mut(&instance.cluster_id)
            && !cluster.instances.contains(&instance.name)
        {
            cluster.instances.push(instance.name.clone());
        }
        tables.instances.insert(instance.name.clone(), instance);
    }

    /// Returns the number of instance rows.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    /// Synchronous lookup for callers outside an async context.
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<Instance> {
        self.lock().instances.get(name).cloned()
    }
}

impl MemoryInstanceStore {
    fn set_provisioned(&self, name: &str) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let instance = tables
            .instances
            .get_mut(name)
            .ok_or_else(|| StoreError::InstanceNotFound(name.to_owned()))?;
        instance.is_provisioned = true;
        Ok(())
    }

    fn remove_instance(&self, name: &str) -> bool {
        let mut tables = self.lock();
        let removed = tables.instances.remove(name);
        if let Some(instance) = &removed
            && let Some(cluster) = tables.clusters.get_mut(&instance.cluster_id)
        {
            cluster.instances.retain(|member| member != name);
        }
        removed.is_some()
    }
}

impl InstanceStore for MemoryInstanceStore {
    fn find_instance<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Option<Instance>, StoreError> {
        Box::pin(ready(Ok(self.instance(name))))
    }

    fn find_cluster(&self, id: Uuid) -> BackendFuture<'_, Option<Cluster>, StoreError> {
        let cluster = self.lock().clusters.get(&id).cloned();
        Box::pin(ready(Ok(cluster)))
    }

    fn mark_provisioned<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), StoreError> {
        Box::pin(ready(self.set_provisioned(name)))
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> BackendFuture<'a, bool, StoreError> {
        Box::pin(ready(Ok(self.remove_instance(name))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (MemoryInstanceStore, Uuid) {
        let store = MemoryInstanceStore::new();
        let cluster_id = Uuid::new_v4();
        store.insert_cluster(Cluster {
            id: cluster_id,
            user_id: Some(String::from("alice")),
            instances: Vec::new(),
        });
        store.insert_instance(Instance {
            name: String::from("web-1"),
            plan_id: String::from("2gb"),
            kind: InstanceKind::Compose,
            expires_at_utc: None,
            is_provisioned: false,
            cluster_id,
        });
        (store, cluster_id)
    }

    #[tokio::test]
    async fn links_and_unlinks_cluster_members() {
        let (store, cluster_id) = seeded();
        let cluster = store.find_cluster(cluster_id).await.expect("lookup");
        assert_eq!(cluster.map(|c| c.instances), Some(vec![String::from("web-1")]));

        assert!(store.delete_instance("web-1").await.expect("delete"));
        assert!(!store.delete_instance("web-1").await.expect("second delete"));
        let cluster = store.find_cluster(cluster_id).await.expect("lookup");
        assert_eq!(cluster.map(|c| c.instances), Some(Vec::new()));
    }

    #[tokio::test]
    async fn inventory_seeds_clusters_and_instances() {
        let text = concat!(
            "clusters:\n",
            "  - id: 6f1d7a1e-8c38-4a53-9a8e-2f7d4b1c0a11\n",
            "    userId: alice\n",
            "    instances: []\n",
            "instances:\n",
            "  - name: web-1\n",
            "    planId: 4gb\n",
            "    kind: kubernetesWorker\n",
            "    clusterId: 6f1d7a1e-8c38-4a53-9a8e-2f7d4b1c0a11\n",
        );
        let store = MemoryInstanceStore::from_inventory(Inventory::parse(text).expect("parse"));

        let row = store.instance("web-1").expect("seeded row");
        assert_eq!(row.kind, InstanceKind::KubernetesWorker);
        assert!(!row.is_provisioned);
        let cluster = store.find_cluster(row.cluster_id).await.expect("lookup");
        assert_eq!(cluster.map(|c| c.instances), Some(vec![String::from("web-1")]));
    }

    #[test]
    fn malformed_inventory_is_rejected() {
        let err = Inventory::parse("instances: {name: 3").expect_err("malformed");
        assert!(matches!(err, StoreError::Inventory(_)), "{err:?}");
    }

    #[tokio::test]
    async fn marks_rows_provisioned() {
        let (store, _) = seeded();
        store.mark_provisioned("web-1").await.expect("mark");
        assert!(store.instance("web-1").is_some_and(|row| row.is_provisioned));

        let err = store.mark_provisioned("ghost").await.expect_err("missing row");
        assert_eq!(err, StoreError::InstanceNotFound(String::from("ghost")));
    }
}
