// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Static upstream clusters loaded from YAML.
//!
//! ```yaml
//! clusters:
//!   - name: shadow
//!     hosts: ["10.0.0.7:9090", "10.0.0.8:9090"]
//!   - name: legacy
//!     hosts: []
//!     maintenance: true
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use thrift_shadow::upstream::{ClusterManager, ConnectionPool, ThreadLocalCluster};
use thrift_shadow::ProtocolType;

use crate::metrics::Metrics;
use crate::pool::{PoolTimeouts, TcpConnectionPool};

#[derive(Debug, Error)]
pub enum ClusterConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid clusters file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("cluster {cluster}: invalid host address {host:?}")]
    InvalidAddress { cluster: String, host: String },
    #[error("cluster {0} is defined twice")]
    Duplicate(String),
    #[error("cluster name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClustersFile {
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub maintenance: bool,
}

impl ClustersFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, ClusterConfigError> {
        let file: Self = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClusterConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ClusterConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    fn validate(&self) -> Result<(), ClusterConfigError> {
        let mut seen = std::collections::HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.is_empty() {
                return Err(ClusterConfigError::EmptyName);
            }
            if !seen.insert(cluster.name.as_str()) {
                return Err(ClusterConfigError::Duplicate(cluster.name.clone()));
            }
            cluster.addresses()?;
        }
        Ok(())
    }
}

impl ClusterConfig {
    pub fn addresses(&self) -> Result<Vec<SocketAddr>, ClusterConfigError> {
        self.hosts
            .iter()
            .map(|host| {
                host.parse().map_err(|_| ClusterConfigError::InvalidAddress {
                    cluster: self.name.clone(),
                    host: host.clone(),
                })
            })
            .collect()
    }
}

/// A cluster with a fixed host list. Clusters without hosts have no pool
/// and therefore no healthy upstream.
pub struct StaticCluster {
    name: String,
    maintenance: bool,
    pool: Option<Rc<TcpConnectionPool>>,
}

impl ThreadLocalCluster for StaticCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn maintenance_mode(&self) -> bool {
        self.maintenance
    }

    fn tcp_conn_pool(&self, _protocol: ProtocolType) -> Option<Rc<dyn ConnectionPool>> {
        self.pool
            .clone()
            .map(|pool| pool as Rc<dyn ConnectionPool>)
    }
}

/// Cluster registry of one worker thread.
#[derive(Default)]
pub struct StaticClusterManager {
    clusters: HashMap<String, Rc<StaticCluster>>,
}

impl StaticClusterManager {
    pub fn new(
        file: &ClustersFile,
        timeouts: PoolTimeouts,
        metrics: &Metrics,
    ) -> Result<Self, ClusterConfigError> {
        let mut clusters = HashMap::new();
        for config in &file.clusters {
            let hosts = config.addresses()?;
            let pool = (!hosts.is_empty()).then(|| {
                Rc::new(TcpConnectionPool::new(
                    &config.name,
                    hosts,
                    timeouts,
                    metrics.clone(),
                ))
            });
            let cluster = StaticCluster {
                name: config.name.clone(),
                maintenance: config.maintenance,
                pool,
            };
            if clusters.insert(config.name.clone(), Rc::new(cluster)).is_some() {
                return Err(ClusterConfigError::Duplicate(config.name.clone()));
            }
        }
        tracing::info!(clusters = clusters.len(), "loaded upstream clusters");
        Ok(Self { clusters })
    }

    pub fn cluster(&self, name: &str) -> Option<&Rc<StaticCluster>> {
        self.clusters.get(name)
    }
}

impl ClusterManager for StaticClusterManager {
    fn get_thread_local_cluster(&self, name: &str) -> Option<Rc<dyn ThreadLocalCluster>> {
        self.clusters
            .get(name)
            .map(|cluster| Rc::clone(cluster) as Rc<dyn ThreadLocalCluster>)
    }
}
