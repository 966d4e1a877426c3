// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::protocol::{MessageMetadata, ProtocolEventHandler, ProtocolType, TransportType};
use crate::shadow::classifier::{NullResponseDecoder, ResponseClassifier};
use crate::shadow::router::{RouterState, ShadowRouter};
use crate::shadow::stats::ShadowStats;
use crate::upstream::ClusterManager;

/// Builds the response classifier of each new router.
pub type ClassifierFactory = Box<dyn Fn(TransportType, ProtocolType) -> Box<dyn ResponseClassifier>>;

/// Why a request was not mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ClusterNotFound,
    MaintenanceMode,
    NoHealthyUpstream,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterNotFound => "cluster_not_found",
            Self::MaintenanceMode => "maintenance_mode",
            Self::NoHealthyUpstream => "no_healthy_upstream",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`ShadowWriter::submit`].
pub enum Submission {
    Routed(ShadowRouterHandle),
    Absent(SkipReason),
}

impl Submission {
    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Routed(_))
    }

    pub fn handle(&self) -> Option<&ShadowRouterHandle> {
        match self {
            Self::Routed(handle) => Some(handle),
            Self::Absent(_) => None,
        }
    }

    pub fn into_handle(self) -> Option<ShadowRouterHandle> {
        match self {
            Self::Routed(handle) => Some(handle),
            Self::Absent(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Routed(_) => None,
            Self::Absent(reason) => Some(*reason),
        }
    }
}

/// Caller's side of a shadow request.
///
/// The request is fed by replaying the protocol events of the original
/// message on [`request_owner`](Self::request_owner), ending with
/// `message_end`.
#[derive(Clone)]
pub struct ShadowRouterHandle {
    router: Rc<ShadowRouter>,
}

impl ShadowRouterHandle {
    pub fn request_owner(&self) -> &dyn ProtocolEventHandler {
        self.router.as_ref()
    }

    pub fn waiting_for_connection(&self) -> bool {
        self.router.waiting_for_connection()
    }

    pub fn state(&self) -> RouterState {
        self.router.state()
    }

    pub fn router(&self) -> &Rc<ShadowRouter> {
        &self.router
    }
}

/// Routers in flight, keyed by id. Routers hold a weak reference and remove
/// themselves when they reach a terminal state.
#[derive(Default)]
pub(crate) struct ActiveRouters {
    routers: RefCell<HashMap<u64, Rc<ShadowRouter>>>,
}

impl ActiveRouters {
    fn insert(&self, router: Rc<ShadowRouter>) {
        self.routers.borrow_mut().insert(router.id(), router);
    }

    pub(crate) fn remove(&self, id: u64) {
        // Bind the removed router so it is dropped after the borrow ends.
        let removed = self.routers.borrow_mut().remove(&id);
        drop(removed);
    }

    fn len(&self) -> usize {
        self.routers.borrow().len()
    }

    fn drain(&self) -> Vec<Rc<ShadowRouter>> {
        self.routers
            .borrow_mut()
            .drain()
            .map(|(_, router)| router)
            .collect()
    }
}

/// Fire-and-forget mirroring of Thrift requests to shadow clusters.
///
/// The writer belongs to one event-loop thread. Requests it accepts run
/// until their response is classified or their connection fails; dropping
/// the writer tears every unfinished request down.
pub struct ShadowWriter {
    cluster_manager: Rc<dyn ClusterManager>,
    stats: ShadowStats,
    classifier_factory: ClassifierFactory,
    active: Rc<ActiveRouters>,
    next_id: Cell<u64>,
}

impl ShadowWriter {
    pub fn new(cluster_manager: Rc<dyn ClusterManager>, stats: ShadowStats) -> Self {
        Self {
            cluster_manager,
            stats,
            classifier_factory: Box::new(|transport, protocol| {
                Box::new(NullResponseDecoder::new(transport, protocol))
            }),
            active: Rc::new(ActiveRouters::default()),
            next_id: Cell::new(1),
        }
    }

    /// Replace the classifier used for shadow responses.
    pub fn with_classifier_factory(mut self, factory: ClassifierFactory) -> Self {
        self.classifier_factory = factory;
        self
    }

    pub fn stats(&self) -> &ShadowStats {
        &self.stats
    }

    /// Number of requests still in flight.
    pub fn active_routers(&self) -> usize {
        self.active.len()
    }

    /// Start mirroring a request to `cluster_name`.
    ///
    /// Returns [`Submission::Absent`] when the cluster is unknown, in
    /// maintenance, or has no connection pool for `protocol`. The request
    /// counter is bumped once the cluster is found healthy, even when no
    /// pool is available afterwards.
    pub fn submit(
        &self,
        cluster_name: &str,
        metadata: Rc<MessageMetadata>,
        transport: TransportType,
        protocol: ProtocolType,
    ) -> Submission {
        let Some(cluster) = self.cluster_manager.get_thread_local_cluster(cluster_name) else {
            tracing::debug!(cluster = %cluster_name, "unknown shadow cluster");
            return Submission::Absent(SkipReason::ClusterNotFound);
        };

        if cluster.maintenance_mode() {
            tracing::debug!(cluster = %cluster_name, "shadow cluster in maintenance mode");
            return Submission::Absent(SkipReason::MaintenanceMode);
        }

        self.stats.inc_request(cluster_name, metadata.message_type);

        let Some(pool) = cluster.tcp_conn_pool(protocol) else {
            tracing::debug!(cluster = %cluster_name, "no healthy upstream for shadow request");
            return Submission::Absent(SkipReason::NoHealthyUpstream);
        };

        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));

        tracing::debug!(
            router = id,
            cluster = %cluster_name,
            method = %metadata.method_name,
            message_type = %metadata.message_type,
            "mirroring request"
        );

        let router = ShadowRouter::new(
            id,
            cluster_name,
            metadata,
            transport,
            protocol,
            self.stats.clone(),
            (self.classifier_factory)(transport, protocol),
            Rc::downgrade(&self.active),
        );
        // Registered first: the pool may resolve the request synchronously.
        self.active.insert(Rc::clone(&router));
        router.start(pool);

        Submission::Routed(ShadowRouterHandle { router })
    }
}

impl Drop for ShadowWriter {
    fn drop(&mut self) {
        let routers = self.active.drain();
        if !routers.is_empty() {
            tracing::debug!(count = routers.len(), "tearing down shadow requests");
        }
        for router in routers {
            router.on_writer_teardown();
        }
    }
}
