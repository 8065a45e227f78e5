use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::ledger::Ledger;
use crate::integrations::events::{BroadcastPublisher, EventEnvelope, EventPublisher};
use crate::integrations::geofence::{Geofence, RadiusGeofence};
use crate::integrations::notifier::{LogNotifier, Notifier};
use crate::models::negotiation::NegotiationLog;
use crate::models::order::{Order, Rating};
use crate::models::party::Party;
use crate::models::promo::PromoCode;
use crate::observability::metrics::Metrics;

/// Shared tables and collaborators.
///
/// Lock order when more than one row is touched: order row, then party row,
/// then the ledger. Never hold two party rows at once.
pub struct AppState {
    pub config: Config,
    pub parties: DashMap<i64, Party>,
    pub orders: DashMap<i64, Order>,
    pub negotiation_logs: DashMap<i64, Vec<NegotiationLog>>,
    pub promo_codes: DashMap<String, PromoCode>,
    pub ratings: DashMap<i64, Rating>,
    pub ledger: Ledger,
    pub events_tx: broadcast::Sender<EventEnvelope>,
    pub publisher: Arc<dyn EventPublisher>,
    pub notifier: Arc<dyn Notifier>,
    pub geofence: Arc<dyn Geofence>,
    pub metrics: Metrics,
    party_seq: AtomicI64,
    order_seq: AtomicI64,
    log_seq: AtomicI64,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));
        let publisher = Arc::new(BroadcastPublisher::new(events_tx.clone()));
        let geofence = Arc::new(RadiusGeofence::new(
            config.operation_center,
            config.operation_radius_km,
        ));

        Self {
            config,
            parties: DashMap::new(),
            orders: DashMap::new(),
            negotiation_logs: DashMap::new(),
            promo_codes: DashMap::new(),
            ratings: DashMap::new(),
            ledger: Ledger::new(),
            events_tx,
            publisher,
            notifier: Arc::new(LogNotifier),
            geofence,
            metrics: Metrics::new(),
            party_seq: AtomicI64::new(0),
            order_seq: AtomicI64::new(0),
            log_seq: AtomicI64::new(0),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_geofence(mut self, geofence: Arc<dyn Geofence>) -> Self {
        self.geofence = geofence;
        self
    }

    pub fn next_party_id(&self) -> i64 {
        self.party_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn next_order_id(&self) -> i64 {
        self.order_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn next_log_id(&self) -> i64 {
        self.log_seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}
