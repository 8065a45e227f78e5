use prometheus::{
    Counter, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub orders_created_total: IntCounter,
    pub order_transitions_total: IntCounterVec,
    pub accept_conflicts_total: IntCounter,
    pub settlements_total: IntCounter,
    pub settled_commission_total: Counter,
    pub notifications_failed_total: IntCounter,
    pub active_orders: IntGauge,
    pub route_computation_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let orders_created_total =
            IntCounter::new("orders_created_total", "Total orders created")
                .expect("valid orders_created_total metric");

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status transitions by target status"),
            &["status"],
        )
        .expect("valid order_transitions_total metric");

        let accept_conflicts_total = IntCounter::new(
            "accept_conflicts_total",
            "Acceptance attempts that lost the race for an order",
        )
        .expect("valid accept_conflicts_total metric");

        let settlements_total =
            IntCounter::new("settlements_total", "Delivered orders settled into a courier wallet")
                .expect("valid settlements_total metric");

        let settled_commission_total = Counter::new(
            "settled_commission_total",
            "Platform commission retained on settled orders",
        )
        .expect("valid settled_commission_total metric");

        let notifications_failed_total = IntCounter::new(
            "notifications_failed_total",
            "Push notifications that could not be dispatched",
        )
        .expect("valid notifications_failed_total metric");

        let active_orders = IntGauge::new("active_orders", "Orders not yet delivered or cancelled")
            .expect("valid active_orders metric");

        let route_computation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "route_computation_seconds",
                "Latency of courier route computation in seconds",
            ),
            &["outcome"],
        )
        .expect("valid route_computation_seconds metric");

        registry
            .register(Box::new(orders_created_total.clone()))
            .expect("register orders_created_total");
        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(accept_conflicts_total.clone()))
            .expect("register accept_conflicts_total");
        registry
            .register(Box::new(settlements_total.clone()))
            .expect("register settlements_total");
        registry
            .register(Box::new(settled_commission_total.clone()))
            .expect("register settled_commission_total");
        registry
            .register(Box::new(notifications_failed_total.clone()))
            .expect("register notifications_failed_total");
        registry
            .register(Box::new(active_orders.clone()))
            .expect("register active_orders");
        registry
            .register(Box::new(route_computation_seconds.clone()))
            .expect("register route_computation_seconds");

        Self {
            registry,
            orders_created_total,
            order_transitions_total,
            accept_conflicts_total,
            settlements_total,
            settled_commission_total,
            notifications_failed_total,
            active_orders,
            route_computation_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
