//! Prometheus exposition of per-tenant config status, via the `metrics`
//! facade and its Prometheus exporter.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::warn;

const STATUS_GAUGE: &str = "kube_fluentd_operator_namespace_config_status";

/// Installs the global Prometheus recorder and serves `/metrics` on `addr`.
pub fn install(addr: SocketAddr) {
    if let Err(err) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!(%err, "cannot install prometheus exporter");
    }
}

/// Sets the status gauge for every tenant in `statuses`: 1 when the
/// tenant's hash indicates an error, 0 otherwise. Returns the set of
/// tenants seen in the previous call but absent from this one, so the
/// caller can log that their gauges are now stale (the `metrics` facade
/// has no generic "unregister" call, so a vanished tenant's gauge remains
/// at its last value rather than disappearing from `/metrics`).
pub fn record_namespace_status(statuses: &[(String, bool)], previously_tracked: &mut BTreeSet<String>) -> BTreeSet<String> {
    let mut still_tracked = BTreeSet::new();

    for (namespace, is_error) in statuses {
        let value = if *is_error { 1.0 } else { 0.0 };
        metrics::gauge!(STATUS_GAUGE, "target_namespace" => namespace.clone()).set(value);
        still_tracked.insert(namespace.clone());
    }

    let orphaned: BTreeSet<String> = previously_tracked.difference(&still_tracked).cloned().collect();
    *previously_tracked = still_tracked;
    orphaned
}
