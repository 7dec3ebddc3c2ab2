use prometheus::{register_int_gauge_with_registry, IntGauge, Registry};

/// Gauges published by the dependency manager. Values are set wholesale from
/// the current index sizes by `DependencyManager::record_metrics`.
pub struct DependencyManagerMetrics {
    pub num_subscribed_tasks: IntGauge,
    pub num_required_tasks: IntGauge,
    pub num_required_objects: IntGauge,
    pub num_pending_tasks: IntGauge,
}

impl DependencyManagerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            num_subscribed_tasks: register_int_gauge_with_registry!(
                "dependency_manager_num_subscribed_tasks",
                "Number of tasks subscribed for get dependencies",
                registry,
            )
            .unwrap(),
            num_required_tasks: register_int_gauge_with_registry!(
                "dependency_manager_num_required_tasks",
                "Number of creating tasks with at least one required output",
                registry,
            )
            .unwrap(),
            num_required_objects: register_int_gauge_with_registry!(
                "dependency_manager_num_required_objects",
                "Number of objects with an outstanding pull and reconstruction listen",
                registry,
            )
            .unwrap(),
            num_pending_tasks: register_int_gauge_with_registry!(
                "dependency_manager_num_pending_tasks",
                "Number of creating tasks expected to execute on this node",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_tests() -> Self {
        Self::new(&Registry::new())
    }
}
