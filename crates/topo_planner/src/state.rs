use std::sync::Arc;

use api::{Bus, Topics};

use crate::destinations::DestinationRegistry;
use crate::graph::TopologyGraph;
use crate::metrics::Metrics;
use crate::robots::RobotRegistry;

/// Everything the planner's concurrent tasks share.
///
/// The map is immutable; the two registries synchronise themselves. Nothing
/// else is shared between the sweep, the report listeners, the dispatcher and
/// the telemetry loop.
pub struct PlannerState {
    pub graph: Arc<TopologyGraph>,
    pub destinations: Arc<DestinationRegistry>,
    pub robots: Arc<RobotRegistry>,
    pub bus: Arc<Bus>,
    pub topics: Topics,
    pub metrics: Arc<Metrics>,
}

impl PlannerState {
    pub fn new(
        graph: TopologyGraph,
        destinations: DestinationRegistry,
        robots: RobotRegistry,
        bus: Arc<Bus>,
        topics: Topics,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            graph: Arc::new(graph),
            destinations: Arc::new(destinations),
            robots: Arc::new(robots),
            bus,
            topics,
            metrics,
        })
    }
}
