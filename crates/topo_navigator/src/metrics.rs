use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};

/// Navigator collectors, labelled by robot namespace. One instance serves
/// the whole fleet and registers into the registry the planner exposes.
pub struct NavigatorMetrics {
    pub goals_reached_total: IntCounterVec,
    pub paths_completed_total: IntCounterVec,
    pub state_reports_total: IntCounterVec,
    pub afference_failures_total: IntCounterVec,
    pub position: GaugeVec,
}

impl NavigatorMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        macro_rules! reg {
            ($m:expr) => {{
                let m = $m;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        Ok(Self {
            goals_reached_total: reg!(IntCounterVec::new(
                Opts::new("navigator_goals_reached_total", "Waypoints reached"),
                &["robot"]
            )?),
            paths_completed_total: reg!(IntCounterVec::new(
                Opts::new("navigator_paths_completed_total", "Topological paths completed"),
                &["robot"]
            )?),
            state_reports_total: reg!(IntCounterVec::new(
                Opts::new("navigator_state_reports_total", "Robot state reports published"),
                &["robot"]
            )?),
            afference_failures_total: reg!(IntCounterVec::new(
                Opts::new("navigator_afference_failures_total", "Afference estimates that failed"),
                &["robot"]
            )?),
            position: reg!(GaugeVec::new(
                Opts::new("navigator_position", "Last localised position"),
                &["robot", "axis"]
            )?),
        })
    }

    pub fn update_position(&self, robot: &str, x: f64, y: f64) {
        self.position.with_label_values(&[robot, "x"]).set(x);
        self.position.with_label_values(&[robot, "y"]).set(y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_once_per_registry() {
        let registry = Registry::new();
        let m = NavigatorMetrics::register(&registry).unwrap();
        m.goals_reached_total.with_label_values(&["/robot_1"]).inc();
        m.update_position("/robot_1", 1.0, 2.0);

        assert_eq!(m.goals_reached_total.with_label_values(&["/robot_1"]).get(), 1);
        assert_eq!(m.position.with_label_values(&["/robot_1", "y"]).get(), 2.0);
        assert!(NavigatorMetrics::register(&registry).is_err());
    }
}
