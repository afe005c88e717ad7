//! Topic naming.
//!
//! Per-robot topics are the robot namespace followed by a suffix, e.g.
//! `/robot_1` + `/robot_state`. Global topics are used as-is.

/// Topic suffixes and global topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub robot_state: String,
    pub robot_topopath: String,
    pub pose: String,
    pub goal: String,
    pub destinations_log: String,
    pub afference_debug: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            robot_state: "/robot_state".into(),
            robot_topopath: "/robot_topopath".into(),
            pose: "/amcl_pose".into(),
            goal: "/move_base_simple/goal".into(),
            destinations_log: "/destinations_log".into(),
            afference_debug: "/afference_debug".into(),
        }
    }
}

impl Topics {
    pub fn robot_state(&self, ns: &str) -> String {
        format!("{ns}{}", self.robot_state)
    }

    pub fn robot_topopath(&self, ns: &str) -> String {
        format!("{ns}{}", self.robot_topopath)
    }

    pub fn pose(&self, ns: &str) -> String {
        format!("{ns}{}", self.pose)
    }

    pub fn goal(&self, ns: &str) -> String {
        format!("{ns}{}", self.goal)
    }
}

/// Namespaces always start with `/`; `robot_1` and `/robot_1` name the same
/// robot.
pub fn normalize_namespace(ns: &str) -> String {
    if ns.starts_with('/') {
        ns.to_owned()
    } else {
        format!("/{ns}")
    }
}
