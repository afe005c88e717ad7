//! Topological map and shortest-path queries.
//!
//! The map is an undirected weighted graph of named waypoints. It is loaded
//! once at startup and never mutated while the planner runs, so it is shared
//! behind a plain `Arc`.
//!
//! # Adjacency-list format
//!
//! ```text
//! # comment
//! WayPoint1, WayPoint2, WayPoint5
//! WayPoint2, WayPoint3
//! WayPoint7
//! ```
//!
//! The first name of a line is a node, the rest are its neighbours. Every
//! listed pair becomes an undirected edge of weight 1. A node alone on a line
//! is added without edges.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::Path as FsPath;

use api::v1::Pose;

use crate::{PlannerError, PlannerResult};

/// Ordered waypoint names from source to destination, source included.
pub type Path = Vec<String>;

/// `f64` cost with a total order so it can live in a `BinaryHeap`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Cost(f64);

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
pub struct TopologyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    poses: Vec<Option<Pose>>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the adjacency-list format described in the module docs.
    pub fn from_adjlist(text: &str) -> PlannerResult<Self> {
        let mut graph = Self::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut names = line.split(',').map(str::trim);
            let node = names.next().unwrap_or("");
            if node.is_empty() {
                return Err(PlannerError::Configuration(format!(
                    "adjacency list line {}: missing node name",
                    lineno + 1
                )));
            }
            graph.add_waypoint(node);

            for neighbour in names {
                if neighbour.is_empty() {
                    return Err(PlannerError::Configuration(format!(
                        "adjacency list line {}: empty neighbour of {node}",
                        lineno + 1
                    )));
                }
                graph.add_edge(node, neighbour, 1.0)?;
            }
        }

        if graph.is_empty() {
            return Err(PlannerError::Configuration("adjacency list has no waypoints".into()));
        }
        Ok(graph)
    }

    pub fn load(path: impl AsRef<FsPath>) -> PlannerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PlannerError::Configuration(format!("cannot read adjacency list {}: {e}", path.display()))
        })?;
        Self::from_adjlist(&text)
    }

    /// Adds `name` if it is not already a waypoint and returns its index.
    pub fn add_waypoint(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len();
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), i);
        self.poses.push(None);
        self.adjacency.push(Vec::new());
        i
    }

    /// Adds an undirected edge, creating missing waypoints. Re-adding an
    /// edge replaces its weight. Self-loops are ignored.
    pub fn add_edge(&mut self, a: &str, b: &str, weight: f64) -> PlannerResult<()> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(PlannerError::Configuration(format!(
                "edge {a} - {b} has invalid weight {weight}"
            )));
        }
        let ia = self.add_waypoint(a);
        let ib = self.add_waypoint(b);
        if ia == ib {
            return Ok(());
        }
        Self::upsert(&mut self.adjacency[ia], ib, weight);
        Self::upsert(&mut self.adjacency[ib], ia, weight);
        Ok(())
    }

    fn upsert(edges: &mut Vec<(usize, f64)>, to: usize, weight: f64) {
        match edges.iter_mut().find(|(n, _)| *n == to) {
            Some(edge) => edge.1 = weight,
            None => edges.push((to, weight)),
        }
    }

    pub fn set_pose(&mut self, name: &str, pose: Pose) -> PlannerResult<()> {
        let i = self.require(name)?;
        self.poses[i] = Some(pose);
        Ok(())
    }

    pub fn pose(&self, name: &str) -> Option<Pose> {
        self.index.get(name).and_then(|&i| self.poses[i])
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn waypoints(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn neighbours(&self, name: &str) -> impl Iterator<Item = &str> + '_ {
        self.index
            .get(name)
            .into_iter()
            .flat_map(move |&i| self.adjacency[i].iter().map(move |&(n, _)| self.names[n].as_str()))
    }

    pub fn are_adjacent(&self, a: &str, b: &str) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(&ia), Some(&ib)) => self.adjacency[ia].iter().any(|&(n, _)| n == ib),
            _ => false,
        }
    }

    fn require(&self, name: &str) -> PlannerResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| PlannerError::UnknownWaypoint(name.to_owned()))
    }

    /// Dijkstra from `source` to `dest`.
    ///
    /// The returned path always starts with `source`; callers that only want
    /// the waypoints still to be travelled must drop the first element.
    /// Equal-cost alternatives are resolved by lowest waypoint index, so the
    /// result is deterministic for a given map.
    pub fn shortest_path(&self, source: &str, dest: &str) -> PlannerResult<Path> {
        let from = self.require(source)?;
        let to = self.require(dest)?;

        if from == to {
            return Ok(vec![source.to_owned()]);
        }

        let n = self.names.len();
        let mut dist = vec![f64::INFINITY; n];
        let mut prev: Vec<Option<usize>> = vec![None; n];
        dist[from] = 0.0;

        let mut heap = BinaryHeap::new();
        heap.push(Reverse((Cost(0.0), from)));

        while let Some(Reverse((Cost(cost), node))) = heap.pop() {
            if node == to {
                return Ok(self.reconstruct(&prev, to));
            }
            if cost > dist[node] {
                continue;
            }
            for &(next, weight) in &self.adjacency[node] {
                let candidate = cost + weight;
                if candidate < dist[next] {
                    dist[next] = candidate;
                    prev[next] = Some(node);
                    heap.push(Reverse((Cost(candidate), next)));
                }
            }
        }

        Err(PlannerError::NoPath {
            from: source.to_owned(),
            to: dest.to_owned(),
        })
    }

    fn reconstruct(&self, prev: &[Option<usize>], to: usize) -> Path {
        let mut path = vec![self.names[to].clone()];
        let mut cur = to;
        while let Some(p) = prev[cur] {
            path.push(self.names[p].clone());
            cur = p;
        }
        path.reverse();
        path
    }

    /// Every name is a waypoint and consecutive names share an edge.
    pub fn is_valid_path(&self, path: &[String]) -> bool {
        !path.is_empty()
            && path.iter().all(|name| self.contains(name))
            && path.windows(2).all(|w| self.are_adjacent(&w[0], &w[1]))
    }

    /// Startup check: every name is a waypoint and all of them lie in one
    /// connected component.
    pub fn ensure_connected<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> PlannerResult<()> {
        let mut wanted = Vec::new();
        for name in names {
            let i = self.index.get(name).copied().ok_or_else(|| {
                PlannerError::Configuration(format!("interest point {name} is not a waypoint of the map"))
            })?;
            wanted.push(i);
        }
        let Some(&root) = wanted.first() else {
            return Ok(());
        };

        let mut seen = vec![false; self.names.len()];
        let mut queue = VecDeque::from([root]);
        seen[root] = true;
        while let Some(node) = queue.pop_front() {
            for &(next, _) in &self.adjacency[node] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }

        match wanted.iter().find(|&&i| !seen[i]) {
            Some(&i) => Err(PlannerError::Configuration(format!(
                "waypoint {} is unreachable from {}",
                self.names[i], self.names[root]
            ))),
            None => Ok(()),
        }
    }

    /// Startup check: every waypoint has a pose, so any path can be turned
    /// into navigation goals.
    pub fn ensure_posed(&self) -> PlannerResult<()> {
        match self.poses.iter().position(Option::is_none) {
            Some(i) => Err(PlannerError::Configuration(format!(
                "waypoint {} has no pose",
                self.names[i]
            ))),
            None => Ok(()),
        }
    }
}
