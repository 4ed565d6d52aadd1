//! Dependency ordering between services.
//!
//! The graph is built once from the declared services and never changes.
//! Start order is a topological sort where, among services whose
//! dependencies are all placed, the one declared first wins. Stop order is
//! the exact reverse.

use std::collections::HashMap;

use crate::config::ServiceSpec;
use crate::error::{KumiError, Result};

/// Immutable dependency graph over a set of services.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Service names in declaration order.
    declared: Vec<String>,
    /// Direct dependencies, indexed like `declared`.
    dependencies: Vec<Vec<usize>>,
    /// Topological start order.
    order: Vec<String>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Builds the graph, rejecting duplicates, unknown dependencies and cycles.
    pub fn new(services: &[ServiceSpec]) -> Result<Self> {
        let mut index = HashMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            if index.insert(service.name.clone(), i).is_some() {
                return Err(KumiError::config(format!(
                    "service '{}' is declared more than once",
                    service.name
                )));
            }
        }

        let mut dependencies = Vec::with_capacity(services.len());
        for service in services {
            let mut deps = Vec::with_capacity(service.depends_on.len());
            for dep in &service.depends_on {
                let &j = index.get(dep).ok_or_else(|| {
                    KumiError::config(format!(
                        "service '{}' depends on undeclared service '{}'",
                        service.name, dep
                    ))
                })?;
                if !deps.contains(&j) {
                    deps.push(j);
                }
            }
            dependencies.push(deps);
        }

        let declared: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let order = topological_order(&declared, &dependencies)?;

        Ok(Self {
            declared,
            dependencies,
            order,
            index,
        })
    }

    /// Services in start order.
    pub fn start_order(&self) -> &[String] {
        &self.order
    }

    /// Services in stop order (reverse of start order).
    pub fn stop_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    /// Number of services.
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    /// Returns true when the graph has no services.
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Returns true when the service is part of the graph.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Direct dependencies of a service.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.dependencies[i]
                    .iter()
                    .map(|&j| self.declared[j].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Services that directly depend on `name`, in declaration order.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(&target) = self.index.get(name) else {
            return Vec::new();
        };
        self.dependencies
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&target))
            .map(|(i, _)| self.declared[i].as_str())
            .collect()
    }
}

/// Kahn's algorithm, picking the earliest declared candidate each step.
fn topological_order(declared: &[String], dependencies: &[Vec<usize>]) -> Result<Vec<String>> {
    let n = declared.len();
    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        let next = (0..n)
            .find(|&i| !placed[i] && dependencies[i].iter().all(|&d| placed[d]));

        match next {
            Some(i) => {
                placed[i] = true;
                order.push(declared[i].clone());
            }
            None => {
                let cycle = find_cycle(declared, dependencies, &placed);
                return Err(KumiError::Cycle { services: cycle });
            }
        }
    }

    Ok(order)
}

/// Walks unplaced nodes until one repeats. Every unplaced node has at least
/// one unplaced dependency, so the walk always closes a loop.
fn find_cycle(declared: &[String], dependencies: &[Vec<usize>], placed: &[bool]) -> Vec<String> {
    let Some(start) = (0..declared.len()).find(|&i| !placed[i]) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = dependencies[current].iter().find(|&&d| !placed[d]) else {
            break;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| declared[i].clone()).collect();
            cycle.push(declared[next].clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }

    path.iter().map(|&i| declared[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str, deps: &[&str]) -> ServiceSpec {
        let mut spec = ServiceSpec::new(name, "img");
        spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
        spec
    }

    #[test]
    fn test_backend_before_frontend() {
        let graph =
            DependencyGraph::new(&[svc("frontend", &["backend"]), svc("backend", &[])]).unwrap();

        assert_eq!(graph.start_order(), &["backend", "frontend"]);
        assert_eq!(graph.stop_order(), vec!["frontend", "backend"]);
    }

    #[test]
    fn test_ties_broken_by_declaration_order() {
        let graph = DependencyGraph::new(&[
            svc("c", &[]),
            svc("a", &[]),
            svc("d", &["a", "c"]),
            svc("b", &[]),
        ])
        .unwrap();

        assert_eq!(graph.start_order(), &["c", "a", "d", "b"]);
    }

    #[test]
    fn test_diamond() {
        let graph = DependencyGraph::new(&[
            svc("ui", &["api", "worker"]),
            svc("api", &["db"]),
            svc("worker", &["db"]),
            svc("db", &[]),
        ])
        .unwrap();

        assert_eq!(graph.start_order(), &["db", "api", "worker", "ui"]);
        assert_eq!(graph.dependencies("ui"), vec!["api", "worker"]);
        assert_eq!(graph.dependents("db"), vec!["api", "worker"]);
        assert!(graph.dependents("ui").is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let err = DependencyGraph::new(&[
            svc("a", &["b"]),
            svc("b", &["c"]),
            svc("c", &["a"]),
            svc("d", &[]),
        ])
        .unwrap_err();

        match err {
            KumiError::Cycle { services } => {
                assert_eq!(services.first(), services.last());
                assert_eq!(services.len(), 4);
                assert!(!services.contains(&"d".to_string()));
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = DependencyGraph::new(&[svc("a", &["a"])]).unwrap_err();
        assert!(matches!(err, KumiError::Cycle { ref services } if services == &["a", "a"]));
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let err = DependencyGraph::new(&[svc("a", &[]), svc("a", &[])]).unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let err = DependencyGraph::new(&[svc("a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::new(&[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.start_order().is_empty());
        assert!(!graph.contains("anything"));
    }
}
