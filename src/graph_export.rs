//! Dependency graph snapshots for visualization and debugging.
//!
//! [`ServiceRegistry::dependency_graph`] captures declared structure together
//! with live state (which services exist, in which order they were built).
//! With the `graph-export` feature the snapshot serializes to JSON; DOT output
//! is always available.

use std::fmt::Write as _;

#[cfg(feature = "graph-export")]
use serde::{Deserialize, Serialize};

use crate::internal::find_all_cycles;
use crate::registry::ServiceRegistry;

/// A registered service.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub struct GraphNode {
    pub id: String,
    pub phase: String,
    pub lazy: bool,
    /// An instance currently exists
    pub instantiated: bool,
    /// `initialize()` ran for the current instance
    pub initialized: bool,
    pub dependencies: Vec<String>,
}

/// How an edge became known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub enum EdgeKind {
    /// Listed in the dependent's registration
    Declared,
    /// Resolved by a factory through its context without being declared
    Dynamic,
}

/// `from` depends on `to`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub struct GraphMetadata {
    pub service_count: usize,
    pub instantiated_count: usize,
    pub has_circular_dependencies: bool,
    /// RFC 3339 with `graph-export`, unix seconds otherwise
    pub exported_at: String,
    pub version: String,
}

/// Snapshot of the registry's dependency structure.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub struct DependencyGraph {
    /// Nodes in registration order
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Names in the order their live instances were built
    pub construction_order: Vec<String>,
    pub metadata: GraphMetadata,
}

impl DependencyGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Pretty-printed JSON.
    #[cfg(feature = "graph-export")]
    pub fn to_json(&self) -> crate::DiResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| crate::DiError::failed(format!("graph serialization failed: {e}")))
    }

    /// Graphviz DOT. Lazy services are dashed, live ones filled, dynamic
    /// edges dotted.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph services {\n  rankdir=LR;\n");
        for node in &self.nodes {
            let mut style = Vec::new();
            if node.lazy {
                style.push("dashed");
            }
            if node.instantiated {
                style.push("filled");
            }
            let _ = writeln!(
                dot,
                "  \"{}\" [label=\"{}\\n{}\", style=\"{}\"];",
                node.id,
                node.id,
                node.phase,
                style.join(",")
            );
        }
        for edge in &self.edges {
            let style = match edge.kind {
                EdgeKind::Declared => "solid",
                EdgeKind::Dynamic => "dotted",
            };
            let _ = writeln!(dot, "  \"{}\" -> \"{}\" [style={style}];", edge.from, edge.to);
        }
        dot.push_str("}\n");
        dot
    }
}

fn exported_at() -> String {
    #[cfg(feature = "graph-export")]
    {
        chrono::Utc::now().to_rfc3339()
    }
    #[cfg(not(feature = "graph-export"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string()
    }
}

impl ServiceRegistry {
    /// Captures the current dependency graph.
    ///
    /// ```
    /// use ferrous_lifecycle::{ServiceRegistry, RegisterOptions, Service};
    ///
    /// struct S;
    /// impl Service for S {}
    ///
    /// let registry = ServiceRegistry::new();
    /// registry.register("logger", |_| async { Ok(S) }, RegisterOptions::new());
    /// registry.register("api", |_| async { Ok(S) }, RegisterOptions::new().depends_on(["logger"]));
    ///
    /// let graph = registry.dependency_graph();
    /// assert_eq!(graph.nodes.len(), 2);
    /// assert_eq!(graph.edges[0].from, "api");
    /// assert!(graph.to_dot().contains("\"api\" -> \"logger\""));
    /// ```
    pub fn dependency_graph(&self) -> DependencyGraph {
        let (nodes, mut edges, has_circular_dependencies) = self.with_descriptors(|descriptors| {
            let nodes: Vec<GraphNode> = descriptors
                .iter()
                .map(|d| GraphNode {
                    id: d.name.clone(),
                    phase: d.phase.to_string(),
                    lazy: d.lazy,
                    instantiated: false,
                    initialized: false,
                    dependencies: d.dependencies.clone(),
                })
                .collect();
            let edges: Vec<GraphEdge> = descriptors
                .iter()
                .flat_map(|d| {
                    d.dependencies.iter().map(|dep| GraphEdge {
                        from: d.name.clone(),
                        to: dep.clone(),
                        kind: EdgeKind::Declared,
                    })
                })
                .collect();
            let cyclic = !find_all_cycles(descriptors.names(), |n| descriptors.dependencies_of(n)).is_empty();
            (nodes, edges, cyclic)
        });

        let nodes: Vec<GraphNode> = nodes
            .into_iter()
            .map(|mut node| {
                node.instantiated = self.is_instantiated(&node.id);
                node.initialized = self.is_initialized(&node.id);
                node
            })
            .collect();

        for (from, to) in self.dependency_edges() {
            if !edges.iter().any(|e| e.from == from && e.to == to) {
                edges.push(GraphEdge {
                    from,
                    to,
                    kind: EdgeKind::Dynamic,
                });
            }
        }

        let metadata = GraphMetadata {
            service_count: nodes.len(),
            instantiated_count: nodes.iter().filter(|n| n.instantiated).count(),
            has_circular_dependencies,
            exported_at: exported_at(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        DependencyGraph {
            nodes,
            edges,
            construction_order: self.construction_order(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegisterOptions, Service};

    struct S;
    impl Service for S {}

    #[tokio::test]
    async fn graph_reflects_live_state_and_dynamic_edges() {
        let registry = ServiceRegistry::new();
        registry
            .register("clock", |_| async { Ok(S) }, RegisterOptions::new().lazy())
            .register("logger", |_| async { Ok(S) }, RegisterOptions::new())
            .register(
                "api",
                |ctx| async move {
                    ctx.resolve("clock").await?;
                    Ok(S)
                },
                RegisterOptions::new().depends_on(["logger"]),
            );

        registry.resolve("api").await.unwrap();
        let graph = registry.dependency_graph();

        assert_eq!(graph.construction_order, vec!["logger", "clock", "api"]);
        assert_eq!(graph.metadata.instantiated_count, 3);
        assert!(!graph.metadata.has_circular_dependencies);

        let clock = graph.node("clock").unwrap();
        assert!(clock.instantiated);
        assert!(!clock.initialized);

        let dynamic: Vec<_> = graph.edges.iter().filter(|e| e.kind == EdgeKind::Dynamic).collect();
        assert_eq!(dynamic.len(), 1);
        assert_eq!((dynamic[0].from.as_str(), dynamic[0].to.as_str()), ("api", "clock"));
    }

    #[test]
    fn flags_declared_cycles() {
        let registry = ServiceRegistry::new();
        registry
            .register("a", |_| async { Ok(S) }, RegisterOptions::new().depends_on(["b"]))
            .register("b", |_| async { Ok(S) }, RegisterOptions::new().depends_on(["a"]));
        assert!(registry.dependency_graph().metadata.has_circular_dependencies);
    }

    #[cfg(feature = "graph-export")]
    #[test]
    fn json_round_trips() {
        let registry = ServiceRegistry::new();
        registry.register("logger", |_| async { Ok(S) }, RegisterOptions::new());
        let graph = registry.dependency_graph();
        let json = graph.to_json().unwrap();
        let back: DependencyGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }
}
