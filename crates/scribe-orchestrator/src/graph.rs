//! Immutable stage graph with guarded edges
//!
//! Edges out of a stage are either a single unconditional edge or a set of
//! labelled predicate edges, never both. Predicates are opaque closures, so
//! overlap between them can only be detected when a run hits it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use scribe_core::{Result, ScribeError};

use crate::artifact::Artifact;
use crate::stage::Stage;

/// Predicate over the producing stage's output
pub type EdgePredicate = Arc<dyn Fn(&Artifact) -> bool + Send + Sync>;

/// When an edge may be taken
#[derive(Clone)]
pub enum EdgeCondition {
    Always,
    When {
        label: String,
        predicate: EdgePredicate,
    },
}

impl fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::When { label, .. } => f.debug_struct("When").field("label", label).finish(),
        }
    }
}

/// Directed edge between two stages
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub condition: EdgeCondition,
}

impl Edge {
    pub fn matches(&self, output: &Artifact) -> bool {
        match &self.condition {
            EdgeCondition::Always => true,
            EdgeCondition::When { predicate, .. } => predicate(output),
        }
    }

    /// `source -> target [label]`, for errors and logs
    pub fn describe(&self) -> String {
        match &self.condition {
            EdgeCondition::Always => format!("{} -> {}", self.source, self.target),
            EdgeCondition::When { label, .. } => {
                format!("{} -> {} [{}]", self.source, self.target, label)
            }
        }
    }
}

/// Accumulates stages and edges, then checks them in [`GraphBuilder::build`]
pub struct GraphBuilder {
    entry: String,
    stages: Vec<Arc<dyn Stage>>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            stages: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Unconditional edge
    pub fn edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge {
            source: source.into(),
            target: target.into(),
            condition: EdgeCondition::Always,
        });
        self
    }

    /// Edge taken when `predicate` holds for the source's output
    pub fn edge_when<F>(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&Artifact) -> bool + Send + Sync + 'static,
    {
        self.edges.push(Edge {
            source: source.into(),
            target: target.into(),
            condition: EdgeCondition::When {
                label: label.into(),
                predicate: Arc::new(predicate),
            },
        });
        self
    }

    pub fn build(self) -> Result<PipelineGraph> {
        let mut stages: HashMap<String, Arc<dyn Stage>> = HashMap::new();
        let mut order = Vec::new();
        for stage in self.stages {
            let id = stage.id().to_string();
            if stages.contains_key(&id) {
                return Err(ScribeError::InvalidGraph(format!(
                    "duplicate stage '{}'",
                    id
                )));
            }
            order.push(id.clone());
            stages.insert(id, stage);
        }

        if !stages.contains_key(&self.entry) {
            return Err(ScribeError::InvalidGraph(format!(
                "entry stage '{}' is not registered",
                self.entry
            )));
        }

        let mut edges: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !stages.contains_key(endpoint) {
                    return Err(ScribeError::InvalidGraph(format!(
                        "edge {} references unknown stage '{}'",
                        edge.describe(),
                        endpoint
                    )));
                }
            }
            edges.entry(edge.source.clone()).or_default().push(edge);
        }

        for (source, outgoing) in &edges {
            let unconditional = outgoing
                .iter()
                .filter(|e| matches!(e.condition, EdgeCondition::Always))
                .count();
            if unconditional > 1 {
                return Err(ScribeError::InvalidGraph(format!(
                    "stage '{}' has {} unconditional edges",
                    source, unconditional
                )));
            }
            if unconditional == 1 && outgoing.len() > 1 {
                return Err(ScribeError::InvalidGraph(format!(
                    "stage '{}' mixes an unconditional edge with conditional edges",
                    source
                )));
            }

            let mut labels = HashSet::new();
            for edge in outgoing {
                if let EdgeCondition::When { label, .. } = &edge.condition {
                    if !labels.insert(label.as_str()) {
                        return Err(ScribeError::InvalidGraph(format!(
                            "stage '{}' has two edges labelled '{}'",
                            source, label
                        )));
                    }
                }
            }
        }

        Ok(PipelineGraph {
            entry: self.entry,
            stages,
            order,
            edges,
        })
    }
}

/// Validated, immutable stage graph
pub struct PipelineGraph {
    entry: String,
    stages: HashMap<String, Arc<dyn Stage>>,
    // Registration order, for stable listings
    order: Vec<String>,
    edges: HashMap<String, Vec<Edge>>,
}

impl PipelineGraph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn stage(&self, id: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(id)
    }

    pub fn stage_ids(&self) -> &[String] {
        &self.order
    }

    pub fn outgoing(&self, id: &str) -> &[Edge] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.outgoing(id).is_empty()
    }

    /// Pick the next stage for `output` produced by `stage`
    ///
    /// `Ok(None)` means `stage` is terminal. Evaluates every predicate in
    /// declaration order so overlapping guards are reported rather than
    /// resolved by position.
    pub fn route(&self, stage: &str, output: &Artifact) -> Result<Option<&str>> {
        let outgoing = self.outgoing(stage);
        if outgoing.is_empty() {
            return Ok(None);
        }

        let matched: Vec<&Edge> = outgoing.iter().filter(|e| e.matches(output)).collect();
        match matched.as_slice() {
            [] => Err(ScribeError::NoRoute {
                stage: stage.to_string(),
                artifact: output.kind().to_string(),
            }),
            [edge] => Ok(Some(edge.target.as_str())),
            many => Err(ScribeError::AmbiguousRoute {
                stage: stage.to_string(),
                edges: many.iter().map(|e| e.describe()).collect(),
            }),
        }
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("entry", &self.entry)
            .field("stages", &self.order)
            .field("edges", &self.edges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Echo(&'static str);

    #[async_trait]
    impl Stage for Echo {
        fn id(&self) -> &str {
            self.0
        }

        async fn invoke(
            &self,
            input: Artifact,
            _ctx: &mut RunContext,
            _cancel: &CancellationToken,
        ) -> Result<Artifact> {
            Ok(input)
        }
    }

    fn stage(id: &'static str) -> Arc<dyn Stage> {
        Arc::new(Echo(id))
    }

    fn is_request(a: &Artifact) -> bool {
        matches!(a, Artifact::Request(_))
    }

    #[test]
    fn test_builds_and_routes() {
        let graph = GraphBuilder::new("a")
            .stage(stage("a"))
            .stage(stage("b"))
            .stage(stage("c"))
            .edge_when("a", "b", "request", is_request)
            .edge_when("a", "c", "other", |a| !is_request(a))
            .edge("b", "c")
            .build()
            .unwrap();

        assert_eq!(graph.entry(), "a");
        assert_eq!(graph.stage_ids(), ["a", "b", "c"]);
        let request = Artifact::Request("x".into());
        assert_eq!(graph.route("a", &request).unwrap(), Some("b"));
        assert_eq!(graph.route("b", &request).unwrap(), Some("c"));
        assert_eq!(graph.route("c", &request).unwrap(), None);
        assert!(graph.is_terminal("c"));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = GraphBuilder::new("a")
            .stage(stage("a"))
            .stage(stage("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate stage"));
    }

    #[test]
    fn test_missing_entry_rejected() {
        let err = GraphBuilder::new("start").stage(stage("a")).build().unwrap_err();
        assert!(matches!(err, ScribeError::InvalidGraph(_)));
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let err = GraphBuilder::new("a")
            .stage(stage("a"))
            .edge("a", "nowhere")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_two_unconditional_edges_rejected() {
        let err = GraphBuilder::new("a")
            .stage(stage("a"))
            .stage(stage("b"))
            .stage(stage("c"))
            .edge("a", "b")
            .edge("a", "c")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("2 unconditional edges"));
    }

    #[test]
    fn test_unconditional_mixed_with_conditional_rejected() {
        let err = GraphBuilder::new("a")
            .stage(stage("a"))
            .stage(stage("b"))
            .stage(stage("c"))
            .edge("a", "b")
            .edge_when("a", "c", "request", is_request)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mixes"));
    }

    #[test]
    fn test_overlapping_guards_detected_at_route_time() {
        let graph = GraphBuilder::new("a")
            .stage(stage("a"))
            .stage(stage("b"))
            .stage(stage("c"))
            .edge_when("a", "b", "first", |_| true)
            .edge_when("a", "c", "second", |_| true)
            .build()
            .unwrap();

        match graph.route("a", &Artifact::Request("x".into())) {
            Err(ScribeError::AmbiguousRoute { stage, edges }) => {
                assert_eq!(stage, "a");
                assert_eq!(edges, vec!["a -> b [first]", "a -> c [second]"]);
            }
            other => panic!("unexpected route: {:?}", other),
        }
    }

    #[test]
    fn test_no_matching_guard() {
        let graph = GraphBuilder::new("a")
            .stage(stage("a"))
            .stage(stage("b"))
            .edge_when("a", "b", "never", |_| false)
            .build()
            .unwrap();

        let err = graph.route("a", &Artifact::Request("x".into())).unwrap_err();
        assert!(matches!(err, ScribeError::NoRoute { .. }));
    }
}
