use std::collections::{BTreeMap, HashMap};

use petgraph::Graph;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;

use crate::core::Hash32;
use crate::engine::{Artifact, Dependencies, Handle, Job, JobKind, JobSpec, Report};
use crate::error::GraphError;
use crate::plan::{Plan, PlannedJob};

/// The blueprint of an experiment.
///
/// `Blueprint` is used to define the job graph of a pipeline. You add jobs
/// to it, and wire them together by placing the [`Artifact`]s exposed by
/// their [`Handle`]s into the configuration of the next job.
///
/// Once configured, you convert it into a [`Plan`] for the execution engine.
///
/// # Example
///
/// ```rust
/// use kumitate::{Blueprint, RepositoryPin};
///
/// let mut blueprint = Blueprint::new();
/// let pin = RepositoryPin::new("https://github.com/example/trainer", "main").unwrap();
/// let trainer = blueprint.clone_repository(&pin).unwrap();
///
/// blueprint.register_output("trainer", &trainer.repository()).unwrap();
/// let plan = blueprint.finish().unwrap();
/// assert_eq!(plan.jobs().len(), 1);
/// ```
pub struct Blueprint {
    graph: Graph<Job, ()>,
    by_identity: HashMap<Hash32, NodeIndex>,
    outputs: BTreeMap<String, Artifact>,
}

impl Blueprint {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            by_identity: HashMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a job. A job whose identity is already in the graph is not added
    /// again, the handle of the existing node is returned instead.
    pub fn add_job<K: JobKind>(&mut self, spec: JobSpec<K>) -> Result<Handle<K>, GraphError> {
        let job = spec.into_job();

        if let Some(&index) = self.by_identity.get(&job.identity()) {
            tracing::debug!("Reusing {} for {}", self.graph[index].name(), job.name());
            let existing = &self.graph[index];
            return Ok(Handle::new(index, existing.identity(), existing.output_set()));
        }

        for artifact in job.config().artifacts() {
            self.check_owned(artifact)?;
        }

        let identity = job.identity();
        let outputs = job.output_set();
        let dependencies = job.dependencies().to_vec();

        tracing::debug!("Adding {}", job.name());
        let index = self.graph.add_node(job);
        self.by_identity.insert(identity, index);

        for dependency in dependencies {
            self.graph.add_edge(dependency, index, ());
        }

        Ok(Handle::new(index, identity, outputs))
    }

    /// Make an artifact a named result of the whole pipeline.
    ///
    /// Registering the same artifact under the same name again does nothing.
    pub fn register_output(
        &mut self,
        name: impl Into<String>,
        artifact: &Artifact,
    ) -> Result<(), GraphError> {
        let name = name.into();
        self.check_owned(artifact)?;

        match self.outputs.get(&name) {
            Some(existing) if existing == artifact => Ok(()),
            Some(_) => Err(GraphError::DuplicateOutput(name)),
            None => {
                self.outputs.insert(name, artifact.clone());
                Ok(())
            }
        }
    }

    /// Register the result of a diagnostic job.
    pub fn register_report(
        &mut self,
        name: impl Into<String>,
        report: &Report,
    ) -> Result<(), GraphError> {
        self.register_output(name, &report.0)
    }

    pub fn job(&self, index: NodeIndex) -> &Job {
        &self.graph[index]
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.graph.node_weights()
    }

    pub fn outputs(&self) -> &BTreeMap<String, Artifact> {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Freeze the graph into a plan, with jobs in dependency order.
    pub fn finish(self) -> Result<Plan, GraphError> {
        let order = toposort(&self.graph, None)
            .map_err(|cycle| GraphError::Cycle(self.graph[cycle.node_id()].name()))?;

        let jobs = order
            .into_iter()
            .map(|index| {
                let job = &self.graph[index];
                let dependencies = self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .map(|dependency| self.graph[dependency].identity())
                    .collect();

                PlannedJob::new(job, dependencies)
            })
            .collect();

        tracing::info!(
            "Planned {} jobs with {} outputs",
            self.graph.node_count(),
            self.outputs.len()
        );

        Ok(Plan::new(jobs, self.outputs))
    }

    /// An artifact produced by a job must point at a job of this blueprint.
    fn check_owned(&self, artifact: &Artifact) -> Result<(), GraphError> {
        let (Some(index), Some(identity)) = (artifact.node(), artifact.creator()) else {
            return Ok(());
        };

        match self.graph.node_weight(index) {
            Some(job) if job.identity() == identity => Ok(()),
            _ => Err(GraphError::ForeignArtifact(artifact.to_string())),
        }
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let job = &self.graph[index];
            let name = job.name().replace('"', "\\\"");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        writeln!(f, "    Output[Output]")?;

        for (name, artifact) in &self.outputs {
            if let Some(index) = artifact.node() {
                writeln!(f, "    {:?} -- \"{}\" --> Output", index.index(), name)?;
            }
        }

        for edge in self.graph.raw_edges() {
            let source = edge.source();
            writeln!(
                f,
                "    {:?} -- \"{}\" --> {:?}",
                source.index(),
                self.graph[source].kind(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
