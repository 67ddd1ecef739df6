//! Job graph internals.
//!
//! A job is a kind, a [`Config`] and a set of declared output names. Its
//! identity is derived from exactly those three things, which makes every
//! job content-addressed: the same configuration always maps to the same
//! node, and any change upstream changes the identity of everything below.
//!
//! ## Typed handles
//!
//! The graph itself is untyped, it stores [`Job`]s. A [`Handle<K>`] carries
//! the kind `K` in `PhantomData`, so the compiler knows that a
//! `Handle<Training>` has checkpoints and a `Handle<Vocode>` has a corpus.
//!
//! ## Edges
//!
//! Dependencies are never declared by hand. Every [`Artifact`] placed into a
//! job's configuration points at the node that creates it, and those
//! pointers are the edges of the graph.

mod artifact;
mod handle;
mod kinds;

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use camino::Utf8PathBuf;
use petgraph::graph::NodeIndex;

use crate::config::{Config, Value};
use crate::core::{Hash32, fingerprint};

pub use crate::engine::artifact::{Artifact, Checkpoint, Report};
pub(crate) use crate::engine::artifact::{checkpoint_output, job_directory};
pub use crate::engine::handle::Handle;
pub use crate::engine::kinds::*;

/// A kind of job the execution engine knows how to run.
pub trait JobKind: 'static {
    /// Stable name, part of the job identity and of its directory.
    const NAME: &'static str;
    /// Bump to invalidate every job of this kind.
    const VERSION: u32 = 1;
}

/// Anything that can reference upstream artifacts.
///
/// Implemented for the building blocks of configurations, so that the
/// upstream set of a job is simply the set of artifacts reachable from its
/// configuration.
pub trait Dependencies {
    /// All artifacts referenced, in a deterministic order.
    fn artifacts(&self) -> Vec<&Artifact>;

    /// Graph nodes creating the referenced artifacts.
    fn dependencies(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<_> = self
            .artifacts()
            .into_iter()
            .filter_map(Artifact::node)
            .collect();

        nodes.sort();
        nodes.dedup();
        nodes
    }
}

impl Dependencies for Artifact {
    fn artifacts(&self) -> Vec<&Artifact> {
        vec![self]
    }
}

impl Dependencies for Checkpoint {
    fn artifacts(&self) -> Vec<&Artifact> {
        vec![self.artifact()]
    }
}

impl Dependencies for Value {
    fn artifacts(&self) -> Vec<&Artifact> {
        let mut acc = Vec::new();
        collect(self, &mut acc);
        acc
    }
}

impl Dependencies for Config {
    fn artifacts(&self) -> Vec<&Artifact> {
        let mut acc = Vec::new();
        for value in self.entries().values() {
            collect(value, &mut acc);
        }
        acc
    }
}

impl<T: Dependencies> Dependencies for Option<T> {
    fn artifacts(&self) -> Vec<&Artifact> {
        self.as_ref().map(T::artifacts).unwrap_or_default()
    }
}

impl<T: Dependencies> Dependencies for Vec<T> {
    fn artifacts(&self) -> Vec<&Artifact> {
        self.iter().flat_map(T::artifacts).collect()
    }
}

fn collect<'a>(value: &'a Value, acc: &mut Vec<&'a Artifact>) {
    match value {
        Value::Artifact(artifact) => acc.push(artifact),
        Value::List(items) => items.iter().for_each(|item| collect(item, acc)),
        Value::Map(map) => map.values().for_each(|item| collect(item, acc)),
        _ => {}
    }
}

/// Everything needed to add a job of kind `K` to a blueprint.
pub struct JobSpec<K> {
    config: Config,
    outputs: BTreeSet<String>,
    alias: Option<String>,
    hash_overwrite: Option<String>,
    _phantom: PhantomData<fn() -> K>,
}

impl<K: JobKind> JobSpec<K> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            outputs: BTreeSet::new(),
            alias: None,
            hash_overwrite: None,
            _phantom: PhantomData,
        }
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.insert(name.into());
        self
    }

    pub fn outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(names.into_iter().map(Into::into));
        self
    }

    /// Human readable name, not part of the identity.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Fix the identity of this job to a key, ignoring its configuration.
    pub fn hash_overwrite(mut self, key: impl Into<String>) -> Self {
        self.hash_overwrite = Some(key.into());
        self
    }

    pub(crate) fn into_job(self) -> Job {
        let identity = match &self.hash_overwrite {
            Some(key) => fingerprint(&(K::NAME, key.as_str())),
            None => fingerprint(&(K::NAME, K::VERSION, &self.config, &self.outputs)),
        };

        let dependencies = self.config.dependencies();

        Job {
            kind: K::NAME,
            alias: self.alias,
            config: self.config,
            outputs: Arc::new(self.outputs),
            identity,
            dependencies,
        }
    }
}

/// A node in the job graph.
#[derive(Debug, Clone)]
pub struct Job {
    kind: &'static str,
    alias: Option<String>,
    config: Config,
    outputs: Arc<BTreeSet<String>>,
    identity: Hash32,
    dependencies: Vec<NodeIndex>,
}

impl Job {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> Hash32 {
        self.identity
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(String::as_str)
    }

    pub(crate) fn output_set(&self) -> Arc<BTreeSet<String>> {
        self.outputs.clone()
    }

    pub(crate) fn dependencies(&self) -> &[NodeIndex] {
        &self.dependencies
    }

    /// Directory of this job, relative to the engine's base directory.
    pub fn directory(&self) -> Utf8PathBuf {
        job_directory(self.kind, self.identity)
    }

    /// Name shown in graphs and logs.
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => format!("{}.{}", self.kind, self.identity.short()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_alias() {
        let config = Config::new().with("num_epochs", 200);
        let a = JobSpec::<Training>::new(config.clone()).alias("a").into_job();
        let b = JobSpec::<Training>::new(config).alias("b").into_job();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_depends_on_kind_and_outputs() {
        let config = Config::new().with("x", 1);
        let train = JobSpec::<Training>::new(config.clone()).into_job();
        let forward = JobSpec::<Forward>::new(config.clone()).into_job();
        let with_output = JobSpec::<Training>::new(config).output("y").into_job();
        assert_ne!(train.identity(), forward.identity());
        assert_ne!(train.identity(), with_output.identity());
    }

    #[test]
    fn test_hash_overwrite_fixes_identity() {
        let a = JobSpec::<CloneRepository>::new(Config::new().with("revision", "a"))
            .hash_overwrite("TRAINER_ROOT")
            .into_job();
        let b = JobSpec::<CloneRepository>::new(Config::new().with("revision", "b"))
            .hash_overwrite("TRAINER_ROOT")
            .into_job();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_dependencies_from_config() {
        let identity = Hash32::hash(b"upstream");
        let upstream = Artifact::job_output(NodeIndex::new(4), identity, "Training", "x");
        let config = Config::new()
            .with("a", upstream.clone())
            .with("b.c", vec![Value::from(upstream), Value::from(Artifact::external("/x"))]);

        assert_eq!(config.artifacts().len(), 3);
        assert_eq!(config.dependencies(), vec![NodeIndex::new(4)]);
    }
}
