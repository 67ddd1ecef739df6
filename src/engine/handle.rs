use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::Hash32;
use crate::engine::JobKind;
use crate::engine::artifact::Artifact;
use crate::error::GraphError;

/// A type-safe reference to a job in the graph.
///
/// A `Handle<K>` is a cheap, cloneable token that represents the future
/// outputs of a job of kind `K`. It never gives access to the contents of
/// those outputs, only to [`Artifact`]s naming them, which can then be
/// placed into the configuration of the next job.
///
/// # Deduplication
///
/// Adding a job whose identity already exists in the graph returns a handle
/// to the existing node. Two variants sharing a common prefix of their
/// pipeline therefore share the jobs of that prefix.
#[derive(PartialEq, Eq, Hash)]
pub struct Handle<K> {
    index: NodeIndex,
    identity: Hash32,
    outputs: Arc<BTreeSet<String>>,
    _phantom: PhantomData<fn() -> K>,
}

impl<K: JobKind> Handle<K> {
    pub(crate) fn new(index: NodeIndex, identity: Hash32, outputs: Arc<BTreeSet<String>>) -> Self {
        Self {
            index,
            identity,
            outputs,
            _phantom: PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the job in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Content-addressed identity of the job.
    pub fn identity(&self) -> Hash32 {
        self.identity
    }

    /// Names of all declared outputs.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(String::as_str)
    }

    /// Reference a declared output by name.
    pub fn output(&self, name: &str) -> Result<Artifact, GraphError> {
        if !self.outputs.contains(name) {
            return Err(GraphError::UnknownOutput {
                kind: K::NAME,
                name: name.to_string(),
            });
        }

        Ok(self.artifact(name))
    }

    pub(crate) fn artifact(&self, name: &str) -> Artifact {
        Artifact::job_output(self.index, self.identity, K::NAME, name)
    }
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            identity: self.identity,
            outputs: self.outputs.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<K: JobKind> std::fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle<{}>({})", K::NAME, self.identity.short())
    }
}
