use std::hash::{Hash, Hasher};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::graph::NodeIndex;
use serde::{Serialize, Serializer};

use crate::core::Hash32;

/// Where an artifact comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A path that exists outside of the graph, e.g. a launcher script or a
    /// corpus prepared by hand.
    External,
    /// A named output of a job in the graph.
    Job {
        index: NodeIndex,
        identity: Hash32,
        kind: &'static str,
    },
}

/// A reference to a file or directory that exists now, or will exist once
/// the job that creates it has finished.
///
/// Artifacts are only ever passed forward into configurations. This crate
/// never opens them, and the only thing it exposes is the logical
/// [`location`](Artifact::location) the execution engine will resolve.
///
/// Placing an artifact into a [`Config`](crate::Config) is what creates an
/// edge in the job graph: the job owning that configuration depends on the
/// creator of every artifact it mentions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    origin: Origin,
    path: Utf8PathBuf,
    hash_overwrite: Option<Arc<str>>,
}

impl Artifact {
    /// Pin a path outside of the graph.
    pub fn external(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            origin: Origin::External,
            path: path.into(),
            hash_overwrite: None,
        }
    }

    pub(crate) fn job_output(
        index: NodeIndex,
        identity: Hash32,
        kind: &'static str,
        name: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            origin: Origin::Job {
                index,
                identity,
                kind,
            },
            path: name.into(),
            hash_overwrite: None,
        }
    }

    /// Replace the contribution of this artifact to job identities with a
    /// fixed key.
    ///
    /// Used for things like launcher scripts that move between machines: the
    /// path changes, the jobs using it should not.
    pub fn with_hash_overwrite(mut self, key: impl Into<String>) -> Self {
        self.hash_overwrite = Some(Arc::from(key.into()));
        self
    }

    /// Output name for job artifacts, the full path for external ones.
    pub fn name(&self) -> &Utf8Path {
        &self.path
    }

    pub fn is_external(&self) -> bool {
        matches!(self.origin, Origin::External)
    }

    /// Identity of the job creating this artifact.
    pub fn creator(&self) -> Option<Hash32> {
        match self.origin {
            Origin::External => None,
            Origin::Job { identity, .. } => Some(identity),
        }
    }

    pub(crate) fn node(&self) -> Option<NodeIndex> {
        match self.origin {
            Origin::External => None,
            Origin::Job { index, .. } => Some(index),
        }
    }

    pub fn hash_overwrite(&self) -> Option<&str> {
        self.hash_overwrite.as_deref()
    }

    /// The path the execution engine resolves this artifact to, relative to
    /// its base directory for job outputs.
    pub fn location(&self) -> Utf8PathBuf {
        match self.origin {
            Origin::External => self.path.clone(),
            Origin::Job { identity, kind, .. } => {
                job_directory(kind, identity).join("output").join(&self.path)
            }
        }
    }
}

impl Hash for Artifact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(key) = &self.hash_overwrite {
            0u8.hash(state);
            key.hash(state);
            return;
        }

        match self.origin {
            Origin::External => {
                1u8.hash(state);
                self.path.as_str().hash(state);
            }
            Origin::Job { identity, .. } => {
                2u8.hash(state);
                identity.hash(state);
                self.path.as_str().hash(state);
            }
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.location().as_str())
    }
}

impl Serialize for Artifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.location().as_str())
    }
}

pub(crate) fn job_directory(kind: &str, identity: Hash32) -> Utf8PathBuf {
    Utf8Path::new("work").join(format!("{kind}.{}", identity.short()))
}

pub(crate) fn checkpoint_output(epoch: u32) -> String {
    format!("models/epoch.{epoch:03}.index")
}

/// A model parameter snapshot saved by a training job at a given epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checkpoint {
    epoch: u32,
    index: Artifact,
}

impl Checkpoint {
    pub(crate) fn new(epoch: u32, index: Artifact) -> Self {
        Self { epoch, index }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn artifact(&self) -> &Artifact {
        &self.index
    }
}

/// The result of a diagnostic job.
///
/// Deliberately not convertible into a configuration value, so a report can
/// be registered as an output but never feed another job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report(pub(crate) Artifact);

impl Report {
    pub fn location(&self) -> Utf8PathBuf {
        self.0.location()
    }
}
