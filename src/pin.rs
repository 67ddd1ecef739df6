//! Pinning external toolkits to exact revisions.

use std::str::FromStr;

use crate::blueprint::Blueprint;
use crate::config::Config;
use crate::engine::{Artifact, CloneRepository, CompileBinaries, Handle, JobSpec};
use crate::error::{GraphError, PinError};

/// A source-control revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Revision {
    /// Abbreviated or full commit hash, 7 to 40 hex digits.
    Commit(String),
    /// A branch or tag name. Not reproducible, the checkout follows the ref.
    Branch(String),
}

impl Revision {
    pub fn parse(revision: &str) -> Result<Self, PinError> {
        let fail = |reason| Err(PinError::Revision(revision.to_string(), reason));

        if revision.is_empty() {
            return fail("empty revision");
        }

        if (7..=40).contains(&revision.len()) && revision.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Revision::Commit(revision.to_ascii_lowercase()));
        }

        if revision
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
        {
            return fail("forbidden character in ref name");
        }
        if revision.contains("..") || revision.contains("@{") || revision.contains("//") {
            return fail("forbidden sequence in ref name");
        }
        if revision.starts_with(['-', '/', '.']) || revision.ends_with(['/', '.']) {
            return fail("ref name starts or ends with a forbidden character");
        }
        if revision.ends_with(".lock") {
            return fail("ref name ends with .lock");
        }

        Ok(Revision::Branch(revision.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Revision::Commit(hash) => hash,
            Revision::Branch(name) => name,
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, Revision::Commit(_))
    }
}

impl FromStr for Revision {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Revision::parse(s)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn validate_url(url: &str) -> Result<(), PinError> {
    const SCHEMES: [&str; 5] = ["https://", "http://", "ssh://", "git://", "file://"];

    let fail = || Err(PinError::Url(url.to_string()));

    if url.chars().any(char::is_whitespace) {
        return fail();
    }

    if let Some(rest) = SCHEMES.iter().find_map(|scheme| url.strip_prefix(scheme)) {
        return if rest.is_empty() { fail() } else { Ok(()) };
    }

    // scp-like syntax, git@github.com:owner/repo.git
    match url.split_once(':') {
        Some((host, path)) if host.contains('@') && !host.contains('/') && !path.is_empty() => {
            Ok(())
        }
        _ => fail(),
    }
}

/// A repository checked out at an exact revision.
///
/// Pins are plain values: two experiments using different revisions hold
/// two different pins, there is no process-wide toolkit state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryPin {
    url: String,
    revision: Revision,
    checkout_folder_name: String,
    hash_overwrite: Option<String>,
}

impl RepositoryPin {
    pub fn new(url: impl Into<String>, revision: &str) -> Result<Self, PinError> {
        let url = url.into();
        validate_url(&url)?;
        let revision = Revision::parse(revision)?;

        Ok(Self {
            url,
            revision,
            checkout_folder_name: "repository".to_string(),
            hash_overwrite: None,
        })
    }

    /// Name of the checked out directory, for toolkits imported by folder
    /// name.
    pub fn checkout_folder(mut self, name: impl Into<String>) -> Self {
        self.checkout_folder_name = name.into();
        self
    }

    /// Keep the identity of the checkout stable while the revision moves.
    pub fn hash_overwrite(mut self, key: impl Into<String>) -> Self {
        self.hash_overwrite = Some(key.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    fn to_config(&self) -> Config {
        Config::new()
            .with("url", self.url.as_str())
            .with("revision", self.revision.as_str())
            .with("branch", !self.revision.is_commit())
            .with("checkout_folder_name", self.checkout_folder_name.as_str())
    }
}

/// Pin an executable found outside of the graph.
pub fn executable(path: &str) -> Result<Artifact, PinError> {
    if path.trim().is_empty() {
        return Err(PinError::EmptyPath);
    }
    Ok(Artifact::external(path))
}

/// The toolkit versions a pipeline is built against.
///
/// Passed by value to every step that launches the trainer, so the
/// versions in use are visible at each call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Launcher for the training toolkit.
    pub trainer_exe: Artifact,
    /// Checked out training toolkit.
    pub trainer_root: Artifact,
    /// Checked out network definition library.
    pub network_lib_root: Artifact,
}

impl Toolchain {
    pub(crate) fn to_config(&self) -> Config {
        Config::new()
            .with("trainer_exe", &self.trainer_exe)
            .with("trainer_root", &self.trainer_root)
            .with("network_lib_root", &self.network_lib_root)
    }
}

impl Blueprint {
    /// Check out a pinned repository. Requesting the same pin twice returns
    /// the same job.
    pub fn clone_repository(
        &mut self,
        pin: &RepositoryPin,
    ) -> Result<Handle<CloneRepository>, GraphError> {
        let mut spec = JobSpec::<CloneRepository>::new(pin.to_config())
            .output(crate::engine::REPOSITORY)
            .alias(format!("clone/{}", pin.checkout_folder_name));

        if let Some(key) = &pin.hash_overwrite {
            spec = spec.hash_overwrite(key.as_str());
        }

        self.add_job(spec)
    }

    /// Compile the binaries of a checked out repository with the given
    /// build flavour.
    pub fn compile_binaries(
        &mut self,
        repository: &Handle<CloneRepository>,
        flavour: &str,
    ) -> Result<Handle<CompileBinaries>, GraphError> {
        let config = Config::new()
            .with("repository", repository.repository())
            .with("flavour", flavour);

        self.add_job(JobSpec::new(config).output(crate::engine::BINARIES))
    }
}
