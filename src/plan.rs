//! A frozen job graph, ready to be handed to an execution engine.

use std::collections::BTreeMap;
use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;

use crate::config::Config;
use crate::core::Hash32;
use crate::engine::{Artifact, Job};
use crate::error::PlanError;
use crate::utils::as_overhead;

static PROGRESS_STYLE: LazyLock<Option<ProgressStyle>> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .ok()
        .map(|style| style.progress_chars("#>-"))
});

/// A job as seen by the execution engine.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedJob {
    identity: Hash32,
    kind: &'static str,
    alias: Option<String>,
    directory: Utf8PathBuf,
    dependencies: Vec<Hash32>,
    outputs: Vec<String>,
    config: Config,
}

impl PlannedJob {
    pub(crate) fn new(job: &Job, mut dependencies: Vec<Hash32>) -> Self {
        dependencies.sort();
        dependencies.dedup();

        Self {
            identity: job.identity(),
            kind: job.kind(),
            alias: job.alias().map(str::to_string),
            directory: job.directory(),
            dependencies,
            outputs: job.outputs().map(str::to_string).collect(),
            config: job.config().clone(),
        }
    }

    pub fn identity(&self) -> Hash32 {
        self.identity
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    /// Identities of the jobs that must finish first.
    pub fn dependencies(&self) -> &[Hash32] {
        &self.dependencies
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Every job of a blueprint in dependency order, plus the registered
/// outputs.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    jobs: Vec<PlannedJob>,
    outputs: BTreeMap<String, Artifact>,
}

impl Plan {
    pub(crate) fn new(jobs: Vec<PlannedJob>, outputs: BTreeMap<String, Artifact>) -> Self {
        Self { jobs, outputs }
    }

    pub fn jobs(&self) -> &[PlannedJob] {
        &self.jobs
    }

    pub fn job(&self, identity: Hash32) -> Option<&PlannedJob> {
        self.jobs.iter().find(|job| job.identity == identity)
    }

    pub fn outputs(&self) -> &BTreeMap<String, Artifact> {
        &self.outputs
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write one `config.json` per job directory plus an `outputs.json`
    /// index below `root`.
    pub fn write(&self, root: &Utf8Path) -> Result<(), PlanError> {
        let s = Instant::now();

        let pb = ProgressBar::new(self.jobs.len() as u64);
        if let Some(style) = PROGRESS_STYLE.clone() {
            pb.set_style(style);
        }
        pb.set_message("Writing job configs...");

        self.jobs
            .par_iter()
            .progress_with(pb.clone())
            .try_for_each(|job| -> Result<(), PlanError> {
                let dir = root.join(&job.directory);
                fs::create_dir_all(&dir)?;
                fs::write(dir.join("config.json"), serde_json::to_vec_pretty(job)?)?;
                Ok(())
            })?;

        let outputs: BTreeMap<_, _> = self
            .outputs
            .iter()
            .map(|(name, artifact)| (name.as_str(), artifact.location()))
            .collect();

        fs::create_dir_all(root)?;
        fs::write(root.join("outputs.json"), serde_json::to_vec_pretty(&outputs)?)?;

        pb.finish_with_message(format!("Finished writing job configs! {}", as_overhead(s)));
        tracing::info!("Wrote {} jobs to {root}", self.jobs.len());

        Ok(())
    }
}

/// Submits a plan for execution.
///
/// This crate never runs jobs itself. An engine might write the plan to
/// disk for an external scheduler, hand it to a cluster queue, or record it
/// in a test.
pub trait Engine {
    fn submit(&self, plan: &Plan) -> anyhow::Result<()>;
}

/// Engine writing the plan to a directory, for an external scheduler to pick
/// up.
#[derive(Debug, Clone)]
pub struct DirectoryEngine {
    root: Utf8PathBuf,
}

impl DirectoryEngine {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Engine for DirectoryEngine {
    fn submit(&self, plan: &Plan) -> anyhow::Result<()> {
        plan.write(&self.root)?;
        Ok(())
    }
}
