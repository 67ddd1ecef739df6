//! Job kinds known to the blueprint and the outputs they expose.

use crate::engine::artifact::{Artifact, Checkpoint, Report, checkpoint_output};
use crate::engine::{Handle, JobKind};
use crate::error::GraphError;

macro_rules! job_kind {
    ($($(#[$meta:meta])* $name:ident => $label:literal),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name;

            impl JobKind for $name {
                const NAME: &'static str = $label;
            }
        )*
    };
}

job_kind! {
    /// Checks out a repository at a pinned revision.
    CloneRepository => "CloneRepository",
    /// Compiles binaries from a checked out repository.
    CompileBinaries => "CompileBinaries",
    /// Trains a model for a fixed number of epochs.
    Training => "Training",
    /// Runs a trained model over a dataset without updating it.
    Forward => "Forward",
    /// Splits a segment list file into parts.
    SplitSegments => "SplitSegments",
    /// Concatenates HDF files produced by split forward jobs.
    MergeHdf => "MergeHdf",
    /// Turns acoustic features into waveform audio and a corpus file.
    Vocode => "Vocode",
    /// Recognizes a corpus with a pretrained ASR system and scores it.
    AsrEvaluation => "AsrEvaluation",
    /// Turns frame-level alignments into per-phoneme durations.
    ExtractDurations => "ExtractDurations",
}

pub(crate) const REPOSITORY: &str = "repository";
pub(crate) const BINARIES: &str = "binaries";
pub(crate) const LEARNING_RATES: &str = "learning_rates";
pub(crate) const MERGED: &str = "out.hdf";
pub(crate) const CORPUS: &str = "corpus.xml.gz";
pub(crate) const AUDIO: &str = "audio";
pub(crate) const REPORT: &str = "report";
pub(crate) const DURATIONS_HDF: &str = "durations.hdf";

pub(crate) fn segment_part(part: usize) -> String {
    format!("segments.{part}")
}

impl Handle<CloneRepository> {
    /// The checked out tree.
    pub fn repository(&self) -> Artifact {
        self.artifact(REPOSITORY)
    }
}

impl Handle<CompileBinaries> {
    pub fn binaries(&self) -> Artifact {
        self.artifact(BINARIES)
    }
}

impl Handle<Training> {
    /// The checkpoint saved at `epoch`. Only epochs kept by the training
    /// configuration can be referenced.
    pub fn checkpoint(&self, epoch: u32) -> Result<Checkpoint, GraphError> {
        let index = self.output(&checkpoint_output(epoch))?;
        Ok(Checkpoint::new(epoch, index))
    }

    pub fn learning_rates(&self) -> Artifact {
        self.artifact(LEARNING_RATES)
    }
}

impl Handle<Forward> {
    pub fn hdf(&self, name: &str) -> Result<Artifact, GraphError> {
        self.output(name)
    }
}

impl Handle<SplitSegments> {
    /// Segment list of the 1-based `part`.
    pub fn part(&self, part: usize) -> Result<Artifact, GraphError> {
        self.output(&segment_part(part))
    }
}

impl Handle<MergeHdf> {
    pub fn merged(&self) -> Artifact {
        self.artifact(MERGED)
    }
}

impl Handle<Vocode> {
    pub fn corpus(&self) -> Artifact {
        self.artifact(CORPUS)
    }

    pub fn audio(&self) -> Artifact {
        self.artifact(AUDIO)
    }
}

impl Handle<AsrEvaluation> {
    pub fn report(&self) -> Report {
        Report(self.artifact(REPORT))
    }
}

impl Handle<ExtractDurations> {
    pub fn durations(&self) -> Artifact {
        self.artifact(DURATIONS_HDF)
    }
}
