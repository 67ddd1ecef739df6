#![forbid(unsafe_code)]
//! Typed, content-addressed job graphs for speech-processing experiments.
//!
//! An experiment is described as a graph of jobs: check out a toolkit at a
//! pinned revision, train a model, forward data through it, vocode the
//! result and score it with a speech recognizer. This crate only builds the
//! graph. Running it is the business of an external [`Engine`].
//!
//! ```rust
//! use kumitate::{Blueprint, Experiment, RepositoryPin, Toolchain, executable};
//! use kumitate::dataset::{Segments, TtsData};
//! use kumitate::training::TrainingOptions;
//! use kumitate::Artifact;
//!
//! let mut blueprint = Blueprint::new();
//!
//! let trainer = RepositoryPin::new("https://github.com/example/trainer", "240f119b").unwrap();
//! let network_lib = RepositoryPin::new("https://github.com/example/network_lib", "79876b18")
//!     .unwrap()
//!     .checkout_folder("network_lib");
//!
//! let toolchain = Toolchain {
//!     trainer_exe: executable("/bin/launcher.sh").unwrap().with_hash_overwrite("LAUNCHER"),
//!     trainer_root: blueprint.clone_repository(&trainer).unwrap().repository(),
//!     network_lib_root: blueprint.clone_repository(&network_lib).unwrap().repository(),
//! };
//!
//! let datasets = TtsData {
//!     audio_zip: Artifact::external("/data/train-clean-100.ogg.zip"),
//!     durations: Artifact::external("/data/durations.hdf"),
//!     train_segments: Segments::File(Artifact::external("/data/train.segments")),
//!     cv_segments: Segments::File(Artifact::external("/data/cv.segments")),
//!     feature_dim: 80,
//!     phoneme_inventory: 44,
//!     num_speakers: 251,
//! }
//! .build();
//!
//! let trained = Experiment::new("tts/baseline", toolchain)
//!     .with_datasets(datasets)
//!     .train(&mut blueprint, &TrainingOptions::default())
//!     .unwrap();
//!
//! trained.register(&mut blueprint).unwrap();
//!
//! let plan = blueprint.finish().unwrap();
//! assert_eq!(plan.jobs().len(), 3);
//! ```

pub mod alignment;
mod blueprint;
mod config;
mod core;
pub mod dataset;
mod engine;
mod error;
pub mod experiment;
pub mod pin;
pub mod pipeline;
mod plan;
pub mod settings;
pub mod training;
mod utils;

pub use crate::blueprint::Blueprint;
pub use crate::config::{Config, Value};
pub use crate::core::Hash32;
pub use crate::engine::{
    Artifact, AsrEvaluation, Checkpoint, CloneRepository, CompileBinaries, Dependencies,
    ExtractDurations, Forward, Handle, Job, JobKind, JobSpec, MergeHdf, Report, SplitSegments,
    Training, Vocode,
};
pub use crate::error::*;
pub use crate::experiment::Experiment;
pub use crate::pin::{RepositoryPin, Revision, Toolchain, executable};
pub use crate::plan::{DirectoryEngine, Engine, Plan, PlannedJob};
pub use crate::settings::Settings;

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
