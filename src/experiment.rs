//! One experiment as a chain of typed states.
//!
//! ```text
//! Pinned -> DatasetReady -> Trained -> (ForwardReady -> Synthesized)* -> Registered
//! ```
//!
//! Every transition borrows the current state and returns the next one, so
//! a chain can be branched at any point by keeping the earlier value around.
//! The jobs themselves live in the [`Blueprint`] passed to each step.

use crate::blueprint::Blueprint;
use crate::config::Config;
use crate::dataset::{ForwardDataset, TrainingDatasets};
use crate::engine::{Artifact, Checkpoint, Forward, Handle, Training, Vocode};
use crate::error::{ConfigError, GraphError, KumitateError};
use crate::pin::Toolchain;
use crate::pipeline::{AsrSystem, Vocoder};
use crate::training::forward::{ForwardConfig, ForwardOptions};
use crate::training::{TrainingConfig, TrainingOptions};

/// Toolchain chosen, no data yet.
#[derive(Debug, Clone)]
pub struct Pinned;

#[derive(Debug, Clone)]
pub struct DatasetReady {
    datasets: TrainingDatasets,
}

#[derive(Debug, Clone)]
pub struct Trained {
    datasets: TrainingDatasets,
    options: TrainingOptions,
    training: Handle<Training>,
}

#[derive(Debug, Clone)]
pub struct ForwardReady {
    trained: Trained,
    dataset: ForwardDataset,
    options: ForwardOptions,
    config: Config,
}

#[derive(Debug, Clone)]
pub struct Synthesized {
    trained: Trained,
    vocoded: Handle<Vocode>,
}

#[derive(Debug, Clone)]
pub struct Registered {
    outputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Experiment<S> {
    name: String,
    toolchain: Toolchain,
    state: S,
}

impl<S> Experiment<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn next<T>(&self, state: T) -> Experiment<T> {
        Experiment {
            name: self.name.clone(),
            toolchain: self.toolchain.clone(),
            state,
        }
    }
}

impl Experiment<Pinned> {
    pub fn new(name: impl Into<String>, toolchain: Toolchain) -> Self {
        Self {
            name: name.into(),
            toolchain,
            state: Pinned,
        }
    }

    pub fn with_datasets(&self, datasets: TrainingDatasets) -> Experiment<DatasetReady> {
        self.next(DatasetReady { datasets })
    }
}

impl Experiment<DatasetReady> {
    pub fn datasets(&self) -> &TrainingDatasets {
        &self.state.datasets
    }

    pub fn train(
        &self,
        blueprint: &mut Blueprint,
        options: &TrainingOptions,
    ) -> Result<Experiment<Trained>, KumitateError> {
        let config = TrainingConfig::build(&self.state.datasets, options)?;
        let training = blueprint.train(&self.name, &config, &self.toolchain)?;

        Ok(self.next(Trained {
            datasets: self.state.datasets.clone(),
            options: options.clone(),
            training,
        }))
    }
}

impl Experiment<Trained> {
    pub fn training(&self) -> &Handle<Training> {
        &self.state.training
    }

    pub fn datasets(&self) -> &TrainingDatasets {
        &self.state.datasets
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.state.options
    }

    /// The checkpoint of the last epoch.
    pub fn checkpoint(&self) -> Result<Checkpoint, GraphError> {
        self.state.training.checkpoint(self.state.options.num_epochs)
    }

    pub fn checkpoint_at(&self, epoch: u32) -> Result<Checkpoint, GraphError> {
        self.state.training.checkpoint(epoch)
    }

    /// Prepare a forward pass of the trained model. The model options in
    /// `options` are replaced by the ones used for training.
    pub fn prepare_forward(
        &self,
        dataset: ForwardDataset,
        options: ForwardOptions,
    ) -> Result<Experiment<ForwardReady>, ConfigError> {
        let options = ForwardOptions {
            model: self.state.options.model.clone(),
            ..options
        };
        let config = ForwardConfig::build(&dataset, &options)?;

        Ok(self.next(ForwardReady {
            trained: self.state.clone(),
            dataset,
            options,
            config,
        }))
    }

    /// Speaker embeddings of the training data, computed by this model.
    pub fn speaker_embeddings(
        &self,
        blueprint: &mut Blueprint,
    ) -> Result<Artifact, KumitateError> {
        blueprint.speaker_embeddings(
            &self.name,
            &self.checkpoint()?,
            &self.state.datasets,
            &self.state.options.model,
            &self.toolchain,
        )
    }

    /// Register the final checkpoint as `<name>/model`.
    pub fn register(
        &self,
        blueprint: &mut Blueprint,
    ) -> Result<Experiment<Registered>, GraphError> {
        let output = format!("{}/model", self.name);
        blueprint.register_output(output.as_str(), self.checkpoint()?.artifact())?;
        Ok(self.next(Registered {
            outputs: vec![output],
        }))
    }
}

impl Experiment<ForwardReady> {
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    pub fn options(&self) -> &ForwardOptions {
        &self.state.options
    }

    fn trained(&self) -> Experiment<Trained> {
        self.next(self.state.trained.clone())
    }

    /// Forward the whole dataset in one job.
    pub fn forward(&self, blueprint: &mut Blueprint) -> Result<Handle<Forward>, KumitateError> {
        let checkpoint = self.trained().checkpoint()?;
        blueprint.forward(&self.name, &checkpoint, &self.state.config, &self.toolchain)
    }

    /// Score the model with the synthetic word error rate and register the
    /// report.
    pub fn gl_swer(
        &self,
        blueprint: &mut Blueprint,
        vocoder: &Vocoder,
        asr: &AsrSystem,
    ) -> Result<Experiment<Registered>, KumitateError> {
        let name = format!("{}/gl_swer", self.name);
        let checkpoint = self.trained().checkpoint()?;
        blueprint.gl_swer(&name, &checkpoint, &self.state.config, vocoder, asr, &self.toolchain)?;

        Ok(self.next(Registered {
            outputs: vec![format!("{name}/swer.report")],
        }))
    }

    /// Synthesize the dataset in `splits` parts.
    pub fn synthesize(
        &self,
        blueprint: &mut Blueprint,
        splits: usize,
        vocoder: &Vocoder,
        reference_corpus: &Artifact,
    ) -> Result<Experiment<Synthesized>, KumitateError> {
        let checkpoint = self.trained().checkpoint()?;
        let vocoded = blueprint.synthesize_with_splits(
            &self.name,
            &checkpoint,
            &self.state.dataset,
            &self.state.options,
            splits,
            vocoder,
            reference_corpus,
            &self.toolchain,
        )?;

        Ok(self.next(Synthesized {
            trained: self.state.trained.clone(),
            vocoded,
        }))
    }
}

impl Experiment<Synthesized> {
    pub fn corpus(&self) -> Artifact {
        self.state.vocoded.corpus()
    }

    pub fn audio(&self) -> Artifact {
        self.state.vocoded.audio()
    }

    /// Back to the trained model, for another forward pass.
    pub fn trained(&self) -> Experiment<Trained> {
        self.next(self.state.trained.clone())
    }

    /// Register the synthetic corpus as `<name>/<label>/corpus.xml.gz`.
    pub fn register(
        &self,
        blueprint: &mut Blueprint,
        label: &str,
    ) -> Result<Experiment<Registered>, GraphError> {
        let output = format!("{}/{label}/{}", self.name, crate::engine::CORPUS);
        blueprint.register_output(output.as_str(), &self.corpus())?;
        Ok(self.next(Registered {
            outputs: vec![output],
        }))
    }
}

impl Experiment<Registered> {
    /// Names under which the results were registered.
    pub fn outputs(&self) -> &[String] {
        &self.state.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Segments, TtsData};

    fn toolchain() -> Toolchain {
        Toolchain {
            trainer_exe: Artifact::external("/bin/launcher.sh").with_hash_overwrite("LAUNCHER"),
            trainer_root: Artifact::external("/src/trainer"),
            network_lib_root: Artifact::external("/src/network_lib"),
        }
    }

    fn datasets() -> TrainingDatasets {
        TtsData {
            audio_zip: Artifact::external("/data/audio.ogg.zip"),
            durations: Artifact::external("/data/durations.hdf"),
            train_segments: Segments::Listed((0..10).map(|i| format!("train/{i}")).collect()),
            cv_segments: Segments::Listed((0..4).map(|i| format!("cv/{i}")).collect()),
            feature_dim: 80,
            phoneme_inventory: 44,
            num_speakers: 251,
        }
        .build()
    }

    fn trained(blueprint: &mut Blueprint) -> Experiment<Trained> {
        Experiment::new("exp/baseline", toolchain())
            .with_datasets(datasets())
            .train(blueprint, &TrainingOptions::default())
            .unwrap()
    }

    #[test]
    fn test_branching_shares_training() {
        let mut blueprint = Blueprint::new();
        let trained = trained(&mut blueprint);
        let again = trained.clone();

        let a = trained
            .prepare_forward(trained.datasets().cv_forward(), ForwardOptions::default())
            .unwrap();
        let b = again
            .prepare_forward(
                again.datasets().cv_forward(),
                ForwardOptions {
                    dump_durations: true,
                    ..Default::default()
                },
            )
            .unwrap();

        a.forward(&mut blueprint).unwrap();
        b.forward(&mut blueprint).unwrap();

        assert_eq!(blueprint.len(), 3);
    }

    #[test]
    fn test_prepare_forward_uses_trained_model() {
        let mut blueprint = Blueprint::new();
        let trained = Experiment::new("exp/gauss", toolchain())
            .with_datasets(datasets())
            .train(
                &mut blueprint,
                &TrainingOptions {
                    model: crate::training::ModelOptions {
                        gauss_up: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        let ready = trained
            .prepare_forward(trained.datasets().cv_forward(), ForwardOptions::default())
            .unwrap();

        assert!(ready.options().model.gauss_up);
        assert_eq!(ready.config().get_str("network.upsampling.mode").unwrap(), "gauss");
    }

    #[test]
    fn test_synthesize_and_register() {
        let mut blueprint = Blueprint::new();
        let trained = trained(&mut blueprint);
        let vocoder = Vocoder::griffin_lim(Artifact::external("/models/vocoder.pt"));
        let reference = Artifact::external("/corpora/train-clean-100.xml.gz");

        let registered = trained
            .prepare_forward(trained.datasets().train_forward(), ForwardOptions::default())
            .unwrap()
            .synthesize(&mut blueprint, 3, &vocoder, &reference)
            .unwrap()
            .register(&mut blueprint, "synthetic")
            .unwrap();

        assert_eq!(
            registered.outputs(),
            &["exp/baseline/synthetic/corpus.xml.gz".to_string()]
        );
        // training, 3 forward parts, 1 merge, 1 vocoder
        assert_eq!(blueprint.len(), 6);
    }

    #[test]
    fn test_gl_swer_registers_report() {
        let mut blueprint = Blueprint::new();
        let trained = trained(&mut blueprint);
        let vocoder = Vocoder::griffin_lim(Artifact::external("/models/vocoder.pt"));
        let asr = AsrSystem::new(Artifact::external("/asr/trafo.config"));

        let registered = trained
            .prepare_forward(trained.datasets().cv_forward(), ForwardOptions::default())
            .unwrap()
            .gl_swer(&mut blueprint, &vocoder, &asr)
            .unwrap();

        assert_eq!(registered.outputs(), &["exp/baseline/gl_swer/swer.report".to_string()]);
        assert!(blueprint.outputs().contains_key("exp/baseline/gl_swer/swer.report"));
    }
}
