//! Typed job wrappers for the steps of a TTS experiment.
//!
//! Every step is a method on [`Blueprint`] that builds a configuration,
//! adds the job and hands back a typed handle or artifact. None of them
//! touches the filesystem.

use std::collections::BTreeMap;

use crate::blueprint::Blueprint;
use crate::config::Config;
use crate::dataset::{ForwardDataset, Segments, TrainingDatasets};
use crate::engine::{
    AsrEvaluation, Artifact, Checkpoint, Forward, Handle, JobSpec, MergeHdf, SplitSegments,
    Training, Vocode, checkpoint_output,
};
use crate::error::{ConfigError, GraphError, KumitateError};
use crate::pin::Toolchain;
use crate::training::ModelOptions;
use crate::training::forward::{
    DURATIONS_HDF, ForwardConfig, ForwardOptions, OUTPUT_HDF, SPEAKER_EMBEDDINGS_HDF,
    SPEAKER_PRIOR_HDF,
};

/// A pretrained vocoder turning features into waveforms.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocoder {
    pub model: Artifact,
    /// Opaque vocoder parameters, e.g. Griffin-Lim iterations.
    pub params: Config,
}

impl Vocoder {
    /// Griffin-Lim reconstruction through a learned linear-spectrogram
    /// mapping stored in `model`.
    pub fn griffin_lim(model: Artifact) -> Self {
        Self {
            model,
            params: Config::new()
                .with("method", "griffin_lim")
                .with("iterations", 32)
                .with("sample_rate", 16000)
                .with("preemphasis", 0.97),
        }
    }
}

/// A pretrained recognizer used to score synthesized audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AsrSystem {
    pub config_file: Artifact,
    /// Extra options for the recognition job.
    pub params: Config,
}

impl AsrSystem {
    pub fn new(config_file: Artifact) -> Self {
        Self {
            config_file,
            params: Config::new(),
        }
    }
}

/// The jobs of a forward pass split over several parts of a corpus.
#[derive(Debug, Clone)]
pub struct SplitForward {
    pub parts: Vec<Handle<Forward>>,
    pub merges: BTreeMap<String, Handle<MergeHdf>>,
}

impl SplitForward {
    /// Concatenation of `stream` over all parts, in part order.
    pub fn merged(&self, stream: &str) -> Result<Artifact, GraphError> {
        self.merges
            .get(stream)
            .map(Handle::merged)
            .ok_or_else(|| GraphError::UnknownOutput {
                kind: "Forward",
                name: stream.to_string(),
            })
    }
}

fn trainer_job(config: &Config, toolchain: &Toolchain) -> Config {
    toolchain
        .to_config()
        .with("trainer_config", config.clone())
}

impl Blueprint {
    /// Train a model. The configuration decides the number of epochs and the
    /// checkpoints that are kept.
    pub fn train(
        &mut self,
        name: &str,
        config: &Config,
        toolchain: &Toolchain,
    ) -> Result<Handle<Training>, KumitateError> {
        let num_epochs = epoch("num_epochs", config.get_int("num_epochs")?)?;

        let mut outputs = vec![checkpoint_output(num_epochs)];
        if config.contains("cleanup_old_models.keep") {
            for value in config.get_list("cleanup_old_models.keep")? {
                let keep = value.as_int().ok_or_else(|| ConfigError::WrongType {
                    path: "cleanup_old_models.keep".into(),
                    expected: "a list of integers",
                })?;
                outputs.push(checkpoint_output(epoch("keep_epochs", keep)?));
            }
        }

        let spec = JobSpec::new(trainer_job(config, toolchain))
            .outputs(outputs)
            .output(crate::engine::LEARNING_RATES)
            .alias(format!("{name}/training"));

        Ok(self.add_job(spec)?)
    }

    /// Run a trained model over the data in `config`. The HDF files listed
    /// in `forward_outputs` become the outputs of the job.
    pub fn forward(
        &mut self,
        name: &str,
        checkpoint: &Checkpoint,
        config: &Config,
        toolchain: &Toolchain,
    ) -> Result<Handle<Forward>, KumitateError> {
        let mut outputs = Vec::new();
        for value in config.get_list("forward_outputs")? {
            let output = value.as_str().ok_or_else(|| ConfigError::WrongType {
                path: "forward_outputs".into(),
                expected: "a list of strings",
            })?;
            outputs.push(output.to_string());
        }

        let config = config.clone().with("load", checkpoint);
        let spec = JobSpec::new(trainer_job(&config, toolchain))
            .outputs(outputs)
            .alias(format!("{name}/forward"));

        Ok(self.add_job(spec)?)
    }

    /// Forward `dataset` in `splits` parts and merge every output stream.
    ///
    /// Listed segments are partitioned while building the graph. A segment
    /// file is partitioned by a `SplitSegments` job.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_with_splits(
        &mut self,
        name: &str,
        checkpoint: &Checkpoint,
        dataset: &ForwardDataset,
        options: &ForwardOptions,
        splits: usize,
        toolchain: &Toolchain,
    ) -> Result<SplitForward, KumitateError> {
        let parts = match dataset.split.segments() {
            Segments::Listed(_) => dataset.split.segments().split(splits)?,
            Segments::File(file) => {
                let num_parts = u32::try_from(splits)
                    .ok()
                    .filter(|&parts| parts > 0)
                    .ok_or_else(|| ConfigError::invalid("splits", format!("{splits} parts")))?;
                let split = self.split_segments(name, file, num_parts)?;
                (1..=splits)
                    .map(|part| split.part(part).map(Segments::File))
                    .collect::<Result<Vec<_>, GraphError>>()?
            }
            Segments::All => {
                return Err(ConfigError::invalid(
                    "splits",
                    "dataset has no segment list to split",
                )
                .into());
            }
        };

        let mut handles = Vec::with_capacity(parts.len());
        for (i, segments) in parts.into_iter().enumerate() {
            let config = ForwardConfig::build(&dataset.with_segments(segments), options)?;
            let part_name = format!("{name}/part.{}", i + 1);
            handles.push(self.forward(&part_name, checkpoint, &config, toolchain)?);
        }

        let mut merges = BTreeMap::new();
        for stream in options.forward_outputs() {
            let inputs = handles
                .iter()
                .map(|handle| handle.hdf(stream))
                .collect::<Result<Vec<_>, _>>()?;
            merges.insert(stream.to_string(), self.merge_hdf(name, stream, inputs)?);
        }

        tracing::debug!("Split forward '{name}' over {} parts", handles.len());

        Ok(SplitForward {
            parts: handles,
            merges,
        })
    }

    fn split_segments(
        &mut self,
        name: &str,
        file: &Artifact,
        num_parts: u32,
    ) -> Result<Handle<SplitSegments>, GraphError> {
        let config = Config::new()
            .with("segment_file", file)
            .with("num_parts", num_parts);

        let spec = JobSpec::new(config)
            .outputs((1..=num_parts as usize).map(crate::engine::segment_part))
            .alias(format!("{name}/split_segments"));

        self.add_job(spec)
    }

    fn merge_hdf(
        &mut self,
        name: &str,
        stream: &str,
        inputs: Vec<Artifact>,
    ) -> Result<Handle<MergeHdf>, GraphError> {
        let spec = JobSpec::new(Config::new().with("hdf_files", inputs))
            .output(crate::engine::MERGED)
            .alias(format!("{name}/merge/{stream}"));

        self.add_job(spec)
    }

    /// Turn predicted features into audio plus a corpus describing it.
    ///
    /// Segment names are taken from `reference_corpus` if given, otherwise
    /// from the sequence tags in `features`.
    pub fn vocode(
        &mut self,
        name: &str,
        features: &Artifact,
        vocoder: &Vocoder,
        reference_corpus: Option<&Artifact>,
    ) -> Result<Handle<Vocode>, GraphError> {
        let config = Config::new()
            .with("features", features)
            .with("vocoder.model", &vocoder.model)
            .with("vocoder.params", vocoder.params.clone())
            .with("reference_corpus", reference_corpus);

        let spec = JobSpec::new(config)
            .output(crate::engine::CORPUS)
            .output(crate::engine::AUDIO)
            .alias(format!("{name}/vocode"));

        self.add_job(spec)
    }

    /// Recognize `corpus` with a pretrained system and score it.
    pub fn asr_evaluation(
        &mut self,
        name: &str,
        corpus: &Artifact,
        segment_file: Option<&Artifact>,
        asr: &AsrSystem,
        toolchain: &Toolchain,
    ) -> Result<Handle<AsrEvaluation>, GraphError> {
        let config = toolchain
            .to_config()
            .with("asr_config", &asr.config_file)
            .with("asr_params", asr.params.clone())
            .with("corpus", corpus)
            .with("segment_file", segment_file);

        let spec = JobSpec::new(config)
            .output(crate::engine::REPORT)
            .alias(format!("{name}/asr_evaluation"));

        self.add_job(spec)
    }

    /// Synthetic word error rate: forward, reconstruct audio with the
    /// vocoder, recognize it. Registers the report as `<name>/swer.report`.
    pub fn gl_swer(
        &mut self,
        name: &str,
        checkpoint: &Checkpoint,
        config: &Config,
        vocoder: &Vocoder,
        asr: &AsrSystem,
        toolchain: &Toolchain,
    ) -> Result<Handle<AsrEvaluation>, KumitateError> {
        let forward = self.forward(name, checkpoint, config, toolchain)?;
        let vocoded = self.vocode(name, &forward.hdf(OUTPUT_HDF)?, vocoder, None)?;
        let evaluation = self.asr_evaluation(name, &vocoded.corpus(), None, asr, toolchain)?;

        self.register_report(format!("{name}/swer.report"), &evaluation.report())?;

        Ok(evaluation)
    }

    /// Synthesize a whole corpus in parts. The returned job holds the
    /// synthetic corpus and its audio.
    #[allow(clippy::too_many_arguments)]
    pub fn synthesize_with_splits(
        &mut self,
        name: &str,
        checkpoint: &Checkpoint,
        dataset: &ForwardDataset,
        options: &ForwardOptions,
        splits: usize,
        vocoder: &Vocoder,
        reference_corpus: &Artifact,
        toolchain: &Toolchain,
    ) -> Result<Handle<Vocode>, KumitateError> {
        let forward =
            self.forward_with_splits(name, checkpoint, dataset, options, splits, toolchain)?;
        let features = forward.merged(OUTPUT_HDF)?;

        Ok(self.vocode(name, &features, vocoder, Some(reference_corpus))?)
    }

    /// Per-utterance speaker embeddings over the training data.
    pub fn speaker_embeddings(
        &mut self,
        name: &str,
        checkpoint: &Checkpoint,
        datasets: &TrainingDatasets,
        model: &ModelOptions,
        toolchain: &Toolchain,
    ) -> Result<Artifact, KumitateError> {
        let options = ForwardOptions {
            model: model.clone(),
            calc_speaker_embedding: true,
            use_audio_data: model.use_vae,
            ..Default::default()
        };

        let mut dataset = datasets.train_forward();
        if model.use_vae {
            dataset = dataset.with_inference_audio();
        }

        let config = ForwardConfig::build(&dataset, &options)?;
        let name = format!("{name}/speaker_embeddings");
        let forward = self.forward(&name, checkpoint, &config, toolchain)?;

        Ok(forward.hdf(SPEAKER_EMBEDDINGS_HDF)?)
    }

    /// The VAE latent of every utterance in `dataset`, used as a speaker
    /// prior when synthesizing.
    pub fn speaker_prior(
        &mut self,
        name: &str,
        checkpoint: &Checkpoint,
        dataset: &ForwardDataset,
        model: &ModelOptions,
        toolchain: &Toolchain,
    ) -> Result<Artifact, KumitateError> {
        let options = ForwardOptions {
            model: model.clone(),
            dump_vae_prior: true,
            use_audio_data: true,
            ..Default::default()
        };

        let config = ForwardConfig::build(&dataset.with_inference_audio(), &options)?;
        let name = format!("{name}/speaker_prior");
        let forward = self.forward(&name, checkpoint, &config, toolchain)?;

        Ok(forward.hdf(SPEAKER_PRIOR_HDF)?)
    }

    /// Predicted phoneme durations for `dataset`.
    pub fn dump_durations(
        &mut self,
        name: &str,
        checkpoint: &Checkpoint,
        dataset: &ForwardDataset,
        options: &ForwardOptions,
        toolchain: &Toolchain,
    ) -> Result<Artifact, KumitateError> {
        let options = ForwardOptions {
            dump_durations: true,
            ..options.clone()
        };

        let config = ForwardConfig::build(dataset, &options)?;
        let name = format!("{name}/dump_durations");
        let forward = self.forward(&name, checkpoint, &config, toolchain)?;

        Ok(forward.hdf(DURATIONS_HDF)?)
    }
}

fn epoch(option: &'static str, value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|&epoch| epoch > 0)
        .ok_or_else(|| ConfigError::invalid(option, format!("epoch {value} is not positive")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TtsData;

    fn toolchain() -> Toolchain {
        Toolchain {
            trainer_exe: Artifact::external("/bin/launcher.sh"),
            trainer_root: Artifact::external("/src/trainer"),
            network_lib_root: Artifact::external("/src/network_lib"),
        }
    }

    fn with_segment_file() -> ForwardDataset {
        TtsData {
            audio_zip: Artifact::external("/data/train-clean-100.ogg.zip"),
            durations: Artifact::external("/data/durations.hdf"),
            train_segments: Segments::File(Artifact::external("/data/train.segments")),
            cv_segments: Segments::File(Artifact::external("/data/cv.segments")),
            feature_dim: 80,
            phoneme_inventory: 44,
            num_speakers: 251,
        }
        .build()
        .cv_forward()
    }

    fn checkpoint(blueprint: &mut Blueprint) -> Checkpoint {
        let config = Config::new().with("num_epochs", 1);
        blueprint
            .train("tts", &config, &toolchain())
            .unwrap()
            .checkpoint(1)
            .unwrap()
    }

    #[test]
    fn test_segment_file_needs_a_part_count() {
        let mut blueprint = Blueprint::new();
        let checkpoint = checkpoint(&mut blueprint);
        let options = ForwardOptions::default();

        for splits in [0, usize::MAX] {
            let result = blueprint.forward_with_splits(
                "cv",
                &checkpoint,
                &with_segment_file(),
                &options,
                splits,
                &toolchain(),
            );
            assert!(matches!(
                result,
                Err(KumitateError::Config(ConfigError::Invalid { option: "splits", .. }))
            ));
        }
        assert_eq!(blueprint.len(), 1);
    }

    #[test]
    fn test_segment_file_split_into_parts() {
        let mut blueprint = Blueprint::new();
        let checkpoint = checkpoint(&mut blueprint);

        let split = blueprint
            .forward_with_splits(
                "cv",
                &checkpoint,
                &with_segment_file(),
                &ForwardOptions::default(),
                3,
                &toolchain(),
            )
            .unwrap();

        assert_eq!(split.parts.len(), 3);
        assert!(split.merged(OUTPUT_HDF).is_ok());
        assert!(split.merged(DURATIONS_HDF).is_err());
    }
}
