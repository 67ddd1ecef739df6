//! CTC alignment of a TTS corpus.
//!
//! A small aligner is trained to recognize phonemes from the audio while
//! reconstructing the spectrogram. Its Viterbi alignment over the training
//! data is then turned into per-phoneme durations, which is what the TTS
//! model is trained on.

use serde::{Deserialize, Serialize};

use crate::blueprint::Blueprint;
use crate::config::Config;
use crate::dataset::{AUDIO_FEATURES, PHONEMES, StreamKind, TrainingDatasets};
use crate::engine::{Artifact, ExtractDurations, Handle, JobSpec, Training};
use crate::error::{ConfigError, KumitateError};
use crate::pin::Toolchain;

/// Frame-level phoneme alignment written by the aligner forward.
pub const ALIGNMENT_HDF: &str = "alignment.hdf";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignerOptions {
    pub hidden_size: u32,
    pub num_layers: u32,
    pub dropout: f64,
    /// Weight of the spectrogram reconstruction loss next to the CTC loss.
    pub spectrogram_loss_scale: f64,
    pub batch_size: u32,
    pub max_seqs: u32,
    pub num_epochs: u32,
    pub learning_rates: Vec<f64>,
}

impl Default for AlignerOptions {
    fn default() -> Self {
        Self {
            hidden_size: 256,
            num_layers: 5,
            dropout: 0.35,
            spectrogram_loss_scale: 1.0,
            batch_size: 28000,
            max_seqs: 200,
            num_epochs: 100,
            learning_rates: vec![0.001],
        }
    }
}

impl AlignerOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
            ("batch_size", self.batch_size),
            ("max_seqs", self.max_seqs),
            ("num_epochs", self.num_epochs),
        ];
        for (option, size) in sizes {
            if size == 0 {
                return Err(ConfigError::invalid(option, "must be positive"));
            }
        }

        if !(0.0..1.0).contains(&self.dropout) {
            let reason = format!("{} not in [0, 1)", self.dropout);
            return Err(ConfigError::invalid("dropout", reason));
        }
        if !self.spectrogram_loss_scale.is_finite() || self.spectrogram_loss_scale < 0.0 {
            let reason = format!("{} is negative", self.spectrogram_loss_scale);
            return Err(ConfigError::invalid("spectrogram_loss_scale", reason));
        }
        if self.learning_rates.is_empty() {
            return Err(ConfigError::invalid("learning_rates", "schedule is empty"));
        }

        Ok(())
    }

    fn network(&self, datasets: &TrainingDatasets) -> Result<Config, ConfigError> {
        let streams = &datasets.datastreams;
        let num_phonemes = match streams.get(PHONEMES).map(|stream| stream.kind) {
            Some(StreamKind::Labels { vocab_size }) => vocab_size,
            _ => return Err(ConfigError::missing_stream("aligner", PHONEMES)),
        };
        let feature_dim = match streams.get(AUDIO_FEATURES).map(|stream| stream.kind) {
            Some(StreamKind::Features { dim }) => dim,
            _ => return Err(ConfigError::missing_stream("aligner", AUDIO_FEATURES)),
        };

        Ok(Config::new()
            .with("class", "CtcAligner")
            .with("input", AUDIO_FEATURES)
            .with("target", PHONEMES)
            .with("feature_dim", feature_dim)
            // One extra label for the CTC blank.
            .with("num_classes", num_phonemes + 1)
            .with("hidden_size", self.hidden_size)
            .with("num_layers", self.num_layers)
            .with("dropout", self.dropout)
            .with("spectrogram_loss_scale", self.spectrogram_loss_scale))
    }
}

/// Builder for the aligner training and alignment configurations.
pub struct AlignerConfig;

impl AlignerConfig {
    pub fn build(
        datasets: &TrainingDatasets,
        options: &AlignerOptions,
    ) -> Result<Config, ConfigError> {
        options.validate()?;

        Ok(Config::new()
            .with("task", "train")
            .with("train", datasets.train.to_config())
            .with("dev", datasets.cv.to_config())
            .with("extern_data", datasets.datastreams.extern_data())
            .with("network", options.network(datasets)?)
            .with("batch_size", options.batch_size)
            .with("max_seqs", options.max_seqs)
            .with("num_epochs", options.num_epochs)
            .with("learning_rates", options.learning_rates.clone())
            .with("optimizer.class", "adam")
            .with("optimizer.epsilon", 1e-8)
            .with("gradient_clip", 1.0))
    }

    /// Dump the alignment of every training utterance, not just the ones
    /// in the segment list the aligner was trained on.
    pub fn alignment(
        datasets: &TrainingDatasets,
        options: &AlignerOptions,
    ) -> Result<Config, ConfigError> {
        options.validate()?;

        Ok(Config::new()
            .with("task", "forward")
            .with("eval", datasets.train.without_segment_file().to_config())
            .with("extern_data", datasets.datastreams.extern_data())
            .with("network", options.network(datasets)?.with("dump_alignment", true))
            .with("batch_size", options.batch_size)
            .with("max_seqs", options.max_seqs)
            .with("forward_outputs", vec![ALIGNMENT_HDF]))
    }
}

impl Blueprint {
    /// Train a CTC aligner on `datasets`.
    pub fn train_aligner(
        &mut self,
        name: &str,
        datasets: &TrainingDatasets,
        options: &AlignerOptions,
        toolchain: &Toolchain,
    ) -> Result<Handle<Training>, KumitateError> {
        let config = AlignerConfig::build(datasets, options)?;
        self.train(&format!("{name}/aligner"), &config, toolchain)
    }

    /// Phoneme durations from a frame-level alignment.
    pub fn extract_durations(
        &mut self,
        name: &str,
        alignment: &Artifact,
        toolchain: &Toolchain,
    ) -> Result<Handle<ExtractDurations>, KumitateError> {
        let config = toolchain
            .to_config()
            .with("alignment", alignment)
            .with("blank_index", -1);

        let spec = JobSpec::new(config)
            .output(crate::engine::DURATIONS_HDF)
            .alias(format!("{name}/extract_durations"));

        Ok(self.add_job(spec)?)
    }

    /// Train an aligner, align the training data and extract durations.
    /// The returned artifact is meant for
    /// [`TtsCorpus::with_durations`](crate::dataset::TtsCorpus::with_durations).
    pub fn align(
        &mut self,
        name: &str,
        datasets: &TrainingDatasets,
        options: &AlignerOptions,
        toolchain: &Toolchain,
    ) -> Result<Artifact, KumitateError> {
        let aligner = self.train_aligner(name, datasets, options, toolchain)?;
        let checkpoint = aligner.checkpoint(options.num_epochs)?;

        let config = AlignerConfig::alignment(datasets, options)?;
        let forward = self.forward(&format!("{name}/aligner"), &checkpoint, &config, toolchain)?;
        let durations = self.extract_durations(name, &forward.hdf(ALIGNMENT_HDF)?, toolchain)?;

        tracing::debug!("Aligned '{name}' in {} epochs", options.num_epochs);

        Ok(durations.durations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DURATIONS, Segments, TtsCorpus};
    use crate::training::{TrainingConfig, TrainingOptions};

    fn toolchain() -> Toolchain {
        Toolchain {
            trainer_exe: Artifact::external("/bin/launcher.sh"),
            trainer_root: Artifact::external("/src/trainer"),
            network_lib_root: Artifact::external("/src/network_lib"),
        }
    }

    fn corpus() -> TtsCorpus {
        TtsCorpus {
            audio_zip: Artifact::external("/data/train-clean-100.ogg.zip"),
            train_segments: Segments::File(Artifact::external("/data/train.segments")),
            cv_segments: Segments::File(Artifact::external("/data/cv.segments")),
            feature_dim: 80,
            phoneme_inventory: 44,
            num_speakers: 251,
        }
    }

    #[test]
    fn test_aligner_config() {
        let config = AlignerConfig::build(&corpus().build(), &AlignerOptions::default()).unwrap();

        assert_eq!(config.get_str("network.class").unwrap(), "CtcAligner");
        assert_eq!(config.get_int("network.num_classes").unwrap(), 45);
        assert_eq!(config.get_int("network.feature_dim").unwrap(), 80);
        assert_eq!(config.get_int("num_epochs").unwrap(), 100);
        assert!(!config.contains("dev.datasets.durations"));
    }

    #[test]
    fn test_alignment_covers_all_training_utterances() {
        let config =
            AlignerConfig::alignment(&corpus().build(), &AlignerOptions::default()).unwrap();

        assert_eq!(config.get_str("task").unwrap(), "forward");
        assert!(!config.contains("eval.datasets.audio.segment_file"));
        assert_eq!(config.get_list("forward_outputs").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_aligner_options() {
        let datasets = corpus().build();
        let options = AlignerOptions {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            AlignerConfig::build(&datasets, &options),
            Err(ConfigError::Invalid { option: "dropout", .. })
        ));

        let options = AlignerOptions {
            learning_rates: vec![],
            ..Default::default()
        };
        assert!(AlignerConfig::alignment(&datasets, &options).is_err());
    }

    #[test]
    fn test_tts_training_depends_on_aligner() {
        let mut blueprint = Blueprint::new();
        let corpus = corpus();
        let toolchain = toolchain();

        let durations = blueprint
            .align("tts/ctc", &corpus.build(), &AlignerOptions::default(), &toolchain)
            .unwrap();
        assert_eq!(blueprint.len(), 3);

        let datasets = corpus.with_durations(&durations).build();
        assert!(datasets.datastreams.contains(DURATIONS));

        let config = TrainingConfig::build(&datasets, &TrainingOptions::default()).unwrap();
        let tts = blueprint.train("tts/ctc", &config, &toolchain).unwrap();

        let plan = blueprint.finish().unwrap();
        let kinds: Vec<&str> = plan.jobs().iter().map(|job| job.kind()).collect();
        assert_eq!(kinds, ["Training", "Forward", "ExtractDurations", "Training"]);

        let extract = &plan.jobs()[2];
        assert_eq!(Some(extract.identity()), durations.creator());
        assert_eq!(plan.jobs()[3].identity(), tts.identity());
        assert_eq!(plan.jobs()[3].dependencies(), &[extract.identity()]);
    }

    #[test]
    fn test_same_corpus_aligns_once() {
        let mut blueprint = Blueprint::new();
        let datasets = corpus().build();
        let options = AlignerOptions::default();

        let first = blueprint.align("a", &datasets, &options, &toolchain()).unwrap();
        let second = blueprint.align("b", &datasets, &options, &toolchain()).unwrap();

        assert_eq!(first, second);
        assert_eq!(blueprint.len(), 3);

        let scaled = AlignerOptions {
            spectrogram_loss_scale: 0.5,
            ..Default::default()
        };
        let third = blueprint.align("c", &datasets, &scaled, &toolchain()).unwrap();
        assert_ne!(first, third);
        assert_eq!(blueprint.len(), 6);
    }
}
