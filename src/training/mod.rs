//! Trainer configurations for the non-autoregressive TTS model.
//!
//! Building a configuration validates every option against the others and
//! against the datastreams of the data, so an impossible combination fails
//! here instead of on the cluster hours later.

pub mod forward;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dataset::{
    AUDIO_FEATURES, Datastreams, ENERGY, PHONEMES, PITCH, SPEAKER_EMBEDDINGS, SPEAKER_LABELS,
    StreamKind, TrainingDatasets,
};
use crate::error::ConfigError;

/// Architecture options, shared between training and forwarding.
///
/// A forward pass has to use the options the model was trained with, so the
/// same struct is embedded in both [`TrainingOptions`] and
/// [`ForwardOptions`](forward::ForwardOptions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelOptions {
    pub embedding_size: u32,
    pub speaker_embedding_size: u32,
    pub enc_lstm_size: u32,
    pub dec_lstm_size: u32,
    pub hidden_dim: u32,
    pub variance_dim: u32,
    /// Gaussian upsampling instead of repeating encoder frames.
    pub gauss_up: bool,
    /// Variational reference encoder over the target audio.
    pub use_vae: bool,
    pub vae_latent_dim: u32,
    pub kl_beta: f64,
    pub scale_kl_loss: bool,
    pub skip_speaker_embeddings: bool,
    pub use_pitch_pred: bool,
    pub use_energy_pred: bool,
    pub dropout: f64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            embedding_size: 256,
            speaker_embedding_size: 256,
            enc_lstm_size: 256,
            dec_lstm_size: 1024,
            hidden_dim: 256,
            variance_dim: 512,
            gauss_up: false,
            use_vae: false,
            vae_latent_dim: 32,
            kl_beta: 1.0,
            scale_kl_loss: false,
            skip_speaker_embeddings: false,
            use_pitch_pred: false,
            use_energy_pred: false,
            dropout: 0.1,
        }
    }
}

impl ModelOptions {
    /// Checks that hold regardless of the data.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("embedding_size", self.embedding_size),
            ("enc_lstm_size", self.enc_lstm_size),
            ("dec_lstm_size", self.dec_lstm_size),
            ("hidden_dim", self.hidden_dim),
            ("variance_dim", self.variance_dim),
        ];
        for (option, size) in sizes {
            if size == 0 {
                return Err(ConfigError::invalid(option, "must be positive"));
            }
        }

        if !self.skip_speaker_embeddings && self.speaker_embedding_size == 0 {
            return Err(ConfigError::invalid("speaker_embedding_size", "must be positive"));
        }
        if self.use_vae && self.vae_latent_dim == 0 {
            return Err(ConfigError::invalid("vae_latent_dim", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            let reason = format!("{} not in [0, 1)", self.dropout);
            return Err(ConfigError::invalid("dropout", reason));
        }
        if !self.kl_beta.is_finite() || self.kl_beta <= 0.0 {
            let reason = format!("{} is not positive", self.kl_beta);
            return Err(ConfigError::invalid("kl_beta", reason));
        }

        if !self.use_vae {
            if self.scale_kl_loss {
                return Err(ConfigError::Conflict("scale_kl_loss", "use_vae = false".into()));
            }
            if self.kl_beta != 1.0 {
                return Err(ConfigError::Conflict("kl_beta", "use_vae = false".into()));
            }
        }

        Ok(())
    }

    /// The options as passed to the network constructor.
    pub(crate) fn kwargs(&self) -> Result<Config, ConfigError> {
        let json =
            serde_json::to_value(self).map_err(|e| ConfigError::invalid("network", e.to_string()))?;
        Config::from_json(json)
    }

    /// Network description for `datastreams`. Every section sizes its input
    /// from the same `embedding_dim`.
    pub(crate) fn network(&self, datastreams: &Datastreams) -> Result<Config, ConfigError> {
        let embedding_dim = self.embedding_size;

        let vocab_size = match datastreams.get(PHONEMES).map(|stream| stream.kind) {
            Some(StreamKind::Labels { vocab_size }) => vocab_size,
            _ => return Err(ConfigError::missing_stream("embedding", PHONEMES)),
        };
        let out_dim = match datastreams.get(AUDIO_FEATURES).map(|stream| stream.kind) {
            Some(StreamKind::Features { dim }) => dim,
            _ => return Err(ConfigError::missing_stream("decoder", AUDIO_FEATURES)),
        };

        let upsampling = if self.gauss_up {
            Config::new()
                .with("mode", "gauss")
                .with("variance_dim", self.variance_dim)
        } else {
            Config::new().with("mode", "repeat")
        };

        let mut network = Config::new()
            .with("class", "NarTtsModel")
            .with("kwargs", self.kwargs()?)
            .with(
                "embedding",
                Config::new()
                    .with("input", PHONEMES)
                    .with("vocab_size", vocab_size)
                    .with("embedding_dim", embedding_dim),
            )
            .with(
                "encoder",
                Config::new()
                    .with("embedding_dim", embedding_dim)
                    .with("lstm_size", self.enc_lstm_size)
                    .with("dropout", self.dropout),
            )
            .with(
                "duration_predictor",
                self.variance_predictor(embedding_dim).with("input", "encoder"),
            )
            .with("upsampling", upsampling.with("embedding_dim", embedding_dim))
            .with(
                "decoder",
                Config::new()
                    .with("embedding_dim", embedding_dim)
                    .with("lstm_size", self.dec_lstm_size)
                    .with("out_dim", out_dim)
                    .with("dropout", self.dropout),
            );

        if !self.skip_speaker_embeddings {
            network = network.with("speaker_embedding", self.speaker_embedding(datastreams)?);
        }

        if self.use_vae {
            network = network.with(
                "vae",
                Config::new()
                    .with("embedding_dim", embedding_dim)
                    .with("input", AUDIO_FEATURES)
                    .with("latent_dim", self.vae_latent_dim)
                    .with("kl_beta", self.kl_beta)
                    .with("scale_kl_loss", self.scale_kl_loss),
            );
        }

        // Targets are only wired where the data has them; synthesis data
        // never does.
        if self.use_pitch_pred {
            let target = datastreams.contains(PITCH).then_some(PITCH);
            network = network.with(
                "pitch_predictor",
                self.variance_predictor(embedding_dim).with("target", target),
            );
        }

        if self.use_energy_pred {
            let target = datastreams.contains(ENERGY).then_some(ENERGY);
            network = network.with(
                "energy_predictor",
                self.variance_predictor(embedding_dim).with("target", target),
            );
        }

        Ok(network)
    }

    fn variance_predictor(&self, embedding_dim: u32) -> Config {
        Config::new()
            .with("embedding_dim", embedding_dim)
            .with("hidden_dim", self.hidden_dim)
            .with("dropout", self.dropout)
    }

    /// Precomputed embeddings win over a lookup table over speaker labels,
    /// as long as they are actually fed.
    fn speaker_embedding(&self, datastreams: &Datastreams) -> Result<Config, ConfigError> {
        let config = Config::new()
            .with("embedding_dim", self.embedding_size)
            .with("speaker_embedding_dim", self.speaker_embedding_size);

        if datastreams.is_available_for_inference(SPEAKER_EMBEDDINGS) {
            return Ok(config.with("input", SPEAKER_EMBEDDINGS));
        }

        match datastreams.get(SPEAKER_LABELS).map(|stream| stream.kind) {
            Some(StreamKind::Labels { vocab_size }) => Ok(config
                .with("input", SPEAKER_LABELS)
                .with("num_speakers", vocab_size)),
            _ => Err(ConfigError::missing_stream("speaker_embedding", SPEAKER_LABELS)),
        }
    }
}

/// Everything a training run needs beyond the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingOptions {
    pub model: ModelOptions,
    pub batch_size: u32,
    pub max_seqs: u32,
    pub num_epochs: u32,
    /// Per-epoch learning rates. The last one holds for all further epochs.
    pub learning_rates: Vec<f64>,
    /// Checkpoints to keep besides the final one.
    pub keep_epochs: BTreeSet<u32>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            model: ModelOptions::default(),
            batch_size: 18000,
            max_seqs: 60,
            num_epochs: 200,
            learning_rates: vec![0.001],
            keep_epochs: BTreeSet::new(),
        }
    }
}

impl TrainingOptions {
    /// Kept epochs including the final one.
    pub fn kept_epochs(&self) -> BTreeSet<u32> {
        let mut epochs = self.keep_epochs.clone();
        epochs.insert(self.num_epochs);
        epochs
    }
}

/// Builder for training configurations.
pub struct TrainingConfig;

impl TrainingConfig {
    pub fn build(
        datasets: &TrainingDatasets,
        options: &TrainingOptions,
    ) -> Result<Config, ConfigError> {
        let model = &options.model;
        model.validate()?;

        if options.num_epochs == 0 {
            return Err(ConfigError::invalid("num_epochs", "must be positive"));
        }
        if options.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be positive"));
        }
        if options.max_seqs == 0 {
            return Err(ConfigError::invalid("max_seqs", "must be positive"));
        }
        if options.learning_rates.is_empty() {
            return Err(ConfigError::invalid("learning_rates", "schedule is empty"));
        }
        if let Some(epoch) = options
            .keep_epochs
            .iter()
            .find(|&&epoch| epoch == 0 || epoch > options.num_epochs)
        {
            return Err(ConfigError::invalid(
                "keep_epochs",
                format!("epoch {epoch} outside 1..={}", options.num_epochs),
            ));
        }

        for (option, set, stream) in [
            ("use_pitch_pred", model.use_pitch_pred, PITCH),
            ("use_energy_pred", model.use_energy_pred, ENERGY),
        ] {
            if set && !datasets.datastreams.contains(stream) {
                return Err(ConfigError::missing_stream(option, stream));
            }
        }

        if model.use_vae && !datasets.datastreams.is_available_for_inference(AUDIO_FEATURES) {
            return Err(ConfigError::Conflict(
                "use_vae",
                format!("'{AUDIO_FEATURES}' not available for inference"),
            ));
        }

        let network = model.network(&datasets.datastreams)?;
        let keep: Vec<u32> = options.kept_epochs().into_iter().collect();

        Ok(Config::new()
            .with("task", "train")
            .with("train", datasets.train.to_config())
            .with("dev", datasets.cv.to_config())
            .with("extern_data", datasets.datastreams.extern_data())
            .with("network", network)
            .with("batch_size", options.batch_size)
            .with("max_seqs", options.max_seqs)
            .with("num_epochs", options.num_epochs)
            .with("learning_rates", options.learning_rates.clone())
            .with("optimizer.class", "adam")
            .with("optimizer.epsilon", 1e-8)
            .with("gradient_clip", 1.0)
            .with("cleanup_old_models.keep", keep))
    }
}
