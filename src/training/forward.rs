//! Forward (inference) configurations.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dataset::{
    AUDIO_FEATURES, DURATIONS, ENERGY, ForwardDataset, PITCH, SPEAKER_EMBEDDINGS, SPEAKER_LABELS,
    SPEAKER_PRIOR,
};
use crate::error::ConfigError;
use crate::training::ModelOptions;

/// Predicted acoustic features.
pub const OUTPUT_HDF: &str = "output.hdf";
pub const DURATIONS_HDF: &str = "durations.hdf";
pub const SPEAKER_EMBEDDINGS_HDF: &str = "speaker_embeddings.hdf";
pub const SPEAKER_PRIOR_HDF: &str = "speaker_prior.hdf";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwardOptions {
    /// Must match the options the checkpoint was trained with.
    pub model: ModelOptions,
    /// Dump one speaker embedding per utterance.
    pub calc_speaker_embedding: bool,
    /// Dump the predicted phoneme durations.
    pub dump_durations: bool,
    /// Dump the VAE latent per utterance, as a speaker prior for synthesis.
    pub dump_vae_prior: bool,
    /// Upsample with durations from the data instead of predicted ones.
    pub use_true_durations: bool,
    /// Encode the reference audio with the VAE.
    pub use_audio_data: bool,
    /// Sample the VAE latent from a precomputed speaker prior.
    pub use_calculated_prior: bool,
    pub pitch_cheat: bool,
    pub energy_cheat: bool,
    pub batch_size: u32,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            model: ModelOptions::default(),
            calc_speaker_embedding: false,
            dump_durations: false,
            dump_vae_prior: false,
            use_true_durations: false,
            use_audio_data: false,
            use_calculated_prior: false,
            pitch_cheat: false,
            energy_cheat: false,
            batch_size: 4000,
        }
    }
}

impl ForwardOptions {
    /// HDF files the forward job writes, `output.hdf` always first.
    pub fn forward_outputs(&self) -> Vec<&'static str> {
        let mut acc = vec![OUTPUT_HDF];
        if self.dump_durations {
            acc.push(DURATIONS_HDF);
        }
        if self.calc_speaker_embedding {
            acc.push(SPEAKER_EMBEDDINGS_HDF);
        }
        if self.dump_vae_prior {
            acc.push(SPEAKER_PRIOR_HDF);
        }
        acc
    }

    fn validate(&self, dataset: &ForwardDataset) -> Result<(), ConfigError> {
        let model = &self.model;
        let streams = &dataset.datastreams;
        model.validate()?;

        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be positive"));
        }

        if self.calc_speaker_embedding && model.skip_speaker_embeddings {
            return Err(ConfigError::Conflict(
                "calc_speaker_embedding",
                "skip_speaker_embeddings".into(),
            ));
        }

        if model.use_vae {
            match (self.use_audio_data, self.use_calculated_prior) {
                (true, true) => {
                    return Err(ConfigError::Conflict(
                        "use_audio_data",
                        "use_calculated_prior".into(),
                    ));
                }
                (false, false) => {
                    return Err(ConfigError::invalid(
                        "use_vae",
                        "needs either use_audio_data or use_calculated_prior",
                    ));
                }
                _ => {}
            }
        } else {
            for (option, set) in [
                ("use_audio_data", self.use_audio_data),
                ("use_calculated_prior", self.use_calculated_prior),
                ("dump_vae_prior", self.dump_vae_prior),
            ] {
                if set {
                    return Err(ConfigError::Conflict(option, "use_vae = false".into()));
                }
            }
        }

        if self.use_audio_data && !streams.is_available_for_inference(AUDIO_FEATURES) {
            return Err(ConfigError::missing_stream("use_audio_data", AUDIO_FEATURES));
        }
        if self.dump_vae_prior && !streams.is_available_for_inference(AUDIO_FEATURES) {
            return Err(ConfigError::missing_stream("dump_vae_prior", AUDIO_FEATURES));
        }
        if self.use_calculated_prior && !streams.is_available_for_inference(SPEAKER_PRIOR) {
            return Err(ConfigError::missing_stream("use_calculated_prior", SPEAKER_PRIOR));
        }
        if self.use_true_durations && !streams.is_available_for_inference(DURATIONS) {
            return Err(ConfigError::missing_stream("use_true_durations", DURATIONS));
        }

        if self.pitch_cheat {
            if !model.use_pitch_pred {
                return Err(ConfigError::Conflict("pitch_cheat", "use_pitch_pred = false".into()));
            }
            if !streams.is_available_for_inference(PITCH) {
                return Err(ConfigError::missing_stream("pitch_cheat", PITCH));
            }
        }
        if self.energy_cheat {
            if !model.use_energy_pred {
                return Err(ConfigError::Conflict("energy_cheat", "use_energy_pred = false".into()));
            }
            if !streams.is_available_for_inference(ENERGY) {
                return Err(ConfigError::missing_stream("energy_cheat", ENERGY));
            }
        }

        if !model.skip_speaker_embeddings
            && !streams.is_available_for_inference(SPEAKER_LABELS)
            && !streams.is_available_for_inference(SPEAKER_EMBEDDINGS)
        {
            return Err(ConfigError::missing_stream("speaker_embedding", SPEAKER_EMBEDDINGS));
        }

        Ok(())
    }

    fn flags(&self) -> Config {
        Config::new()
            .with("calc_speaker_embedding", self.calc_speaker_embedding)
            .with("dump_durations", self.dump_durations)
            .with("dump_vae_prior", self.dump_vae_prior)
            .with("use_true_durations", self.use_true_durations)
            .with("use_audio_data", self.use_audio_data)
            .with("use_calculated_prior", self.use_calculated_prior)
            .with("pitch_cheat", self.pitch_cheat)
            .with("energy_cheat", self.energy_cheat)
    }
}

/// Builder for forward configurations.
pub struct ForwardConfig;

impl ForwardConfig {
    pub fn build(
        dataset: &ForwardDataset,
        options: &ForwardOptions,
    ) -> Result<Config, ConfigError> {
        options.validate(dataset)?;

        let mut network = options.model.network(&dataset.datastreams)?;
        network = network.merge(&Config::new().with("kwargs", options.flags()));

        if options.use_true_durations {
            network = network.with("upsampling.durations", DURATIONS);
        }
        if options.pitch_cheat {
            network = network.with("pitch_predictor.cheat", true);
        }
        if options.energy_cheat {
            network = network.with("energy_predictor.cheat", true);
        }
        if options.model.use_vae {
            let source = if options.use_audio_data { AUDIO_FEATURES } else { SPEAKER_PRIOR };
            network = network.with("vae.inference_input", source);
        }

        Ok(Config::new()
            .with("task", "forward")
            .with("eval", dataset.split.to_config())
            .with("extern_data", dataset.datastreams.extern_data())
            .with("network", network)
            .with("batch_size", options.batch_size)
            .with("max_seqs", 60)
            .with("forward_outputs", options.forward_outputs()))
    }
}
