//! Dataset descriptors: corpora, splits and named datastreams.
//!
//! Descriptors are reused as baselines for many experiment variants, so
//! extending one never touches the original. Every `with_*` method takes
//! `&self` and returns a new descriptor.

use std::collections::BTreeMap;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::config::{Config, Value};
use crate::engine::{Artifact, Dependencies};
use crate::error::ConfigError;

pub const AUDIO_FEATURES: &str = "audio_features";
pub const PHONEMES: &str = "phonemes";
pub const SPEAKER_LABELS: &str = "speaker_labels";
pub const DURATIONS: &str = "durations";
pub const PITCH: &str = "pitch";
pub const ENERGY: &str = "energy";
pub const SPEAKER_EMBEDDINGS: &str = "speaker_embeddings";
pub const SPEAKER_PRIOR: &str = "speaker_prior";

/// What a datastream carries per utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamKind {
    /// Dense feature frames, e.g. log-mel spectra.
    Features { dim: u32 },
    /// Sparse label sequence.
    Labels { vocab_size: u32 },
    /// One integer duration per label.
    Durations,
    Pitch,
    Energy,
    /// One vector per utterance.
    SpeakerEmbedding { dim: u32 },
    /// Latent speaker prior estimated by a variational model.
    SpeakerPrior { dim: u32 },
}

impl StreamKind {
    fn extern_data(&self, available_for_inference: bool) -> Config {
        let config = Config::new().with("available_for_inference", available_for_inference);

        match *self {
            StreamKind::Features { dim } => config.with("dim", dim).with("dtype", "float32"),
            StreamKind::Labels { vocab_size } => config
                .with("dim", vocab_size)
                .with("sparse", true)
                .with("dtype", "int32"),
            StreamKind::Durations => config.with("dim", 1).with("dtype", "int32"),
            StreamKind::Pitch | StreamKind::Energy => {
                config.with("dim", 1).with("dtype", "float32")
            }
            StreamKind::SpeakerEmbedding { dim } | StreamKind::SpeakerPrior { dim } => config
                .with("dim", dim)
                .with("dtype", "float32")
                .with("time_dim", false),
        }
    }
}

/// A named, per-utterance feature sequence attached to a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Datastream {
    pub kind: StreamKind,
    pub available_for_inference: bool,
}

impl Datastream {
    pub fn new(kind: StreamKind, available_for_inference: bool) -> Self {
        Self {
            kind,
            available_for_inference,
        }
    }
}

/// The datastreams of a dataset, by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Datastreams(BTreeMap<String, Datastream>);

impl Datastreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, name: impl Into<String>, stream: Datastream) -> Self {
        let mut next = self.clone();
        next.0.insert(name.into(), stream);
        next
    }

    pub fn without(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.0.remove(name);
        next
    }

    pub fn get(&self, name: &str) -> Option<&Datastream> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if the stream exists and is fed at inference time.
    pub fn is_available_for_inference(&self, name: &str) -> bool {
        self.0
            .get(name)
            .is_some_and(|stream| stream.available_for_inference)
    }

    /// Mark a stream as available at inference time. Unknown names are left
    /// alone.
    pub fn for_inference(&self, name: &str) -> Self {
        let mut next = self.clone();
        if let Some(stream) = next.0.get_mut(name) {
            stream.available_for_inference = true;
        }
        next
    }

    /// Data declaration for the trainer.
    pub(crate) fn extern_data(&self) -> Config {
        self.0.iter().fold(Config::new(), |acc, (name, stream)| {
            acc.with(name, stream.kind.extern_data(stream.available_for_inference))
        })
    }
}

/// Which utterances of a split are used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segments {
    /// Everything in the underlying data.
    All,
    /// A segment list file, possibly produced by a job.
    File(Artifact),
    /// An explicit list of segment names.
    Listed(Vec<String>),
}

impl Segments {
    /// Partition a listed segment set into at most `parts` contiguous,
    /// order-preserving chunks whose sizes differ by at most one.
    ///
    /// Asking for more parts than segments yields one part per segment.
    pub fn split(&self, parts: usize) -> Result<Vec<Segments>, ConfigError> {
        if parts == 0 {
            return Err(ConfigError::invalid("splits", "must be at least 1"));
        }

        let names = match self {
            Segments::Listed(names) if !names.is_empty() => names,
            Segments::Listed(_) => {
                return Err(ConfigError::invalid("splits", "segment list is empty"));
            }
            _ => {
                return Err(ConfigError::invalid(
                    "splits",
                    "only listed segments can be split in place",
                ));
            }
        };

        let parts = parts.min(names.len());
        let base = names.len() / parts;
        let extra = names.len() % parts;

        let mut acc = Vec::with_capacity(parts);
        let mut start = 0;
        for part in 0..parts {
            let len = base + usize::from(part < extra);
            acc.push(Segments::Listed(names[start..start + len].to_vec()));
            start += len;
        }

        Ok(acc)
    }

    /// Reassemble the parts produced by [`Segments::split`].
    pub fn merge(parts: &[Segments]) -> Result<Segments, ConfigError> {
        let mut names = Vec::new();
        for part in parts {
            match part {
                Segments::Listed(part) => names.extend(part.iter().cloned()),
                _ => {
                    return Err(ConfigError::invalid(
                        "segments",
                        "only listed segments can be merged",
                    ));
                }
            }
        }
        Ok(Segments::Listed(names))
    }

    fn apply(&self, config: Config) -> Config {
        match self {
            Segments::All => config.without("segment_file").without("seq_list"),
            Segments::File(file) => config.with("segment_file", file).without("seq_list"),
            Segments::Listed(names) => config
                .with("seq_list", names.clone())
                .without("segment_file"),
        }
    }
}

/// One split of a dataset (train, cross-validation, forward data).
///
/// A split combines several sources, each an opaque dataset configuration,
/// and maps datastreams to `(source, key)` pairs. The first source controls
/// the sequence order.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    control: String,
    sources: BTreeMap<String, Config>,
    data_map: BTreeMap<String, (String, String)>,
    segments: Segments,
    partition_epoch: u32,
}

impl Split {
    pub fn new(control: impl Into<String>, source: Config) -> Self {
        let control = control.into();
        let mut sources = BTreeMap::new();
        sources.insert(control.clone(), source);

        Self {
            control,
            sources,
            data_map: BTreeMap::new(),
            segments: Segments::All,
            partition_epoch: 1,
        }
    }

    pub fn with_source(&self, name: impl Into<String>, source: Config) -> Self {
        let mut next = self.clone();
        next.sources.insert(name.into(), source);
        next
    }

    pub fn map_stream(
        &self,
        stream: impl Into<String>,
        source: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        let mut next = self.clone();
        next.data_map
            .insert(stream.into(), (source.into(), key.into()));
        next
    }

    pub fn with_segments(&self, segments: Segments) -> Self {
        let mut next = self.clone();
        next.segments = segments;
        next
    }

    /// Use every utterance of the underlying data.
    pub fn without_segment_file(&self) -> Self {
        self.with_segments(Segments::All)
    }

    pub fn with_partition_epoch(&self, partition_epoch: u32) -> Self {
        let mut next = self.clone();
        next.partition_epoch = partition_epoch;
        next
    }

    pub fn segments(&self) -> &Segments {
        &self.segments
    }

    pub fn source(&self, name: &str) -> Option<&Config> {
        self.sources.get(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn maps_stream(&self, stream: &str) -> bool {
        self.data_map.contains_key(stream)
    }

    /// Attach an HDF file as a new source feeding `stream`.
    fn with_hdf(&self, stream: &str, hdf: &Artifact) -> Self {
        let source = Config::new()
            .with("class", "HDFDataset")
            .with("files", vec![hdf.clone()]);

        self.with_source(stream, source).map_stream(stream, stream, "data")
    }

    pub fn to_config(&self) -> Config {
        let sources = self.sources.iter().fold(Config::new(), |acc, (name, source)| {
            let source = if *name == self.control {
                self.segments.apply(source.clone())
            } else {
                source.clone()
            };
            acc.with(name, source)
        });

        let data_map = self
            .data_map
            .iter()
            .fold(Config::new(), |acc, (stream, (source, key))| {
                acc.with(stream, vec![source.as_str(), key.as_str()])
            });

        Config::new()
            .with("class", "MetaDataset")
            .with("datasets", sources)
            .with("data_map", data_map)
            .with("seq_order_control_dataset", self.control.as_str())
            .with("partition_epoch", self.partition_epoch)
    }
}

impl Dependencies for Split {
    fn artifacts(&self) -> Vec<&Artifact> {
        let mut acc: Vec<&Artifact> = self.sources.values().flat_map(Config::artifacts).collect();
        if let Segments::File(file) = &self.segments {
            acc.push(file);
        }
        acc
    }
}

/// Training and cross-validation data sharing one set of datastreams.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingDatasets {
    pub train: Split,
    pub cv: Split,
    pub datastreams: Datastreams,
}

impl TrainingDatasets {
    pub fn new(train: Split, cv: Split, datastreams: Datastreams) -> Self {
        Self {
            train,
            cv,
            datastreams,
        }
    }

    /// Attach a per-utterance HDF stream to both splits.
    pub fn with_hdf_stream(&self, name: &str, stream: Datastream, hdf: &Artifact) -> Self {
        Self {
            train: self.train.with_hdf(name, hdf),
            cv: self.cv.with_hdf(name, hdf),
            datastreams: self.datastreams.with(name, stream),
        }
    }

    pub fn with_pitch(&self, hdf: &Artifact) -> Self {
        self.with_hdf_stream(PITCH, Datastream::new(StreamKind::Pitch, false), hdf)
    }

    pub fn with_energy(&self, hdf: &Artifact) -> Self {
        self.with_hdf_stream(ENERGY, Datastream::new(StreamKind::Energy, false), hdf)
    }

    pub fn with_speaker_embeddings(&self, hdf: &Artifact, dim: u32) -> Self {
        let stream = Datastream::new(StreamKind::SpeakerEmbedding { dim }, true);
        self.with_hdf_stream(SPEAKER_EMBEDDINGS, stream, hdf)
    }

    /// Feed the reference audio at inference time, as variational models
    /// encode it into their latent.
    pub fn with_inference_audio(&self) -> Self {
        Self {
            datastreams: self.datastreams.for_inference(AUDIO_FEATURES),
            ..self.clone()
        }
    }

    /// Forward data over the cross-validation split.
    pub fn cv_forward(&self) -> ForwardDataset {
        ForwardDataset::new(self.cv.clone(), self.datastreams.clone())
    }

    /// Forward data over the training split.
    pub fn train_forward(&self) -> ForwardDataset {
        ForwardDataset::new(self.train.clone(), self.datastreams.clone())
    }
}

impl Dependencies for TrainingDatasets {
    fn artifacts(&self) -> Vec<&Artifact> {
        let mut acc = self.train.artifacts();
        acc.extend(self.cv.artifacts());
        acc
    }
}

/// Data for a forward pass: one split plus its datastreams.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardDataset {
    pub split: Split,
    pub datastreams: Datastreams,
}

impl ForwardDataset {
    pub fn new(split: Split, datastreams: Datastreams) -> Self {
        Self { split, datastreams }
    }

    /// Synthesis data for the text of a corpus.
    ///
    /// Only the label streams of `template` are fed. The acoustic streams are
    /// kept so output dimensions stay known, but marked unavailable. Streams
    /// read from per-utterance HDF files are dropped and have to be attached
    /// again for the new corpus, e.g. with
    /// [`with_speaker_embeddings`](Self::with_speaker_embeddings).
    pub fn inference(corpus: &CorpusObject, template: &Datastreams) -> Self {
        let source = Config::new()
            .with("class", "CorpusTextDataset")
            .with("corpus_file", &corpus.corpus_file);

        let split = Split::new("corpus", source)
            .map_stream(PHONEMES, "corpus", "classes")
            .map_stream(SPEAKER_LABELS, "corpus", "speaker_name");

        let datastreams = template
            .names()
            .filter_map(|name| template.get(name).map(|stream| (name, *stream)))
            .fold(Datastreams::new(), |acc, (name, stream)| {
                let available = matches!(name, PHONEMES | SPEAKER_LABELS);
                acc.with(name, Datastream::new(stream.kind, available))
            })
            .without(DURATIONS)
            .without(PITCH)
            .without(ENERGY)
            .without(SPEAKER_EMBEDDINGS)
            .without(SPEAKER_PRIOR);

        Self { split, datastreams }
    }

    pub fn with_hdf_stream(&self, name: &str, stream: Datastream, hdf: &Artifact) -> Self {
        Self {
            split: self.split.with_hdf(name, hdf),
            datastreams: self.datastreams.with(name, stream),
        }
    }

    /// Feed a stream the split already carries at inference time, such as
    /// the reference durations of a cross-validation split. Streams the
    /// split does not map are left alone.
    pub fn feeding(&self, name: &str) -> Self {
        if !self.split.maps_stream(name) {
            return self.clone();
        }
        Self {
            datastreams: self.datastreams.for_inference(name),
            ..self.clone()
        }
    }

    pub fn with_durations(&self, hdf: &Artifact) -> Self {
        self.with_hdf_stream(DURATIONS, Datastream::new(StreamKind::Durations, true), hdf)
    }

    pub fn with_pitch(&self, hdf: &Artifact) -> Self {
        self.with_hdf_stream(PITCH, Datastream::new(StreamKind::Pitch, true), hdf)
    }

    pub fn with_energy(&self, hdf: &Artifact) -> Self {
        self.with_hdf_stream(ENERGY, Datastream::new(StreamKind::Energy, true), hdf)
    }

    pub fn with_speaker_embeddings(&self, hdf: &Artifact, dim: u32) -> Self {
        let stream = Datastream::new(StreamKind::SpeakerEmbedding { dim }, true);
        self.with_hdf_stream(SPEAKER_EMBEDDINGS, stream, hdf)
    }

    pub fn with_speaker_prior(&self, hdf: &Artifact, dim: u32) -> Self {
        let stream = Datastream::new(StreamKind::SpeakerPrior { dim }, true);
        self.with_hdf_stream(SPEAKER_PRIOR, stream, hdf)
    }

    pub fn with_inference_audio(&self) -> Self {
        Self {
            datastreams: self.datastreams.for_inference(AUDIO_FEATURES),
            ..self.clone()
        }
    }

    pub fn with_segments(&self, segments: Segments) -> Self {
        Self {
            split: self.split.with_segments(segments),
            ..self.clone()
        }
    }

    pub fn without_segment_file(&self) -> Self {
        self.with_segments(Segments::All)
    }
}

impl Dependencies for ForwardDataset {
    fn artifacts(&self) -> Vec<&Artifact> {
        self.split.artifacts()
    }
}

/// An audio archive with transcriptions and speaker names, before any
/// alignment exists.
///
/// This is what an aligner is trained on. Once durations are known,
/// [`with_durations`](Self::with_durations) turns it into [`TtsData`].
#[derive(Debug, Clone)]
pub struct TtsCorpus {
    pub audio_zip: Artifact,
    pub train_segments: Segments,
    pub cv_segments: Segments,
    pub feature_dim: u32,
    pub phoneme_inventory: u32,
    pub num_speakers: u32,
}

impl TtsCorpus {
    /// Train and cross-validation data without a durations stream.
    pub fn build(&self) -> TrainingDatasets {
        let audio = Config::new()
            .with("class", "OggZipDataset")
            .with("path", vec![self.audio_zip.clone()])
            .with("audio.features", "log_mel")
            .with("audio.num_feature_filters", self.feature_dim);

        let split = Split::new("audio", audio)
            .map_stream(AUDIO_FEATURES, "audio", "data")
            .map_stream(PHONEMES, "audio", "classes")
            .map_stream(SPEAKER_LABELS, "audio", "speaker_name");

        let datastreams = Datastreams::new()
            .with(
                AUDIO_FEATURES,
                Datastream::new(StreamKind::Features { dim: self.feature_dim }, false),
            )
            .with(
                PHONEMES,
                Datastream::new(StreamKind::Labels { vocab_size: self.phoneme_inventory }, true),
            )
            .with(
                SPEAKER_LABELS,
                Datastream::new(StreamKind::Labels { vocab_size: self.num_speakers }, true),
            );

        TrainingDatasets {
            train: split
                .with_segments(self.train_segments.clone())
                .with_partition_epoch(1),
            cv: split.with_segments(self.cv_segments.clone()),
            datastreams,
        }
    }

    /// Attach durations, usually produced by an aligner on this corpus.
    pub fn with_durations(&self, durations: &Artifact) -> TtsData {
        TtsData {
            audio_zip: self.audio_zip.clone(),
            durations: durations.clone(),
            train_segments: self.train_segments.clone(),
            cv_segments: self.cv_segments.clone(),
            feature_dim: self.feature_dim,
            phoneme_inventory: self.phoneme_inventory,
            num_speakers: self.num_speakers,
        }
    }
}

/// The usual TTS setup: an audio archive with transcriptions and speaker
/// names, plus phoneme durations from an aligner.
#[derive(Debug, Clone)]
pub struct TtsData {
    pub audio_zip: Artifact,
    pub durations: Artifact,
    pub train_segments: Segments,
    pub cv_segments: Segments,
    pub feature_dim: u32,
    pub phoneme_inventory: u32,
    pub num_speakers: u32,
}

impl TtsData {
    pub fn corpus(&self) -> TtsCorpus {
        TtsCorpus {
            audio_zip: self.audio_zip.clone(),
            train_segments: self.train_segments.clone(),
            cv_segments: self.cv_segments.clone(),
            feature_dim: self.feature_dim,
            phoneme_inventory: self.phoneme_inventory,
            num_speakers: self.num_speakers,
        }
    }

    pub fn build(&self) -> TrainingDatasets {
        self.corpus().build().with_hdf_stream(
            DURATIONS,
            Datastream::new(StreamKind::Durations, false),
            &self.durations,
        )
    }
}

/// Audio container format of a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Ogg,
    Flac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wav" => Ok(AudioFormat::Wav),
            "ogg" => Ok(AudioFormat::Ogg),
            "flac" => Ok(AudioFormat::Flac),
            other => Err(ConfigError::invalid("audio_format", other)),
        }
    }
}

/// A corpus as returned by a [`CorpusLibrary`].
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusObject {
    pub name: String,
    pub corpus_file: Artifact,
    pub audio_dir: Artifact,
    pub audio_format: AudioFormat,
    pub duration_hours: f64,
}

impl From<&CorpusObject> for Value {
    fn from(corpus: &CorpusObject) -> Self {
        Config::new()
            .with("name", corpus.name.as_str())
            .with("corpus_file", &corpus.corpus_file)
            .with("audio_dir", &corpus.audio_dir)
            .with("audio_format", corpus.audio_format.as_str())
            .with("duration", corpus.duration_hours)
            .into()
    }
}

/// Resolves corpus identifiers into corpus objects.
pub trait CorpusLibrary {
    fn corpus(&self, name: &str, format: AudioFormat) -> Result<CorpusObject, ConfigError>;
}

/// A prepared corpus on disk, in one or more audio formats.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorpusEntry {
    pub corpus_file: Utf8PathBuf,
    pub audio: BTreeMap<AudioFormat, Utf8PathBuf>,
    #[serde(default)]
    pub duration_hours: f64,
}

/// In-memory [`CorpusLibrary`], usually loaded from settings.
#[derive(Debug, Clone, Default)]
pub struct CorpusRegistry {
    corpora: BTreeMap<String, CorpusEntry>,
}

impl CorpusRegistry {
    pub fn new(corpora: BTreeMap<String, CorpusEntry>) -> Self {
        Self { corpora }
    }
}

impl CorpusLibrary for CorpusRegistry {
    fn corpus(&self, name: &str, format: AudioFormat) -> Result<CorpusObject, ConfigError> {
        let entry = self
            .corpora
            .get(name)
            .ok_or_else(|| ConfigError::UnknownCorpus(name.to_string()))?;

        let audio = entry
            .audio
            .get(&format)
            .ok_or_else(|| ConfigError::UnknownCorpus(format!("{name} ({})", format.as_str())))?;

        Ok(CorpusObject {
            name: name.to_string(),
            corpus_file: Artifact::external(entry.corpus_file.clone()),
            audio_dir: Artifact::external(audio.clone()),
            audio_format: format,
            duration_hours: entry.duration_hours,
        })
    }
}
