use camino::Utf8PathBuf;
use kumitate::alignment::AlignerOptions;
use kumitate::dataset::{
    AudioFormat, CorpusLibrary, ForwardDataset, Segments, TrainingDatasets, TtsCorpus, TtsData,
};
use kumitate::pipeline::{AsrSystem, Vocoder};
use kumitate::training::forward::{ForwardConfig, ForwardOptions, OUTPUT_HDF};
use kumitate::training::{ModelOptions, TrainingConfig, TrainingOptions};
use kumitate::{
    Artifact, Blueprint, ConfigError, DirectoryEngine, Engine, Experiment, GraphError,
    KumitateError, Plan, Settings, Toolchain,
};

fn toolchain() -> Toolchain {
    Toolchain {
        trainer_exe: Artifact::external("/bin/launcher.sh").with_hash_overwrite("LAUNCHER"),
        trainer_root: Artifact::external("/src/trainer"),
        network_lib_root: Artifact::external("/src/network_lib"),
    }
}

fn tts_data(segments: Segments) -> TrainingDatasets {
    TtsData {
        audio_zip: Artifact::external("/data/train-clean-100.ogg.zip"),
        durations: Artifact::external("/data/durations.hdf"),
        train_segments: segments,
        cv_segments: Segments::File(Artifact::external("/data/cv.segments")),
        feature_dim: 80,
        phoneme_inventory: 44,
        num_speakers: 251,
    }
    .build()
}

fn listed(n: usize) -> Segments {
    Segments::Listed((0..n).map(|i| format!("train-clean-100/{i}")).collect())
}

fn vocoder() -> Vocoder {
    Vocoder::griffin_lim(Artifact::external("/models/gl.pt"))
}

fn asr() -> AsrSystem {
    AsrSystem::new(Artifact::external("/asr/trafo.config"))
}

/// A baseline with a synthesized corpus and a GL-SWER report.
fn baseline(blueprint: &mut Blueprint, model: ModelOptions) -> Result<(), KumitateError> {
    let options = TrainingOptions {
        model,
        num_epochs: 10,
        keep_epochs: [5].into(),
        ..Default::default()
    };

    let trained = Experiment::new("tts/baseline", toolchain())
        .with_datasets(tts_data(listed(12)))
        .train(blueprint, &options)?;
    trained.register(blueprint)?;

    let cv = trained.prepare_forward(trained.datasets().cv_forward(), ForwardOptions::default())?;
    cv.gl_swer(blueprint, &vocoder(), &asr())?;

    trained
        .prepare_forward(trained.datasets().train_forward(), ForwardOptions::default())?
        .synthesize(
            blueprint,
            4,
            &vocoder(),
            &Artifact::external("/corpora/train-clean-100.xml.gz"),
        )?
        .register(blueprint, "synthetic")?;

    Ok(())
}

#[test]
fn test_same_inputs_same_plan() {
    let mut a = Blueprint::new();
    let mut b = Blueprint::new();
    baseline(&mut a, ModelOptions::default()).unwrap();
    baseline(&mut b, ModelOptions::default()).unwrap();

    let a = a.finish().unwrap();
    let b = b.finish().unwrap();

    let ids = |plan: &Plan| {
        plan.jobs()
            .iter()
            .map(|job| job.identity())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&a), ids(&b));
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn test_model_change_changes_training_identity() {
    let mut a = Blueprint::new();
    let mut b = Blueprint::new();
    baseline(&mut a, ModelOptions::default()).unwrap();
    baseline(
        &mut b,
        ModelOptions {
            gauss_up: true,
            ..Default::default()
        },
    )
    .unwrap();

    let training = |blueprint: &Blueprint| {
        blueprint
            .jobs()
            .find(|job| job.kind() == "Training")
            .map(|job| job.identity())
            .unwrap()
    };
    assert_ne!(training(&a), training(&b));
}

#[test]
fn test_shared_prefix_is_deduplicated() {
    let mut blueprint = Blueprint::new();
    baseline(&mut blueprint, ModelOptions::default()).unwrap();
    let before = blueprint.len();

    // Same experiment again, only the registered outputs are idempotent.
    let trained = Experiment::new("tts/baseline", toolchain())
        .with_datasets(tts_data(listed(12)))
        .train(
            &mut blueprint,
            &TrainingOptions {
                num_epochs: 10,
                keep_epochs: [5].into(),
                ..Default::default()
            },
        )
        .unwrap();
    trained.register(&mut blueprint).unwrap();

    assert_eq!(blueprint.len(), before);
}

#[test]
fn test_embedding_size_reaches_every_section() {
    let model = ModelOptions {
        embedding_size: 384,
        use_pitch_pred: true,
        use_energy_pred: true,
        gauss_up: true,
        ..Default::default()
    };
    let datasets = tts_data(listed(4))
        .with_pitch(&Artifact::external("/data/pitch.hdf"))
        .with_energy(&Artifact::external("/data/energy.hdf"));
    let options = TrainingOptions {
        model,
        ..Default::default()
    };

    let config = TrainingConfig::build(&datasets, &options).unwrap();
    let paths: Vec<_> = config
        .paths()
        .into_iter()
        .filter(|path| path.starts_with("network.") && path.ends_with(".embedding_dim"))
        .collect();

    // embedding, encoder, durations, upsampling, decoder, speakers, pitch, energy
    assert_eq!(paths.len(), 8);
    for path in paths {
        assert_eq!(config.get_int(&path).unwrap(), 384, "{path}");
    }
}

#[test]
fn test_no_option_is_dropped() {
    let options = ForwardOptions {
        dump_durations: true,
        use_true_durations: true,
        ..Default::default()
    };
    let cv = tts_data(listed(4)).cv_forward();
    assert!(ForwardConfig::build(&cv, &options).is_err());

    let config = ForwardConfig::build(&cv.feeding("durations"), &options).unwrap();

    for flag in [
        "calc_speaker_embedding",
        "dump_durations",
        "dump_vae_prior",
        "use_true_durations",
        "use_audio_data",
        "use_calculated_prior",
        "pitch_cheat",
        "energy_cheat",
    ] {
        assert!(config.contains(&format!("network.kwargs.{flag}")), "{flag}");
    }
    for field in ["embedding_size", "enc_lstm_size", "dec_lstm_size", "kl_beta", "dropout"] {
        assert!(config.contains(&format!("network.kwargs.{field}")), "{field}");
    }
    assert!(config.get_bool("network.kwargs.dump_durations").unwrap());
}

#[test]
fn test_extending_datasets_leaves_original_alone() {
    let datasets = tts_data(listed(4));
    let extended = datasets.with_pitch(&Artifact::external("/data/pitch.hdf"));

    assert!(!datasets.datastreams.contains("pitch"));
    assert!(extended.datastreams.contains("pitch"));
    assert!(!datasets.train.maps_stream("pitch"));

    let cv = datasets.cv_forward();
    let narrowed = cv.with_segments(listed(2));
    assert_eq!(cv.split.segments(), &Segments::File(Artifact::external("/data/cv.segments")));
    assert_eq!(narrowed.split.segments(), &listed(2));
}

#[test]
fn test_split_then_merge_restores_segments() {
    let segments = listed(11);
    let parts = segments.split(4).unwrap();
    assert_eq!(parts.len(), 4);
    assert_eq!(Segments::merge(&parts).unwrap(), segments);

    assert_eq!(segments.split(50).unwrap().len(), 11);
    assert!(segments.split(0).is_err());
    assert!(Segments::All.split(2).is_err());
}

#[test]
fn test_invalid_combinations_are_rejected() {
    let mut options = ForwardOptions {
        calc_speaker_embedding: true,
        ..Default::default()
    };
    options.model.skip_speaker_embeddings = true;

    let result = ForwardConfig::build(&tts_data(listed(4)).cv_forward(), &options);
    assert!(matches!(result, Err(ConfigError::Conflict("calc_speaker_embedding", _))));

    let vae = TrainingOptions {
        model: ModelOptions {
            use_vae: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut blueprint = Blueprint::new();
    let result = Experiment::new("tts/vae", toolchain())
        .with_datasets(tts_data(listed(4)))
        .train(&mut blueprint, &vae);
    assert!(matches!(result, Err(KumitateError::Config(ConfigError::Conflict("use_vae", _)))));
    assert!(blueprint.is_empty());

    let ok = Experiment::new("tts/vae", toolchain())
        .with_datasets(tts_data(listed(4)).with_inference_audio())
        .train(&mut blueprint, &vae);
    assert!(ok.is_ok());
}

#[test]
fn test_duplicate_output_name() {
    let mut blueprint = Blueprint::new();
    let trained = Experiment::new("tts/baseline", toolchain())
        .with_datasets(tts_data(listed(4)))
        .train(
            &mut blueprint,
            &TrainingOptions {
                num_epochs: 4,
                keep_epochs: [2].into(),
                ..Default::default()
            },
        )
        .unwrap();

    let last = trained.checkpoint().unwrap();
    let early = trained.checkpoint_at(2).unwrap();
    assert!(trained.checkpoint_at(3).is_err());

    blueprint.register_output("model", last.artifact()).unwrap();
    blueprint.register_output("model", last.artifact()).unwrap();
    assert_eq!(
        blueprint.register_output("model", early.artifact()),
        Err(GraphError::DuplicateOutput("model".into()))
    );
}

#[test]
fn test_segment_file_is_split_by_a_job() {
    let mut blueprint = Blueprint::new();
    let trained = Experiment::new("tts/baseline", toolchain())
        .with_datasets(tts_data(Segments::File(Artifact::external("/data/train.segments"))))
        .train(&mut blueprint, &TrainingOptions::default())
        .unwrap();

    let split = blueprint
        .forward_with_splits(
            "tts/baseline/synthesis",
            &trained.checkpoint().unwrap(),
            &trained.datasets().train_forward(),
            &ForwardOptions::default(),
            3,
            &toolchain(),
        )
        .unwrap();

    assert_eq!(split.parts.len(), 3);
    assert!(split.merged(OUTPUT_HDF).is_ok());
    assert!(split.merged("durations.hdf").is_err());

    let kinds: Vec<_> = blueprint.jobs().map(|job| job.kind()).collect();
    assert_eq!(kinds.iter().filter(|&&kind| kind == "SplitSegments").count(), 1);
    assert_eq!(kinds.iter().filter(|&&kind| kind == "Forward").count(), 3);
    assert_eq!(kinds.iter().filter(|&&kind| kind == "MergeHdf").count(), 1);
}

#[test]
fn test_foreign_checkpoint_is_rejected() {
    let mut other = Blueprint::new();
    let trained = Experiment::new("tts/baseline", toolchain())
        .with_datasets(tts_data(listed(4)))
        .train(&mut other, &TrainingOptions::default())
        .unwrap();

    let mut blueprint = Blueprint::new();
    blueprint
        .register_output("x", &Artifact::external("/data/durations.hdf"))
        .unwrap();

    let result = blueprint.register_output("model", trained.checkpoint().unwrap().artifact());
    assert!(matches!(result, Err(GraphError::ForeignArtifact(_))));
}

#[test]
fn test_plan_is_written_in_dependency_order() {
    let mut blueprint = Blueprint::new();
    baseline(&mut blueprint, ModelOptions::default()).unwrap();

    let mermaid = blueprint.to_string();
    assert!(mermaid.starts_with("graph LR"));
    assert!(mermaid.contains("\"tts/baseline/model\" --> Output"));

    let plan = blueprint.finish().unwrap();
    for (position, job) in plan.jobs().iter().enumerate() {
        for dependency in job.dependencies() {
            let before = plan.jobs()[..position]
                .iter()
                .any(|job| job.identity() == *dependency);
            assert!(before, "{:?} before its dependency", job.alias());
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    DirectoryEngine::new(root.clone()).submit(&plan).unwrap();

    for job in plan.jobs() {
        assert!(root.join(job.directory()).join("config.json").is_file());
    }

    let outputs: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(root.join("outputs.json")).unwrap()).unwrap();
    assert!(outputs.get("tts/baseline/model").is_some());
    assert!(outputs.get("tts/baseline/synthetic/corpus.xml.gz").is_some());
    assert!(outputs.get("tts/baseline/gl_swer/swer.report").is_some());
}

const SETTINGS: &str = r#"{
    "work_dir": "/work/tts",
    "trainer_exe": { "path": "/u/me/bin/launcher.sh", "hash_overwrite": "LAUNCHER" },
    "repositories": {
        "trainer": { "url": "https://github.com/example/trainer", "revision": "240f119b" },
        "network_lib": {
            "url": "https://github.com/example/network_lib",
            "revision": "79876b18",
            "checkout_folder_name": "network_lib"
        }
    },
    "corpora": {
        "dev-clean": {
            "corpus_file": "/corpora/dev-clean.xml.gz",
            "audio": { "ogg": "/corpora/dev-clean/ogg" }
        }
    }
}"#;

#[test]
fn test_pinned_pipeline_uses_embedding_size_everywhere() {
    let settings = Settings::from_json(SETTINGS).unwrap();
    let mut blueprint = Blueprint::new();
    let toolchain = settings.toolchain(&mut blueprint).unwrap();

    let corpus = TtsCorpus {
        audio_zip: Artifact::external("/data/train-clean-100.ogg.zip"),
        train_segments: listed(12),
        cv_segments: Segments::File(Artifact::external("/data/cv.segments")),
        feature_dim: 80,
        phoneme_inventory: 44,
        num_speakers: 251,
    };
    let durations = blueprint
        .align("tts/pinned", &corpus.build(), &AlignerOptions::default(), &toolchain)
        .unwrap();

    let options = TrainingOptions {
        num_epochs: 10,
        ..Default::default()
    };
    assert_eq!(options.model.embedding_size, 256);

    let trained = Experiment::new("tts/pinned", toolchain)
        .with_datasets(corpus.with_durations(&durations).build())
        .train(&mut blueprint, &options)
        .unwrap();

    let dev = settings
        .corpus_registry()
        .corpus("dev-clean", AudioFormat::Ogg)
        .unwrap();
    let synthesis = ForwardDataset::inference(&dev, &trained.datasets().datastreams);
    trained
        .prepare_forward(synthesis, ForwardOptions::default())
        .unwrap()
        .forward(&mut blueprint)
        .unwrap();

    let plan = blueprint.finish().unwrap();

    let clones: Vec<_> = plan
        .jobs()
        .iter()
        .filter(|job| job.kind() == "CloneRepository")
        .collect();
    assert_eq!(clones.len(), 2);
    assert!(clones
        .iter()
        .any(|job| job.config().get_str("revision").is_ok_and(|rev| rev == "240f119b")));

    let tts_jobs: Vec<_> = plan
        .jobs()
        .iter()
        .filter(|job| {
            job.config()
                .get_str("trainer_config.network.class")
                .is_ok_and(|class| class == "NarTtsModel")
        })
        .collect();
    let kinds: Vec<_> = tts_jobs.iter().map(|job| job.kind()).collect();
    assert_eq!(kinds, ["Training", "Forward"]);

    for job in tts_jobs {
        for clone in &clones {
            assert!(job.dependencies().contains(&clone.identity()));
        }

        let config = job.config();
        let paths: Vec<_> = config
            .paths()
            .into_iter()
            .filter(|path| path.starts_with("trainer_config.network."))
            .filter(|path| path.ends_with(".embedding_dim") || path.ends_with(".embedding_size"))
            .collect();

        // embedding, encoder, durations, upsampling, decoder, speakers, kwargs
        assert_eq!(paths.len(), 7, "{}", job.kind());
        for path in paths {
            assert_eq!(config.get_int(&path).unwrap(), 256, "{path}");
        }
    }
}
