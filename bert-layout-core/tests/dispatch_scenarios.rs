//! End-to-end dispatch scenarios against the in-process backend.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use bert_layout_core::backend::{BackendCall, MockBackend};
use bert_layout_core::config::{Conditioning, ExperimentConfig, families};
use bert_layout_core::dispatch::{DispatchState, RunDispatcher, RunOutcome, RunRequest};
use bert_layout_core::error::{DispatchError, LayoutError, TrainerError};
use bert_layout_core::platform::{ArtifactKind, LocalWorkUnit};
use bert_layout_core::render::{JsonLayoutRenderer, LayoutRenderer, RenderRequest, SampleKind};
use bert_layout_core::trainers::{Trainer, TrainerContext, TrainerRegistry};
use bert_layout_core::training::{METRICS_FILE, TrainingMetrics};
use bert_layout_core::types::{LayoutSequence, SampleOutput, SampleRequest};

#[derive(Default)]
struct RecordingRenderer {
    requests: Mutex<Vec<RenderRequest>>,
}

impl RecordingRenderer {
    fn labels(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.label.clone())
            .collect()
    }
}

impl LayoutRenderer for RecordingRenderer {
    fn render(&self, request: &RenderRequest) -> Result<(), LayoutError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Trainer that only counts calls.
struct CountingTrainer {
    trains: Arc<Mutex<u32>>,
}

#[async_trait]
impl Trainer for CountingTrainer {
    fn name(&self) -> &str {
        "CountingTrainer"
    }

    async fn train(&self) -> Result<TrainingMetrics, TrainerError> {
        *self.trains.lock().unwrap() += 1;
        Ok(TrainingMetrics::default())
    }

    async fn sample(&self, request: &SampleRequest) -> Result<SampleOutput, TrainerError> {
        Ok(SampleOutput {
            generated: vec![vec![]],
            real: vec![LayoutSequence(vec![request.idx as i64])],
            image_link: None,
        })
    }
}

fn small_config(base: ExperimentConfig) -> ExperimentConfig {
    ExperimentConfig {
        num_train_steps: 6,
        log_every_steps: 2,
        eval_every_steps: 3,
        checkpoint_every_steps: 3,
        num_eval_steps: 1,
        ..base
    }
}

fn lines(input: &[&str]) -> VecDeque<String> {
    input.iter().map(|s| s.to_string()).collect()
}

struct Harness {
    backend: Arc<MockBackend>,
    renderer: Arc<RecordingRenderer>,
    work_unit: Arc<LocalWorkUnit>,
}

impl Harness {
    fn new(workdir: &Path) -> Self {
        std::fs::create_dir_all(workdir).unwrap();
        Self {
            backend: Arc::new(MockBackend::new()),
            renderer: Arc::new(RecordingRenderer::default()),
            work_unit: Arc::new(LocalWorkUnit::open(workdir).unwrap()),
        }
    }

    fn dispatcher(&self, registry: TrainerRegistry) -> RunDispatcher {
        RunDispatcher::new(
            registry,
            self.backend.clone(),
            self.work_unit.clone(),
            self.renderer.clone(),
        )
    }
}

#[tokio::test]
async fn bert_layout_train_runs_training_once() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("run1");
    let harness = Harness::new(&workdir);
    let request = RunRequest::new(
        small_config(families::bert_layout_categorized()),
        &workdir,
        "train",
    );

    let outcome = harness
        .dispatcher(TrainerRegistry::with_defaults())
        .run(&request, &mut lines(&["5"]))
        .await
        .unwrap();

    let RunOutcome::Trained(metrics) = outcome else {
        panic!("expected training outcome");
    };
    assert_eq!(metrics.steps_completed, 6);
    assert_eq!(harness.backend.train_steps(), vec![0, 1, 2, 3, 4, 5]);

    let calls = harness.backend.calls();
    let initializations = calls
        .iter()
        .filter(|c| matches!(c, BackendCall::Initialize(_)))
        .count();
    assert_eq!(initializations, 1);
    assert!(!calls.iter().any(|c| matches!(c, BackendCall::Sample(_))));
    assert!(harness.renderer.labels().is_empty());

    assert!(workdir.join(METRICS_FILE).exists());
    let record = harness.work_unit.record();
    assert_eq!(record.status.as_deref(), Some("process_index: 0, process_count: 1"));
    assert_eq!(record.artifacts[0].kind, ArtifactKind::Directory);
    assert_eq!(record.artifacts[0].name, "workdir");
}

#[tokio::test]
async fn train_mode_invokes_selected_trainer_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let trains = Arc::new(Mutex::new(0));
    let mut registry = TrainerRegistry::new();
    let counter = trains.clone();
    registry
        .register("bert_layout", move |_ctx: TrainerContext| {
            Ok(Box::new(CountingTrainer {
                trains: counter.clone(),
            }) as Box<dyn Trainer>)
        })
        .unwrap();

    let request = RunRequest::new(ExperimentConfig::default(), dir.path(), "train");
    harness
        .dispatcher(registry)
        .run(&request, &mut lines(&[]))
        .await
        .unwrap();
    assert_eq!(*trains.lock().unwrap(), 1);
}

#[tokio::test]
async fn unknown_model_fails_without_training_or_sampling() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let request = RunRequest::new(
        ExperimentConfig {
            model_class: "unknown_model".into(),
            ..ExperimentConfig::default()
        },
        dir.path(),
        "test",
    );

    let mut dispatcher = harness.dispatcher(TrainerRegistry::with_defaults());
    let mut input = lines(&["5", "-1"]);
    let err = dispatcher.run(&request, &mut input).await.unwrap_err();

    assert!(matches!(
        err,
        LayoutError::Dispatch(DispatchError::UnsupportedModel { ref model_class })
            if model_class == "unknown_model"
    ));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(
        harness.backend.calls(),
        vec![BackendCall::RestrictInputPipelineDevices, BackendCall::Topology]
    );
    // No prompt was consumed.
    assert_eq!(input.len(), 2);
    assert_eq!(dispatcher.state(), DispatchState::Terminated);
}

#[tokio::test]
async fn unsupported_mode_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let request = RunRequest::new(ExperimentConfig::default(), dir.path(), "eval");

    let err = harness
        .dispatcher(TrainerRegistry::with_defaults())
        .run(&request, &mut lines(&[]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LayoutError::Dispatch(DispatchError::UnsupportedMode { ref mode }) if mode == "eval"
    ));
    assert!(harness.backend.calls().is_empty());
    assert!(harness.work_unit.record().artifacts.is_empty());
}

#[tokio::test]
async fn test_mode_samples_one_index_then_quits() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("run1");
    let harness = Harness::new(&workdir);
    let request = RunRequest::new(families::bert_layout_categorized(), &workdir, "test");

    let mut input = lines(&["5", "-1", "7"]);
    let outcome = harness
        .dispatcher(TrainerRegistry::with_defaults())
        .run(&request, &mut input)
        .await
        .unwrap();

    let RunOutcome::Sampled(summary) = outcome else {
        panic!("expected sampling outcome");
    };
    assert_eq!(summary.sampled, vec![5]);
    // Nothing after the quit index is read.
    assert_eq!(input, lines(&["7"]));

    let samples: Vec<SampleRequest> = harness
        .backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            BackendCall::Sample(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(
        samples,
        vec![SampleRequest {
            conditional: Conditioning::AttributeSize,
            iterative_nums: vec![22, 22, 22],
            idx: 5,
        }]
    );

    let rendered = harness.renderer.requests.lock().unwrap().clone();
    assert_eq!(harness.renderer.labels(), vec!["infer5_run1", "real5_run1"]);
    assert_eq!(rendered[0].kind, SampleKind::Inferred);
    assert_eq!(rendered[0].data.tokens(), &[5, 22, 66]);
    assert_eq!(rendered[1].kind, SampleKind::Real);
    assert_eq!(rendered[1].data.tokens(), &[5]);
    assert_eq!((rendered[0].border_size, rendered[0].thickness), (1, 6));
    assert_eq!(rendered[0].image_link.as_deref(), Some("images/5.png"));
}

#[tokio::test]
async fn invalid_input_reprompts() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("run1");
    let harness = Harness::new(&workdir);
    let request = RunRequest::new(families::bert_layout_categorized(), &workdir, "test");

    let outcome = harness
        .dispatcher(TrainerRegistry::with_defaults())
        .run(&request, &mut lines(&["abc", "", "-3", "2", "4"]))
        .await
        .unwrap();

    let RunOutcome::Sampled(summary) = outcome else {
        panic!("expected sampling outcome");
    };
    // End of input also ends the loop.
    assert_eq!(summary.sampled, vec![2, 4]);
    assert_eq!(summary.invalid_inputs, 3);
    assert_eq!(
        harness.renderer.labels(),
        vec!["infer2_run1", "real2_run1", "infer4_run1", "real4_run1"]
    );
}

#[tokio::test]
async fn transformer_sampling_uses_single_pass() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("baseline");
    let harness = Harness::new(&workdir);
    let mut config = families::transformer_categorized();
    config.sampling.iterative_nums = vec![10, 20];
    let request = RunRequest::new(config, &workdir, "test");

    harness
        .dispatcher(TrainerRegistry::with_defaults())
        .run(&request, &mut lines(&["3"]))
        .await
        .unwrap();

    assert!(harness.backend.calls().iter().any(|c| matches!(
        c,
        BackendCall::Sample(r) if r.iterative_nums == vec![30] && r.idx == 3
    )));
    assert_eq!(harness.renderer.labels(), vec!["infer3_baseline", "real3_baseline"]);
}

#[tokio::test]
async fn empty_generation_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let mut registry = TrainerRegistry::new();
    registry
        .register("bert_layout", |_ctx: TrainerContext| {
            Ok(Box::new(CountingTrainer {
                trains: Arc::new(Mutex::new(0)),
            }) as Box<dyn Trainer>)
        })
        .unwrap();
    let request = RunRequest::new(ExperimentConfig::default(), dir.path(), "test");

    let err = harness
        .dispatcher(registry)
        .run(&request, &mut lines(&["1"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LayoutError::Trainer(TrainerError::EmptySample { idx: 1, .. })
    ));
    assert!(harness.renderer.labels().is_empty());
}

#[tokio::test]
async fn json_renderer_writes_sample_files() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("run1");
    let harness = Harness::new(&workdir);
    let mut dispatcher = RunDispatcher::new(
        TrainerRegistry::with_defaults(),
        harness.backend.clone(),
        harness.work_unit.clone(),
        Arc::new(JsonLayoutRenderer::in_workdir(&workdir)),
    );
    let request = RunRequest::new(families::bert_layout_categorized(), &workdir, "test");

    dispatcher.run(&request, &mut lines(&["8", "-1"])).await.unwrap();

    assert!(workdir.join("samples").join("infer8_run1.json").exists());
    assert!(workdir.join("samples").join("real8_run1.json").exists());
}

#[tokio::test]
async fn selection_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let dispatcher = harness.dispatcher(TrainerRegistry::with_defaults());
    for (model_class, expected) in [
        ("bert_layout", "BertLayoutTrainer"),
        ("transformer", "TransformerTrainer"),
    ] {
        let request = RunRequest::new(
            ExperimentConfig {
                model_class: model_class.into(),
                ..ExperimentConfig::default()
            },
            dir.path(),
            "train",
        );
        for _ in 0..3 {
            let trainer = dispatcher.select_trainer(&request).unwrap();
            assert_eq!(trainer.name(), expected);
        }
    }
}
