use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use node_forge_composer::{
    bake::{
        BakeConfig, BakeJob, BakeScheduler, BakeState, JobOutcome, ShaderCompiler, TargetConfig,
    },
    composer::types::ShaderStage,
    composition::{
        CompositionDocument, CompositionNode,
        uniform::{UniformData, UniformKind, UniformValue},
    },
    diagnostics::DiagnosticCategory,
    library::MemoryLibrary,
};

/// Writes a marker artifact per job and counts invocations.
#[derive(Default)]
struct FakeCompiler {
    calls: AtomicUsize,
    ready: bool,
    fail_stage: Option<ShaderStage>,
    /// The first `n` jobs fail regardless of stage.
    failures_left: AtomicUsize,
    /// Failing jobs still write their artifact.
    partial_output: bool,
    delay: Duration,
}

impl FakeCompiler {
    fn ready() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShaderCompiler for FakeCompiler {
    fn name(&self) -> &str {
        "fake"
    }

    fn check_ready(&self) -> Result<()> {
        if !self.ready {
            bail!("fake compiler executable not found");
        }
        Ok(())
    }

    fn compile(&self, job: &BakeJob) -> JobOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let transient = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let failing = transient || self.fail_stage == Some(job.stage);
        if failing && !self.partial_output {
            return JobOutcome::failed(job, "ERROR: 0:12: 'nope' : undeclared identifier");
        }
        let source = std::fs::read_to_string(&job.source_path).unwrap_or_default();
        match std::fs::write(&job.output_path, format!("baked {} bytes", source.len())) {
            Ok(()) if failing => {
                JobOutcome::failed(job, "ERROR: 0:12: 'nope' : undeclared identifier")
            }
            Ok(()) => JobOutcome::succeeded(job, None),
            Err(e) => JobOutcome::failed(job, e.to_string()),
        }
    }
}

fn scratch(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nfc-bake-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config(tag: &str) -> BakeConfig {
    let root = scratch(tag);
    let mut config = BakeConfig::new(root.join("out"));
    config.effect_name = "ripple".into();
    config.debounce_ms = 100;
    config.temp_root = Some(root.join("tmp"));
    config
}

fn document() -> CompositionDocument {
    let mut node = CompositionNode::new("Tint");
    node.set_code(ShaderStage::Fragment, "@main\nfragColor = vec4(amount);");
    node.uniforms.push(UniformValue::new("amount", UniformKind::Float));
    let mut doc = CompositionDocument::new();
    doc.add_node(node, &MemoryLibrary::new())
        .unwrap_or_else(|e| panic!("add node: {e:#}"));
    doc
}

fn scheduler(config: BakeConfig, compiler: &Arc<FakeCompiler>) -> BakeScheduler {
    let compiler: Arc<dyn ShaderCompiler> = compiler.clone();
    BakeScheduler::new(config, compiler)
}

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn unchanged_document_spawns_one_job_set() {
    let compiler = Arc::new(FakeCompiler::ready());
    let config = config("unchanged");
    let out_dir = config.primary.output_dir.clone();
    let mut sched = scheduler(config, &compiler);
    let mut doc = document();

    assert!(sched.build_now(&mut doc));
    assert!(sched.wait_for_completion(WAIT));
    assert_eq!(sched.state(), BakeState::UpToDate);

    assert!(!sched.build_now(&mut doc));
    assert_eq!(sched.state(), BakeState::UpToDate);
    assert_eq!(compiler.calls(), 2);
    assert_eq!(sched.builds_dispatched(), 1);

    assert!(out_dir.join("ripple.vert.qsb").is_file());
    assert!(out_dir.join("ripple.frag.qsb").is_file());
}

#[test]
fn edits_within_debounce_interval_build_once() {
    let compiler = Arc::new(FakeCompiler::ready());
    let mut sched = scheduler(config("debounce"), &compiler);
    let mut doc = document();
    sched.attach(&mut doc);

    let t0 = Instant::now();
    for i in 0..5u64 {
        doc.set_uniform_value(0, "amount", UniformData::Float(i as f32 * 0.1))
            .unwrap();
        sched.poll(&mut doc, t0 + Duration::from_millis(i * 10));
        assert_eq!(sched.state(), BakeState::PendingRebuild);
    }
    let last_edit = t0 + Duration::from_millis(40);

    sched.poll(&mut doc, last_edit + Duration::from_millis(99));
    assert_eq!(sched.builds_dispatched(), 0);

    sched.poll(&mut doc, last_edit + Duration::from_millis(100));
    assert_eq!(sched.builds_dispatched(), 1);
    assert!(sched.wait_for_completion(WAIT));

    sched.poll(&mut doc, last_edit + Duration::from_millis(1000));
    assert_eq!(sched.builds_dispatched(), 1);
    assert_eq!(compiler.calls(), 2);
    assert_eq!(sched.state(), BakeState::UpToDate);
}

#[test]
fn missing_compiler_fails_before_spawning() {
    let compiler = Arc::new(FakeCompiler::default());
    let config = config("not-ready");
    let out_dir = config.primary.output_dir.clone();
    let mut sched = scheduler(config, &compiler);
    let mut doc = document();

    assert!(!sched.build_now(&mut doc));
    assert_eq!(sched.state(), BakeState::Failed);
    assert_eq!(compiler.calls(), 0);
    assert_eq!(sched.builds_dispatched(), 0);
    assert_eq!(sched.errors().get(DiagnosticCategory::Bake).len(), 1);
    assert!(sched.errors().summary().unwrap().contains("unavailable"));
    assert!(!out_dir.exists());
}

#[test]
fn missing_output_dir_is_fatal() {
    let compiler = Arc::new(FakeCompiler::ready());
    let mut config = config("no-target");
    config.primary.output_dir = PathBuf::new();
    let mut sched = scheduler(config, &compiler);

    assert!(!sched.build_now(&mut document()));
    assert_eq!(sched.state(), BakeState::Failed);
    assert_eq!(compiler.calls(), 0);
}

#[test]
fn preview_target_runs_four_jobs() {
    let compiler = Arc::new(FakeCompiler::ready());
    let mut config = config("preview");
    let preview_dir = config.primary.output_dir.with_file_name("preview");
    config.preview = Some(TargetConfig::new(&preview_dir));
    let mut sched = scheduler(config, &compiler);
    let mut doc = document();

    assert!(sched.build_now(&mut doc));
    assert!(sched.wait_for_completion(WAIT));
    assert_eq!(compiler.calls(), 4);
    assert_eq!(sched.state(), BakeState::UpToDate);
    assert!(preview_dir.join("ripple.frag.qsb").is_file());
}

#[test]
fn compile_errors_are_job_scoped_warnings() {
    let compiler = Arc::new(FakeCompiler {
        ready: true,
        fail_stage: Some(ShaderStage::Fragment),
        ..Default::default()
    });
    let config = config("failing");
    let out_dir = config.primary.output_dir.clone();
    let mut sched = scheduler(config, &compiler);
    let mut doc = document();

    assert!(sched.build_now(&mut doc));
    assert!(sched.wait_for_completion(WAIT));

    assert_eq!(sched.state(), BakeState::UpToDate);
    let shader = sched.errors().get(DiagnosticCategory::Shader);
    assert_eq!(shader.len(), 1);
    assert_eq!(shader[0].stage, Some(ShaderStage::Fragment));
    assert_eq!(shader[0].line, Some(12));
    assert_eq!(shader[0].job.as_deref(), Some("fragment/primary"));
    assert!(sched.errors().get(DiagnosticCategory::Bake).is_empty());
    // The vertex job's artifact is kept even though its sibling failed.
    assert!(out_dir.join("ripple.vert.qsb").is_file());
    assert!(!out_dir.join("ripple.frag.qsb").exists());
    // A build with errors is not a clean result to short-circuit on.
    assert!(sched.last_accepted().is_none());
}

#[test]
fn partial_output_of_failed_job_is_promoted() {
    let compiler = Arc::new(FakeCompiler {
        ready: true,
        fail_stage: Some(ShaderStage::Fragment),
        partial_output: true,
        ..Default::default()
    });
    let config = config("partial");
    let out_dir = config.primary.output_dir.clone();
    let mut sched = scheduler(config, &compiler);

    assert!(sched.build_now(&mut document()));
    assert!(sched.wait_for_completion(WAIT));
    assert_eq!(sched.state(), BakeState::UpToDate);
    assert_eq!(sched.errors().get(DiagnosticCategory::Shader).len(), 1);
    assert!(out_dir.join("ripple.frag.qsb").is_file());
}

#[test]
fn failed_build_is_retried_with_same_text() {
    let compiler = Arc::new(FakeCompiler {
        ready: true,
        failures_left: AtomicUsize::new(1),
        ..Default::default()
    });
    let config = config("flaky");
    let out_dir = config.primary.output_dir.clone();
    let mut sched = scheduler(config, &compiler);
    let mut doc = document();

    assert!(sched.build_now(&mut doc));
    assert!(sched.wait_for_completion(WAIT));
    assert_eq!(sched.state(), BakeState::UpToDate);
    assert_eq!(sched.errors().get(DiagnosticCategory::Shader).len(), 1);

    assert!(sched.build_now(&mut doc));
    assert!(sched.wait_for_completion(WAIT));
    assert_eq!(compiler.calls(), 4);
    assert_eq!(sched.builds_dispatched(), 2);
    assert_eq!(sched.state(), BakeState::UpToDate);
    assert!(sched.errors().get(DiagnosticCategory::Shader).is_empty());
    assert!(out_dir.join("ripple.vert.qsb").is_file());
    assert!(out_dir.join("ripple.frag.qsb").is_file());

    // Clean now, so the same text is skipped.
    assert!(!sched.build_now(&mut doc));
    assert_eq!(compiler.calls(), 4);
}

#[test]
fn newer_build_supersedes_running_one() {
    let compiler = Arc::new(FakeCompiler {
        ready: true,
        delay: Duration::from_millis(150),
        ..Default::default()
    });
    let mut sched = scheduler(config("supersede"), &compiler);
    let status = sched.subscribe_status();
    let mut doc = document();

    assert!(sched.build_now(&mut doc));
    doc.set_code(0, ShaderStage::Fragment, "@main\nfragColor = vec4(1.0);", &MemoryLibrary::new())
        .unwrap();
    assert!(sched.build_now(&mut doc));
    assert!(sched.wait_for_completion(WAIT));

    assert_eq!(sched.builds_dispatched(), 2);
    assert_eq!(sched.state(), BakeState::UpToDate);
    let latest = doc.cached().map(|c| c.sources.clone());
    assert_eq!(sched.last_accepted().cloned(), latest);

    let states: Vec<BakeState> = status.try_iter().map(|s| s.state).collect();
    assert_eq!(states.first(), Some(&BakeState::Composing));
    assert_eq!(states.last(), Some(&BakeState::UpToDate));
    assert!(states.contains(&BakeState::Compiling));
}

#[test]
fn emptied_document_goes_idle() {
    let compiler = Arc::new(FakeCompiler::ready());
    let mut sched = scheduler(config("emptied"), &compiler);
    let mut doc = document();
    sched.attach(&mut doc);

    let t0 = Instant::now();
    doc.remove_node(0).unwrap();
    sched.poll(&mut doc, t0);
    assert_eq!(sched.state(), BakeState::Idle);
    sched.poll(&mut doc, t0 + Duration::from_secs(1));
    assert_eq!(sched.builds_dispatched(), 0);
}
