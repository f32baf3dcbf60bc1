//! Debounced, asynchronous bake pipeline driven by document events.
//!
//! The scheduler is polled from a single thread. Compiler jobs run on their own
//! threads; a coordinator joins them and sends one `BakeReport` per build back
//! over a channel, which `poll` consumes.

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    composer::types::{ShaderStage, StageSources},
    composition::{CompositionDocument, DocumentEvent},
    diagnostics::{Diagnostic, DiagnosticCategory, ErrorLog},
};

use super::{
    compiler::{BakeJob, BakeVariant, JobOutcome, ShaderCompiler},
    config::{BakeConfig, TargetConfig},
    debounce::Debouncer,
    workspace::{AttemptFiles, BuildWorkspace},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BakeState {
    Idle,
    PendingRebuild,
    Composing,
    Compiling,
    UpToDate,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakeStatus {
    pub state: BakeState,
    #[serde(rename = "buildId")]
    pub build_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BakeReport {
    pub build_id: u64,
    pub outcomes: Vec<JobOutcome>,
}

impl BakeReport {
    pub fn variant_succeeded(&self, variant: BakeVariant) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.job.variant == variant)
            .all(|o| o.success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

#[derive(Debug)]
struct InFlight {
    build_id: u64,
    sources: StageSources,
}

pub struct BakeScheduler {
    config: BakeConfig,
    compiler: Arc<dyn ShaderCompiler>,
    debouncer: Debouncer,
    state: BakeState,
    errors: ErrorLog,
    workspace: BuildWorkspace,
    /// Sources of the last build whose jobs all succeeded.
    last_accepted: Option<StageSources>,
    in_flight: Option<InFlight>,
    next_build_id: u64,
    builds_dispatched: u64,
    report_tx: Sender<BakeReport>,
    report_rx: Receiver<BakeReport>,
    events: Option<Receiver<DocumentEvent>>,
    status_subscribers: Vec<Sender<BakeStatus>>,
}

fn artifact_name(config: &BakeConfig, stage: ShaderStage) -> String {
    format!(
        "{}.{}.{}",
        config.effect_name,
        stage.source_extension(),
        config.artifact_extension
    )
}

fn variant_jobs(
    config: &BakeConfig,
    files: &AttemptFiles,
    variant: BakeVariant,
    target: &TargetConfig,
) -> Result<Vec<BakeJob>> {
    let out_dir = files.dir.join(variant.as_str());
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    Ok(ShaderStage::ALL
        .into_iter()
        .map(|stage| BakeJob {
            stage,
            variant,
            source_path: files.source(stage).to_path_buf(),
            output_path: out_dir.join(artifact_name(config, stage)),
            target_path: target.output_dir.join(artifact_name(config, stage)),
            flags: target.profile_flags.clone(),
        })
        .collect())
}

/// Copy every artifact the compiler left behind to its target directory.
///
/// A job that reported failure may still have written a usable output.
fn promote(outcomes: &mut [JobOutcome]) {
    for outcome in outcomes.iter_mut() {
        let built = outcome.job.output_path.clone();
        if !built.is_file() {
            outcome.output_path = None;
            continue;
        }
        let target = outcome.job.target_path.clone();
        let copied = target
            .parent()
            .map(std::fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| std::fs::copy(&built, &target));
        match copied {
            Ok(_) => outcome.output_path = Some(target),
            Err(e) => {
                outcome.success = false;
                let note = format!("failed to copy artifact to {}: {e}", target.display());
                outcome.diagnostics = Some(match outcome.diagnostics.take() {
                    Some(prev) => format!("{prev}\n{note}"),
                    None => note,
                });
            }
        }
    }
}

fn run_jobs(compiler: Arc<dyn ShaderCompiler>, jobs: Vec<BakeJob>) -> Vec<JobOutcome> {
    let handles: Vec<(BakeJob, thread::JoinHandle<JobOutcome>)> = jobs
        .into_iter()
        .map(|job| {
            let compiler = compiler.clone();
            let task = job.clone();
            (job, thread::spawn(move || compiler.compile(&task)))
        })
        .collect();

    let mut outcomes: Vec<JobOutcome> = handles
        .into_iter()
        .map(|(job, handle)| {
            handle
                .join()
                .unwrap_or_else(|_| JobOutcome::failed(&job, "compiler job panicked"))
        })
        .collect();

    promote(&mut outcomes);
    outcomes
}

impl BakeScheduler {
    pub fn new(config: BakeConfig, compiler: Arc<dyn ShaderCompiler>) -> Self {
        let (report_tx, report_rx) = crossbeam_channel::unbounded();
        Self {
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_ms)),
            workspace: BuildWorkspace::new(config.temp_root()),
            config,
            compiler,
            state: BakeState::Idle,
            errors: ErrorLog::new(),
            last_accepted: None,
            in_flight: None,
            next_build_id: 1,
            builds_dispatched: 0,
            report_tx,
            report_rx,
            events: None,
            status_subscribers: Vec::new(),
        }
    }

    /// Subscribe to `doc`'s events; `poll` consumes them.
    pub fn attach(&mut self, doc: &mut CompositionDocument) {
        self.events = Some(doc.subscribe());
    }

    pub fn config(&self) -> &BakeConfig {
        &self.config
    }

    pub fn state(&self) -> BakeState {
        self.state
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn builds_dispatched(&self) -> u64 {
        self.builds_dispatched
    }

    pub fn last_accepted(&self) -> Option<&StageSources> {
        self.last_accepted.as_ref()
    }

    pub fn status(&self) -> BakeStatus {
        BakeStatus {
            state: self.state,
            build_id: self.next_build_id - 1,
            summary: self.errors.summary().map(str::to_string),
        }
    }

    pub fn subscribe_status(&mut self) -> Receiver<BakeStatus> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.status_subscribers.push(tx);
        rx
    }

    fn set_state(&mut self, state: BakeState) {
        if self.state == state {
            return;
        }
        log::debug!("[bake] {:?} -> {:?}", self.state, state);
        self.state = state;
        let status = self.status();
        self.status_subscribers
            .retain(|tx| tx.send(status.clone()).is_ok());
    }

    /// When `poll` next needs to run for the debounce timer to fire.
    pub fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        self.debouncer.time_until(now)
    }

    pub fn handle_event(&mut self, event: &DocumentEvent, now: Instant) {
        if event.requires_rebuild() {
            self.debouncer.arm(now);
            self.set_state(BakeState::PendingRebuild);
        } else {
            // Nothing left to build; results of a running build are superseded.
            self.debouncer.cancel();
            self.in_flight = None;
            self.set_state(BakeState::Idle);
        }
    }

    /// Drain document events and job reports, then build if the quiet period is over.
    pub fn poll(&mut self, doc: &mut CompositionDocument, now: Instant) {
        let events: Vec<DocumentEvent> = self
            .events
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        for event in &events {
            self.handle_event(event, now);
        }

        while let Ok(report) = self.report_rx.try_recv() {
            self.accept_report(report);
        }

        if self.debouncer.take_due(now) {
            self.build_now(doc);
        }
    }

    /// Compose and, if the text changed, dispatch a compile. Returns whether jobs
    /// were spawned.
    ///
    /// Fatal preconditions put the scheduler in `Failed` with a single bake
    /// diagnostic; nothing is written or spawned in that case. Text is only
    /// skipped when an earlier build of it succeeded in every job.
    pub fn build_now(&mut self, doc: &mut CompositionDocument) -> bool {
        self.debouncer.cancel();
        if doc.is_empty() {
            self.set_state(BakeState::Idle);
            return false;
        }

        self.set_state(BakeState::Composing);
        self.errors.clear(DiagnosticCategory::Bake);
        let sources = doc.compose(&mut self.errors).sources.clone();

        if let Some(in_flight) = &self.in_flight {
            if in_flight.sources == sources {
                log::debug!("[bake] build {} already compiling this text", in_flight.build_id);
                self.set_state(BakeState::Compiling);
                return false;
            }
        }
        if self.last_accepted.as_ref() == Some(&sources) {
            log::info!("[bake] up to date");
            self.in_flight = None;
            self.set_state(BakeState::UpToDate);
            return false;
        }

        match self.dispatch(sources) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[bake] {e:#}");
                self.errors
                    .push(Diagnostic::new(DiagnosticCategory::Bake, format!("{e:#}")));
                self.set_state(BakeState::Failed);
                false
            }
        }
    }

    fn check_preconditions(&self) -> Result<()> {
        self.compiler
            .check_ready()
            .with_context(|| format!("{} compiler unavailable", self.compiler.name()))?;
        if self.config.primary.output_dir.as_os_str().is_empty() {
            bail!("no output directory configured");
        }
        Ok(())
    }

    fn dispatch(&mut self, sources: StageSources) -> Result<()> {
        self.check_preconditions()?;

        let build_id = self.next_build_id;
        let files = self
            .workspace
            .begin_attempt(build_id, &self.config.effect_name, &sources)?;
        self.next_build_id += 1;

        let mut jobs = Vec::with_capacity(self.config.job_count());
        jobs.extend(variant_jobs(&self.config, &files, BakeVariant::Primary, &self.config.primary)?);
        if let Some(preview) = &self.config.preview {
            jobs.extend(variant_jobs(&self.config, &files, BakeVariant::Preview, preview)?);
        }

        log::info!(
            "[bake] build {build_id}: {} job(s) with {}",
            jobs.len(),
            self.compiler.name()
        );

        let compiler = self.compiler.clone();
        let report_tx = self.report_tx.clone();
        thread::Builder::new()
            .name(format!("bake-{build_id}"))
            .spawn(move || {
                let outcomes = run_jobs(compiler, jobs);
                let _ = report_tx.send(BakeReport { build_id, outcomes });
            })
            .context("failed to spawn bake coordinator")?;

        self.in_flight = Some(InFlight { build_id, sources });
        self.builds_dispatched += 1;
        self.set_state(BakeState::Compiling);
        Ok(())
    }

    fn accept_report(&mut self, report: BakeReport) {
        self.workspace.release(report.build_id);

        let is_current = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.build_id == report.build_id);
        if !is_current {
            log::debug!("[bake] ignoring superseded build {}", report.build_id);
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };

        self.errors.clear(DiagnosticCategory::Shader);
        for outcome in &report.outcomes {
            if let Some(text) = &outcome.diagnostics {
                self.errors.push(Diagnostic::compiler_output(
                    outcome.job.stage,
                    outcome.job.label(),
                    text,
                ));
            }
            if !outcome.success {
                log::warn!("[bake] {} failed", outcome.job);
            }
        }
        if self.config.preview.is_some() && !report.variant_succeeded(BakeVariant::Preview) {
            log::warn!("[bake] preview jobs of build {} reported errors", report.build_id);
        }

        // Job errors are diagnostics; the build is done once every job reported.
        // Only a clean build may short-circuit the next one with the same text.
        if report.all_succeeded() {
            self.last_accepted = Some(in_flight.sources);
        }
        log::info!(
            "[bake] build {} done ({} diagnostic(s))",
            report.build_id,
            self.errors.get(DiagnosticCategory::Shader).len()
        );

        if self.debouncer.is_armed() {
            // Edited while compiling; the next build is already scheduled.
            return;
        }
        self.set_state(BakeState::UpToDate);
    }

    /// Block until the running build reports or `timeout` elapses.
    ///
    /// Returns `true` when nothing is left in flight.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.report_rx.recv_timeout(remaining) {
                Ok(report) => self.accept_report(report),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    /// Paths of the artifacts the primary target receives.
    pub fn primary_artifacts(&self) -> Vec<PathBuf> {
        ShaderStage::ALL
            .into_iter()
            .map(|stage| {
                self.config
                    .primary
                    .output_dir
                    .join(artifact_name(&self.config, stage))
            })
            .collect()
    }
}
