use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use node_forge_composer::{
    bake::{
        self, BakeConfig, BakeScheduler, BakeState, NagaCompiler, ProcessCompiler, ShaderCompiler,
        TargetConfig,
    },
    composition::CompositionDocument,
    library::{DirectoryLibrary, NodeLibrary},
    watch::ProjectWatcher,
    ws,
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default, Clone)]
struct Cli {
    project: Option<PathBuf>,
    library: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    compiler: Option<PathBuf>,
    profile_flags: Vec<String>,
    preview_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    serve: Option<String>,
    watch: bool,
    debounce_ms: Option<u64>,
    name: Option<String>,
    add: Vec<String>,
    save: Option<PathBuf>,
}

const USAGE: &str = "supported: --project <project.json>, --library <dir>, --output-dir <dir>, \
--compiler <exe>, --profile-flag <flag> (repeatable), --preview-dir <dir>, --config <bake.json>, \
--serve <addr>, --watch, --debounce-ms <ms>, --name <effect>, --add <node-id> (repeatable), \
--save <project.json>";

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = |i: usize| -> Result<&String> {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match flag {
            "--project" => cli.project = Some(PathBuf::from(value(i)?)),
            "--library" => cli.library = Some(PathBuf::from(value(i)?)),
            "--outputdir" | "--output-dir" => cli.output_dir = Some(PathBuf::from(value(i)?)),
            "--compiler" => cli.compiler = Some(PathBuf::from(value(i)?)),
            "--profile-flag" => cli.profile_flags.push(value(i)?.clone()),
            "--preview-dir" => cli.preview_dir = Some(PathBuf::from(value(i)?)),
            "--config" => cli.config = Some(PathBuf::from(value(i)?)),
            "--serve" => cli.serve = Some(value(i)?.clone()),
            "--debounce-ms" => {
                let v = value(i)?;
                cli.debounce_ms = Some(
                    v.parse()
                        .with_context(|| format!("invalid --debounce-ms value `{v}`"))?,
                );
            }
            "--name" => cli.name = Some(value(i)?.clone()),
            "--add" => cli.add.push(value(i)?.clone()),
            "--save" => cli.save = Some(PathBuf::from(value(i)?)),
            "--watch" => {
                cli.watch = true;
                i += 1;
                continue;
            }
            other => bail!("unknown argument: {other} ({USAGE})"),
        }
        i += 2;
    }
    if cli.watch && cli.project.is_none() {
        bail!("--watch requires --project");
    }
    Ok(cli)
}

fn bake_config(cli: &Cli) -> Result<BakeConfig> {
    let mut config = match &cli.config {
        Some(path) => bake::load_bake_config(path)?,
        None => BakeConfig::new(PathBuf::new()),
    };
    if let Some(dir) = &cli.output_dir {
        config.primary.output_dir = dir.clone();
    }
    if !cli.profile_flags.is_empty() {
        config.primary.profile_flags = cli.profile_flags.clone();
    }
    if let Some(dir) = &cli.preview_dir {
        let flags = config
            .preview
            .as_ref()
            .map(|p| p.profile_flags.clone())
            .unwrap_or_else(|| config.primary.profile_flags.clone());
        config.preview = Some(TargetConfig {
            output_dir: dir.clone(),
            profile_flags: flags,
        });
    }
    if let Some(compiler) = &cli.compiler {
        config.compiler = Some(compiler.clone());
    }
    if let Some(ms) = cli.debounce_ms {
        config.debounce_ms = ms;
    }
    if let Some(name) = &cli.name {
        config.effect_name = name.clone();
    }
    config.validate()?;
    Ok(config)
}

fn make_compiler(config: &BakeConfig) -> Arc<dyn ShaderCompiler> {
    match config.resolved_compiler() {
        Some(exe) => {
            log::info!("[bake] using external compiler {}", exe.display());
            Arc::new(ProcessCompiler::new(exe))
        }
        None => {
            log::info!("[bake] no external compiler configured; validating with naga");
            Arc::new(NagaCompiler)
        }
    }
}

fn load_document(cli: &Cli, library: Option<&DirectoryLibrary>) -> Result<CompositionDocument> {
    let mut doc = match &cli.project {
        Some(path) if path.exists() => CompositionDocument::load(path)?,
        Some(path) if !cli.add.is_empty() => {
            log::info!("[compose] {} does not exist yet; starting empty", path.display());
            CompositionDocument::new()
        }
        Some(path) => bail!("project {} not found", path.display()),
        None => CompositionDocument::new(),
    };

    if !cli.add.is_empty() {
        let library = library.ok_or_else(|| anyhow!("--add requires --library"))?;
        for id in &cli.add {
            let node = library.lookup(id)?;
            doc.add_node(node, library)?;
            log::info!("[compose] added `{id}`");
        }
    }
    Ok(doc)
}

fn report(scheduler: &BakeScheduler) {
    for d in scheduler.errors().iter() {
        let origin = match (&d.node_id, d.stage) {
            (Some(id), Some(stage)) => format!(" {id}/{stage}"),
            (None, Some(stage)) => format!(" {stage}"),
            (Some(id), None) => format!(" {id}"),
            (None, None) => String::new(),
        };
        log::warn!("[{}]{origin}: {}", d.category.as_str(), d.message);
    }
}

fn run_once(mut doc: CompositionDocument, mut scheduler: BakeScheduler) -> Result<()> {
    if doc.is_empty() {
        bail!("nothing to bake: the composition has no nodes");
    }
    scheduler.build_now(&mut doc);
    if !scheduler.wait_for_completion(ONE_SHOT_TIMEOUT) {
        bail!("bake did not finish within {ONE_SHOT_TIMEOUT:?}");
    }
    report(&scheduler);
    match scheduler.state() {
        BakeState::UpToDate => {
            for path in scheduler.primary_artifacts() {
                if path.is_file() {
                    println!("[bake] wrote {}", path.display());
                } else {
                    log::warn!("[bake] no artifact at {}", path.display());
                }
            }
            Ok(())
        }
        state => Err(anyhow!(
            "bake ended in {state:?}: {}",
            scheduler.errors().summary().unwrap_or("no details")
        )),
    }
}

struct ServeHandle {
    hub: ws::WsHub,
    updates: crossbeam_channel::Receiver<ws::ProjectUpdate>,
    last_good: Arc<Mutex<Option<node_forge_composer::dsl::ProjectRecord>>>,
}

fn start_server(addr: &str, doc: &CompositionDocument) -> Result<ServeHandle> {
    let (update_tx, update_rx) = crossbeam_channel::bounded::<ws::ProjectUpdate>(1);
    let drop_rx = update_rx.clone();
    let last_good = Arc::new(Mutex::new((!doc.is_empty()).then(|| doc.to_project())));
    let hub = ws::WsHub::default();
    ws::spawn_ws_server(addr, update_tx, drop_rx, hub.clone(), last_good.clone())?;
    Ok(ServeHandle {
        hub,
        updates: update_rx,
        last_good,
    })
}

fn base_dir(cli: &Cli) -> Option<&Path> {
    cli.project.as_deref().and_then(Path::parent)
}

fn run_loop(cli: &Cli, mut doc: CompositionDocument, mut scheduler: BakeScheduler) -> Result<()> {
    let mut watcher = match (&cli.project, cli.watch) {
        (Some(path), true) => Some(ProjectWatcher::new(path)),
        _ => None,
    };
    let server = match &cli.serve {
        Some(addr) => Some(start_server(addr, &doc)?),
        None => None,
    };
    let status_rx = scheduler.subscribe_status();
    scheduler.attach(&mut doc);
    if !doc.is_empty() {
        scheduler.build_now(&mut doc);
    }

    loop {
        if let Some(w) = watcher.as_mut() {
            match w.check_reload() {
                Ok(Some(project)) => {
                    if let Err(e) = doc.replace_with_project(&project, base_dir(cli)) {
                        log::warn!("[watch] {e:#}");
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("[watch] {e:#}"),
            }
        }

        if let Some(server) = &server {
            while let Ok(update) = server.updates.try_recv() {
                match update {
                    ws::ProjectUpdate::Parsed { project, request_id } => {
                        match doc.replace_with_project(&project, base_dir(cli)) {
                            Ok(()) => log::info!(
                                "[ws] project update ({} node(s), request {request_id:?})",
                                project.nodes.len()
                            ),
                            Err(e) => log::warn!("[ws] rejected project update: {e:#}"),
                        }
                    }
                    ws::ProjectUpdate::ParseError { message, .. } => {
                        log::warn!("[ws] {message}");
                    }
                }
            }
        }

        scheduler.poll(&mut doc, Instant::now());

        while let Ok(status) = status_rx.try_recv() {
            let state = status.state;
            if matches!(state, BakeState::UpToDate | BakeState::Failed) {
                report(&scheduler);
            }
            if let Some(server) = &server {
                if state == BakeState::UpToDate {
                    if let Ok(mut guard) = server.last_good.lock() {
                        *guard = Some(doc.to_project());
                    }
                }
                match ws::status_message(status, scheduler.errors()) {
                    Ok(text) => server.hub.broadcast(text),
                    Err(e) => log::warn!("[ws] failed to encode status: {e:#}"),
                }
            }
        }

        let sleep = scheduler
            .next_wakeup(Instant::now())
            .map_or(POLL_INTERVAL, |d| d.min(POLL_INTERVAL));
        thread::sleep(sleep);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;

    let library = cli.library.as_ref().map(DirectoryLibrary::new);
    let doc = load_document(&cli, library.as_ref())?;
    if let Some(path) = &cli.save {
        doc.save(path)?;
        log::info!("[compose] saved {}", path.display());
    }

    let config = bake_config(&cli)?;
    let scheduler = BakeScheduler::new(config.clone(), make_compiler(&config));

    if cli.watch || cli.serve.is_some() {
        run_loop(&cli, doc, scheduler)
    } else {
        run_once(doc, scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_cli_bake_flags() {
        let cli = parse_cli(&args(&[
            "--project",
            "fx.json",
            "--output-dir",
            "out",
            "--profile-flag",
            "--glsl",
            "--profile-flag",
            "330",
            "--watch",
            "--debounce-ms",
            "50",
        ]))
        .unwrap();
        assert_eq!(cli.project.as_deref(), Some(Path::new("fx.json")));
        assert_eq!(cli.profile_flags, vec!["--glsl", "330"]);
        assert!(cli.watch);
        assert_eq!(cli.debounce_ms, Some(50));

        let config = bake_config(&cli).unwrap();
        assert_eq!(config.primary.output_dir, PathBuf::from("out"));
        assert_eq!(config.debounce_ms, 50);
        assert!(config.preview.is_none());
    }

    #[test]
    fn parse_cli_rejects_unknown_and_incomplete() {
        assert!(parse_cli(&args(&["--bogus"])).is_err());
        assert!(parse_cli(&args(&["--output-dir"])).is_err());
        assert!(parse_cli(&args(&["--watch"])).is_err());
    }
}
