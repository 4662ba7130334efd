use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use extpack_core::{validate_namespace, ExtensionId, LocalExtension};
use extpack_job::{
    EngineConfig, EngineContext, HandlerRegistry, Job, JobEngine, JobKind, ProgressObserver,
    Request,
};
use extpack_planner::ExtensionPlan;
use extpack_repository::{
    CoreRepository, FilesystemRepository, HttpRepository, RepositoryChain, RepositorySourceKind,
    RepositorySourceRecord, RepositorySourceStore,
};
use extpack_store::{default_user_prefix, LocalExtensionStore, StoreLayout};

use crate::completion::write_completions_script;
use crate::render::{
    current_output_style, format_installed_lines, format_plan_lines, format_source_lines,
    render_status_line, OutputStyle, TerminalProgress,
};
use crate::{Cli, CliRepositoryKind, Commands, InstallTarget, RepositoryCommands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let layout = StoreLayout::new(resolve_prefix(cli.prefix)?);
    let style = current_output_style();

    match cli.command {
        Commands::Plan { target, json } => {
            let engine = open_engine(&layout)?;
            let plan = run_plan(&engine, &target)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&plan).context("failed serializing plan")?
                );
            } else {
                print_lines(&format_plan_lines(&plan, style));
            }
        }
        Commands::Install { target } => {
            let engine = open_engine(&layout)?;
            let job = run_job(
                &engine,
                JobKind::Install,
                install_request("install", &target)?,
                style,
            )?;
            if let Some(plan) = job.plan_tree() {
                for action in plan.effective_actions() {
                    println!("{}", render_status_line(style, "ok", &action.to_string()));
                }
            }
        }
        Commands::Uninstall { specs, namespace } => {
            let engine = open_engine(&layout)?;
            let request = uninstall_request(&engine, &specs, namespace)?;
            let job = run_job(&engine, JobKind::Uninstall, request, style)?;
            if let Some(plan) = job.plan_tree() {
                for action in plan.effective_actions() {
                    println!("{}", render_status_line(style, "ok", &action.to_string()));
                }
            }
        }
        Commands::List { namespace } => {
            let store = LocalExtensionStore::open(layout.clone())?;
            let installed = list_installed(&store, namespace.as_deref())?;
            if installed.is_empty() {
                println!("no extensions installed");
            } else {
                print_lines(&format_installed_lines(&installed));
            }
        }
        Commands::Search { needle } => {
            let config = EngineConfig::load(&layout.config_path())?;
            let chain = open_chain(&layout, &config)?;
            let names = chain.search(&needle)?;
            if names.is_empty() {
                println!("no extensions match '{needle}'");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Repository { command } => {
            let sources = RepositorySourceStore::new(layout.state_dir());
            run_repository_command(&sources, command, style)?;
        }
        Commands::Completions { shell } => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            write_completions_script(shell, &mut handle)?;
        }
        Commands::Doctor => {
            print_lines(&doctor_lines(&layout)?);
        }
    }

    Ok(())
}

fn resolve_prefix(prefix: Option<PathBuf>) -> Result<PathBuf> {
    match prefix {
        Some(prefix) => Ok(prefix),
        None => default_user_prefix(),
    }
}

/// Opens the store, core list, repository chain and handlers under `layout`.
pub(crate) fn open_engine(layout: &StoreLayout) -> Result<JobEngine> {
    layout.ensure_base_dirs()?;
    let config = EngineConfig::load(&layout.config_path())?;
    let core = CoreRepository::load(&layout.core_extensions_path())?;
    let store = LocalExtensionStore::open(layout.clone())?;
    let chain = open_chain(layout, &config)?;
    let context = EngineContext {
        core: Arc::new(core),
        store: Arc::new(store),
        chain: Arc::new(chain),
        handlers: HandlerRegistry::with_defaults(layout.clone()),
    };
    Ok(JobEngine::new(context, config))
}

fn open_chain(layout: &StoreLayout, config: &EngineConfig) -> Result<RepositoryChain> {
    RepositorySourceStore::new(layout.state_dir()).build_chain(config.remote_timeout())
}

pub(crate) fn parse_install_specs(specs: &[String]) -> Result<Vec<ExtensionId>> {
    specs
        .iter()
        .map(|spec| {
            ExtensionId::parse(spec)
                .with_context(|| format!("invalid extension '{spec}': expected <id>@<version>"))
        })
        .collect()
}

pub(crate) fn install_request(command: &str, target: &InstallTarget) -> Result<Request> {
    if let Some(namespace) = &target.namespace {
        validate_namespace(namespace)?;
    }
    let targets = parse_install_specs(&target.specs)?;
    Ok(Request::new(job_path(command, &target.specs), targets)
        .with_namespace(target.namespace.clone())
        .with_root_modifications_allowed(target.allow_root_modifications))
}

/// Bare ids resolve to the release visible from `namespace`.
pub(crate) fn uninstall_request(
    engine: &JobEngine,
    specs: &[String],
    namespace: Option<String>,
) -> Result<Request> {
    let store = &engine.context().store;
    let mut targets = Vec::with_capacity(specs.len());
    for spec in specs {
        if spec.contains('@') {
            targets.push(ExtensionId::parse(spec)?);
            continue;
        }
        let installed = store
            .get_installed_extension(spec, namespace.as_deref())
            .ok_or_else(|| anyhow!("extension '{spec}' is not installed"))?;
        targets.push(installed.id().clone());
    }
    Ok(Request::new(job_path("uninstall", specs), targets).with_namespace(namespace))
}

fn job_path(command: &str, specs: &[String]) -> Vec<String> {
    let mut path = vec!["cli".to_string(), command.to_string()];
    path.extend(specs.iter().cloned());
    path
}

pub(crate) fn run_plan(engine: &JobEngine, target: &InstallTarget) -> Result<ExtensionPlan> {
    let request = install_request("plan", target)?;
    let job = engine.submit(JobKind::InstallPlan, request)?;
    job.wait()?;
    job.plan_tree()
        .ok_or_else(|| anyhow!("plan job '{}' finished without a plan", job.label()))
}

fn run_job(engine: &JobEngine, kind: JobKind, request: Request, style: OutputStyle) -> Result<Job> {
    let progress = Arc::new(TerminalProgress::start(style, kind.as_str()));
    let observer: Arc<dyn ProgressObserver> = progress.clone();
    let job = engine.submit_observed(kind, request, vec![observer])?;
    let result = job.wait();
    progress.finish(result.is_ok());
    result?;
    Ok(job)
}

pub(crate) fn list_installed(
    store: &LocalExtensionStore,
    namespace: Option<&str>,
) -> Result<Vec<LocalExtension>> {
    let Some(namespace) = namespace else {
        return Ok(store.all_extensions());
    };
    validate_namespace(namespace)?;
    Ok(store
        .all_extensions()
        .into_iter()
        .filter(|local| local.satisfies_namespace(Some(namespace)))
        .collect())
}

fn run_repository_command(
    sources: &RepositorySourceStore,
    command: RepositoryCommands,
    style: OutputStyle,
) -> Result<()> {
    match command {
        RepositoryCommands::Add {
            name,
            location,
            kind,
            fingerprint,
            priority,
        } => {
            let record = repository_record(name, location, kind, fingerprint, priority)?;
            let message = format!(
                "added repository {} (fingerprint {})",
                record.name, record.fingerprint_sha256
            );
            sources.add_source(record)?;
            println!("{}", render_status_line(style, "ok", &message));
        }
        RepositoryCommands::List => {
            let listed = sources.list_sources()?;
            if listed.is_empty() {
                println!("no repositories configured");
            }
            print_lines(&format_source_lines(&listed));
        }
        RepositoryCommands::Remove { name } => {
            sources.remove_source(&name)?;
            println!(
                "{}",
                render_status_line(style, "ok", &format!("removed repository {name}"))
            );
        }
        RepositoryCommands::Enable { name } => {
            sources.set_enabled(&name, true)?;
            println!(
                "{}",
                render_status_line(style, "ok", &format!("enabled repository {name}"))
            );
        }
        RepositoryCommands::Disable { name } => {
            sources.set_enabled(&name, false)?;
            println!(
                "{}",
                render_status_line(style, "ok", &format!("disabled repository {name}"))
            );
        }
    }
    Ok(())
}

/// Builds a source record; without an explicit fingerprint the repository
/// is opened and its current key is trusted.
pub(crate) fn repository_record(
    name: String,
    location: String,
    kind: CliRepositoryKind,
    fingerprint: Option<String>,
    priority: u32,
) -> Result<RepositorySourceRecord> {
    let kind = match kind {
        CliRepositoryKind::Filesystem => RepositorySourceKind::Filesystem,
        CliRepositoryKind::Http => RepositorySourceKind::Http,
    };
    let fingerprint_sha256 = match fingerprint {
        Some(fingerprint) => fingerprint,
        None => {
            let observed = observed_fingerprint(&name, &location, kind)?;
            tracing::warn!(repository = %name, fingerprint = %observed, "trusting repository key on first use");
            observed
        }
    };
    Ok(RepositorySourceRecord {
        name,
        kind,
        location,
        fingerprint_sha256,
        enabled: true,
        priority,
    })
}

fn observed_fingerprint(name: &str, location: &str, kind: RepositorySourceKind) -> Result<String> {
    match kind {
        RepositorySourceKind::Filesystem => {
            Ok(FilesystemRepository::open(name, Path::new(location))?
                .fingerprint()
                .to_string())
        }
        RepositorySourceKind::Http => Ok(HttpRepository::open(
            name,
            location,
            EngineConfig::default().remote_timeout(),
            None,
        )?
        .fingerprint()
        .to_string()),
    }
}

pub(crate) fn doctor_lines(layout: &StoreLayout) -> Result<Vec<String>> {
    let config = EngineConfig::load(&layout.config_path())?;
    let core = CoreRepository::load(&layout.core_extensions_path())?;
    let sources = RepositorySourceStore::new(layout.state_dir()).list_sources()?;
    let handlers = HandlerRegistry::with_defaults(layout.clone());

    let mut lines = vec![
        format!("prefix: {}", layout.prefix().display()),
        format!("state: {}", layout.installed_state_dir().display()),
        format!("cache: {}", layout.artifacts_cache_dir().display()),
        format!("extensions: {}", layout.extensions_dir().display()),
        format!("workers: {}", config.workers()),
        format!("remote timeout: {}s", config.remote_timeout_secs),
        format!(
            "root modifications allowed: {}",
            config.root_modifications_allowed
        ),
        format!("core extensions: {}", core.len()),
        format!(
            "repositories: {} ({} enabled)",
            sources.len(),
            sources.iter().filter(|source| source.enabled).count()
        ),
        format!(
            "handlers: {}",
            handlers.types().collect::<Vec<_>>().join(", ")
        ),
    ];
    if layout.installed_state_dir().exists() {
        let store = LocalExtensionStore::open(layout.clone())?;
        lines.push(format!("installed: {}", store.count_extensions()));
    } else {
        lines.push("installed: 0".to_string());
    }
    Ok(lines)
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
