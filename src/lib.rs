//! Firesight - wildfire image classification.
//!
//! Classifies images as Fire, No Fire, Smoke or `SmokeFire` with a
//! pre-trained model, either through a rate-limited HTTP service or
//! in-process over local files.

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod inference;
pub mod model;
pub mod preprocess;
pub mod ratelimit;
pub mod results;
pub mod server;
pub mod service;

use clap::Parser;
use cli::{Cli, Command, ConfigAction, ModelAction, PredictArgs, RuntimeArgs, ServeArgs};
use config::{Config, ModelSettings, RuntimeKind, config_file_path, save_default_config};
use constants::{probability, rate_limit};
use model::{ArtifactSource, CacheStatus, LocalCacheSource, ModelCache, RemoteSource};
use ratelimit::RateLimiter;
use service::{InPageService, PredictionPipeline, UploadItem, UploadQueue, UploadState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use error::{Error, Result};

/// Main entry point for the firesight CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet);

    let config = config::load_config(cli.global.config.as_deref())?;

    match cli.command {
        Command::Serve(args) => block_on(serve(args, config)),
        Command::Predict(args) => block_on(predict(args, config)),
        Command::Model { action } => block_on(handle_model_command(action, &config)),
        Command::Config { action } => handle_config_command(action, cli.global.config.as_deref()),
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal {
        message: format!("Failed to create async runtime: {e}"),
    })?;
    runtime.block_on(future)
}

/// Initialize the logging subsystem.
fn init_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    // Runtime logging is suppressed by default because CUDA fallback is
    // expected in auto mode and tract is chatty while optimizing.
    let filter_str = if quiet {
        "warn,ort=off,tract=off".to_string()
    } else {
        match verbose {
            0 => "info,ort=off,tract=warn".to_string(),
            1 => "debug,ort=warn,tract=warn".to_string(),
            2 => "trace,ort=info,tract=info".to_string(),
            _ => "trace".to_string(),
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Apply command-line runtime overrides to the model settings.
fn apply_runtime_args(settings: &mut ModelSettings, args: &RuntimeArgs) {
    if let Some(runtime) = args.runtime {
        settings.runtime = runtime;
    }
    if let Some(device) = args.device {
        settings.device = device;
    }
    if let Some(url) = &args.manifest_url {
        settings.manifest_url = Some(url.clone());
    }
}

fn local_source(settings: &ModelSettings, client: reqwest::Client) -> Result<LocalCacheSource> {
    Ok(LocalCacheSource::new(
        settings.resolved_cache_dir()?,
        settings.manifest_url.clone(),
        client,
        Duration::from_secs(settings.lock_stale_secs),
    ))
}

/// Wire the artifact source and backend for the configured runtime.
///
/// The in-page runtime streams the model into memory when a manifest URL is
/// set and otherwise reads an already-populated local cache.
fn build_model_cache(settings: &ModelSettings, show_progress: bool) -> Result<ModelCache> {
    let client = model::fetch::http_client(Duration::from_secs(settings.download_timeout_secs))?;
    let backend = inference::backend_for(settings.runtime, settings);

    let source: Arc<dyn ArtifactSource> = match (settings.runtime, &settings.manifest_url) {
        (RuntimeKind::InPage, Some(url)) => Arc::new(RemoteSource::new(url.clone(), client)),
        _ => Arc::new(local_source(settings, client)?.with_progress(show_progress)),
    };

    info!(
        "Runtime: {} ({} backend, device: {}), model source: {}",
        settings.runtime,
        backend.name(),
        inference::device_label(settings.device),
        source.describe()
    );

    Ok(ModelCache::new(source, backend))
}

async fn serve(args: ServeArgs, mut config: Config) -> Result<()> {
    apply_runtime_args(&mut config.model, &args.runtime);
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if args.no_rate_limit {
        config.rate_limit.enabled = false;
    }
    config::validate_config(&config)?;

    let cache = Arc::new(build_model_cache(&config.model, false)?);

    // Warm the model in the background; requests that arrive first share the load.
    let warm = Arc::clone(&cache);
    tokio::spawn(async move {
        if let Err(e) = warm.acquire().await {
            warn!("Model warm-up failed, will retry on first request: {e}");
        }
    });

    let limiter = if config.rate_limit.enabled {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(rate_limit::STORE_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        let limiter = RateLimiter::from_settings(&config.rate_limit, client)?;
        let policy = limiter.policy();
        info!(
            "Rate limit: {} requests per {}s ({} store)",
            policy.limit,
            config.rate_limit.window_secs,
            limiter.store_name()
        );
        Some(limiter)
    } else {
        warn!("Rate limiting disabled");
        None
    };

    let pipeline = PredictionPipeline::new(cache)
        .with_timeout(Duration::from_secs(config.server.inference_timeout_secs));
    let state = server::AppState::new(pipeline, limiter, &config.server, config.model.runtime);

    server::serve(&config.server, state).await
}

#[allow(clippy::print_stdout)]
async fn predict(args: PredictArgs, mut config: Config) -> Result<()> {
    apply_runtime_args(&mut config.model, &args.runtime);

    let cache = Arc::new(build_model_cache(&config.model, !args.json)?);
    let service = InPageService::new(PredictionPipeline::new(cache));

    let mut items = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let item = match UploadItem::from_path(path).await {
            Ok(item) => item,
            Err(e) => {
                warn!("{e}");
                UploadItem::unreadable(path.display().to_string(), e.to_string())
            }
        };
        items.push(item);
    }

    let mut queue = UploadQueue::new();
    queue.replace(items);

    tokio::select! {
        () = service.process(&mut queue) => {},
        _ = tokio::signal::ctrl_c() => return Err(Error::Interrupted),
    }

    if args.json {
        print_json(&queue)?;
    } else {
        print_table(&queue);
    }

    let failed = queue.failed();
    if failed > 0 {
        return Err(Error::PredictionsFailed {
            failed,
            total: queue.items().len(),
        });
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_table(queue: &UploadQueue) {
    for item in queue.items() {
        println!("{}", item.name());
        match item.state() {
            UploadState::Success(response) => {
                for result in &response.results {
                    println!(
                        "  {:<10} {:.prec$}",
                        result.class_name.as_str(),
                        result.probability,
                        prec = probability::DECIMAL_PLACES
                    );
                }
            }
            UploadState::Error(message) => println!("  error: {message}"),
            UploadState::Ready | UploadState::InFlight => println!("  not processed"),
        }
    }
}

#[allow(clippy::print_stdout)]
fn print_json(queue: &UploadQueue) -> Result<()> {
    let entries: Vec<serde_json::Value> = queue
        .items()
        .iter()
        .map(|item| match item.state() {
            UploadState::Success(response) => serde_json::json!({
                "file": item.name(),
                "results": response.results,
            }),
            UploadState::Error(message) => serde_json::json!({
                "file": item.name(),
                "error": message,
            }),
            UploadState::Ready | UploadState::InFlight => serde_json::json!({
                "file": item.name(),
                "error": "not processed",
            }),
        })
        .collect();

    let out = serde_json::to_string_pretty(&entries).map_err(|e| Error::Internal {
        message: format!("Failed to serialize results: {e}"),
    })?;
    println!("{out}");
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn handle_model_command(action: ModelAction, config: &Config) -> Result<()> {
    let mut settings = config.model.clone();

    match action {
        ModelAction::Fetch { manifest_url } => {
            if manifest_url.is_some() {
                settings.manifest_url = manifest_url;
            }
            let client =
                model::fetch::http_client(Duration::from_secs(settings.download_timeout_secs))?;
            let source = local_source(&settings, client)?.with_progress(true);

            tokio::select! {
                result = source.populate() => { result?; },
                _ = tokio::signal::ctrl_c() => return Err(Error::Interrupted),
            }

            report_cache_status(source.cache_dir(), source.status().await)
        }
        ModelAction::Check => {
            let cache_dir = settings.resolved_cache_dir()?;
            let status = model::inspect_cache_async(cache_dir.clone()).await;
            report_cache_status(&cache_dir, status)
        }
        ModelAction::Path => {
            println!("{}", settings.resolved_cache_dir()?.display());
            Ok(())
        }
    }
}

#[allow(clippy::print_stdout)]
fn report_cache_status(cache_dir: &Path, status: CacheStatus) -> Result<()> {
    match status {
        CacheStatus::Complete(manifest) => {
            println!(
                "Model cache complete: {} ({} shard(s))",
                cache_dir.display(),
                manifest.shard_paths().len()
            );
            Ok(())
        }
        CacheStatus::Incomplete { missing } => {
            for path in &missing {
                println!("  missing or invalid: {path}");
            }
            Err(Error::CacheIncomplete {
                cache_dir: cache_dir.to_path_buf(),
                missing: missing.len(),
            })
        }
        CacheStatus::Empty => Err(Error::CacheIncomplete {
            cache_dir: cache_dir.to_path_buf(),
            missing: 1,
        }),
    }
}

#[allow(clippy::print_stdout)]
fn handle_config_command(action: ConfigAction, explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };

    match action {
        ConfigAction::Init => {
            if path.exists() {
                println!("Configuration file already exists: {}", path.display());
            } else {
                let config = Config::default();
                let saved_path = if explicit.is_some() {
                    config::save_config(&config, &path)?;
                    path
                } else {
                    save_default_config(&config)?
                };
                println!("Created configuration file: {}", saved_path.display());
                println!("\nNext steps:");
                println!("  set [model] manifest_url, then run 'firesight model fetch'");
            }
            Ok(())
        }
        ConfigAction::Show => {
            let mut config = config::load_config(explicit)?;
            if config.rate_limit.upstash_token.is_some() {
                config.rate_limit.upstash_token = Some("<redacted>".to_string());
            }
            let out = toml::to_string_pretty(&config)
                .map_err(|e| Error::ConfigSerialize { source: e })?;
            println!("{out}");
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}
