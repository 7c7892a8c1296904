//! Tileset Streamer - on-the-fly transformation of 3D Tiles tilesets.
//!
//! This binary starts the HTTP server or runs one of the batch tools.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tileset_streamer::{
    config::{
        Cli, Command, DownloadConfig, FilterConfig, MaterializeConfig, MergeConfig,
        PipelineOptions, ServeConfig, SplitConfig,
    },
    filters::{ConstantHeightModel, ExternalCompressor, FilterKind},
    pipeline::{parse_pipeline, BuildContext, PipelineBuilder, Resolver},
    server::{create_router, RouterConfig},
    source::open_source,
    tools,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Materialize(config) => run_materialize(config).await,
        Command::Merge(config) => run_merge(config).await,
        Command::Split(config) => run_split(config).await,
        Command::Download(config) => run_download(config).await,
        Command::Filter(config) => run_filter(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.pipeline.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Tileset Streamer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Root: {}", config.root);
    info!("  Master document: {}", config.pipeline.master_name);
    info!("  Pipeline cache: {} pipelines", config.pipeline_cache);
    info!("  Compressor: {}", config.pipeline.compressor.display());
    if config.pipeline.lenient {
        warn!("  Lenient mode: unknown filters are skipped");
    }

    let builder = match open_builder(&config.root, &config.pipeline, config.pipeline_cache).await {
        Ok(builder) => builder,
        Err(e) => {
            error!("Failed to open root '{}': {}", config.root, e);
            return ExitCode::FAILURE;
        }
    };
    let resolver = Arc::new(Resolver::new(builder));

    let router = create_router(resolver, build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl 'http://{}/{}'", addr, config.pipeline.master_name);
    info!(
        "    curl 'http://{}/{}?fetch&exponential:1:2'",
        addr, config.pipeline.master_name
    );
    info!("");
    info!("  Filters: {}", FilterKind::names().join(", "));
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Open `root` and wrap it in a pipeline builder configured from `options`.
async fn open_builder(
    root: &str,
    options: &PipelineOptions,
    pipeline_cache: usize,
) -> Result<Arc<PipelineBuilder>, String> {
    let source = open_source(root, &options.source_options())
        .await
        .map_err(|e| e.to_string())?;
    info!("  Source: {}", source.identifier());

    let mut context = BuildContext::new(source)
        .with_master_name(options.master_name.clone())
        .with_compressor(Arc::new(ExternalCompressor::new(options.compressor.clone())))
        .with_height_model(Arc::new(ConstantHeightModel(options.height)))
        .with_lenient(options.lenient);
    if let Some(ref dir) = options.cache_dir {
        context = context.with_cache_root(dir.clone());
    }

    Ok(Arc::new(PipelineBuilder::with_capacity(context, pipeline_cache)))
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tileset_streamer=debug,tower_http=debug"
    } else {
        "tileset_streamer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Batch Commands
// =============================================================================

async fn run_materialize(config: MaterializeConfig) -> ExitCode {
    init_logging(config.options.verbose);

    if let Err(e) = config.options.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let operations = match parse_pipeline(&config.pipeline) {
        Ok(operations) => operations,
        Err(e) => {
            error!("Invalid pipeline '{}': {}", config.pipeline, e);
            return ExitCode::FAILURE;
        }
    };

    let builder = match open_builder(&config.root, &config.options, 1).await {
        Ok(builder) => builder,
        Err(e) => {
            error!("Failed to open root '{}': {}", config.root, e);
            return ExitCode::FAILURE;
        }
    };
    let resolver = Resolver::new(builder);

    match tools::materialize(&resolver, &operations, &config.target, &config.out).await {
        Ok(report) => {
            println!(
                "Wrote {} document(s) and {} payload(s) to {} ({} reference(s) skipped)",
                report.documents,
                report.payloads,
                config.out.display(),
                report.skipped
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Materialize failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_merge(config: MergeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match tools::merge_directory(&config.dir, &config.master_name, config.geometric_error).await {
        Ok(path) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Merge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_split(config: SplitConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match tools::split_to_disk(
        &config.source,
        &config.out,
        config.count,
        &config.name,
        &config.master_name,
    )
    .await
    {
        Ok(documents) => {
            println!(
                "Wrote {} and {} sub-document(s) to {}",
                config.master_name,
                documents,
                config.out.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Split failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_download(config: DownloadConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let client = reqwest::Client::new();
    match tools::download(&client, &config.url, &config.out, &config.master_name).await {
        Ok(documents) => {
            println!(
                "Downloaded {} document(s) to {}",
                documents,
                config.out.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Download failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_filter(config: FilterConfig) -> ExitCode {
    init_logging(config.verbose);

    let operations = match parse_pipeline(&config.pipeline) {
        Ok(operations) => operations,
        Err(e) => {
            error!("Invalid pipeline '{}': {}", config.pipeline, e);
            return ExitCode::FAILURE;
        }
    };

    match tools::filter_file(&config.source, &config.destination, &operations).await {
        Ok(()) => {
            println!("Wrote {}", config.destination.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Filter failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
