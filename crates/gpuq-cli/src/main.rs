mod config;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use gpuq::dl_error;
use gpuq::DeviceSource;
use gpuq::NvmlStatus;
use gpuq::StatusSource;
use gpuq::Provider;
use gpuq::SystemSource;
use utils::logging;
use utils::version;

use crate::config::Cli;
use crate::config::Commands;
use crate::config::FilterArgs;
use crate::config::ListArgs;
use crate::config::StatusArgs;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    logging::init(cli.verbose);
    tracing::debug!("gpuq {}", &**version::VERSION);

    if !cli.lib_hints.is_empty() {
        gpuq::config::set_location_hints(cli.lib_hints.clone())
            .context("invalid --lib-hint")?;
    }

    let source = SystemSource::new();
    let result = match cli.command {
        Commands::Providers => run_providers(&source),
        Commands::List(args) => run_list(&source, &args),
        Commands::Count(filter) => run_count(&source, &filter),
        Commands::Status(args) => run_status(&args),
        Commands::Version => run_version(),
    };

    gpuq::cuda::cleanup();
    gpuq::hip::cleanup();
    result
}

fn run_providers(source: &SystemSource<'_>) -> Result<()> {
    for provider in Provider::ALL {
        // report only this provider's failures
        dl_error::reset_dl_error();
        if source.has_provider(provider) {
            let count = source
                .system_count(provider)
                .with_context(|| format!("failed to count {provider} devices"))?;
            println!("{provider}: available ({count} devices)");
        } else {
            println!("{provider}: unavailable");
            if let Some(errors) = dl_error::last_dl_error() {
                println!("{errors}");
            }
        }
    }
    Ok(())
}

fn run_list(source: &SystemSource<'_>, args: &ListArgs) -> Result<()> {
    let gpus = gpuq::query_required(
        source,
        args.filter.providers(),
        args.filter.visible_only(),
        args.requirement(),
    )
    .context("failed to query GPUs")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&gpus).context("failed to serialize GPUs")?
        );
        return Ok(());
    }

    if gpus.is_empty() {
        tracing::info!("no GPU found");
    }
    for gpu in &gpus {
        println!("{gpu}");
    }
    Ok(())
}

fn run_count(source: &SystemSource<'_>, filter: &FilterArgs) -> Result<()> {
    let count = gpuq::count(source, filter.providers(), filter.visible_only())
        .context("failed to count GPUs")?;
    println!("{count}");
    Ok(())
}

fn run_status(args: &StatusArgs) -> Result<()> {
    let nvml = NvmlStatus::init().context("failed to initialize NVML")?;
    let statuses = match args.index {
        Some(index) => {
            let status = gpuq::cuda_info(&nvml, i64::from(index))
                .with_context(|| format!("no status for CUDA device {index}"))?;
            vec![status]
        }
        None => {
            let count = nvml
                .device_count()
                .context("failed to count CUDA devices")?;
            (0..count)
                .filter_map(|index| gpuq::cuda_info(&nvml, i64::from(index)))
                .collect()
        }
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("failed to serialize status")?
        );
        return Ok(());
    }

    for status in &statuses {
        println!("{status}");
    }
    Ok(())
}

fn run_version() -> Result<()> {
    let info = version::build_info();
    println!("version: {}", &**version::VERSION);
    println!("has_repo: {}", info.has_repo);
    println!("commit: {}", info.commit.unwrap_or("unknown"));
    if let Some(branch) = info.branch {
        println!("branch: {branch}");
    }
    if let Some(describe) = info.describe {
        println!("describe: {describe}");
    }
    if let Some(timestamp) = info.build_timestamp {
        println!("built: {timestamp}");
    }
    Ok(())
}
