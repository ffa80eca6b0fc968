use std::io::IsTerminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use devvm::cli::{Cli, Command, ImageCommand};
use devvm::config::{self, Overrides};
use devvm::error::DevvmError;
use devvm::logging::DeferredFileHandle;
use devvm::paths::Layout;
use devvm::progress::OutputMode;
use devvm::{backend, image, logging, preflight, provision, record};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let mode = resolve_output_mode(cli.verbose, cli.quiet);

    // Spinners own the terminal in Normal/Quiet; stray stderr lines break
    // indicatif's redraws.
    let terminal_filter = match mode {
        OutputMode::Verbose => EnvFilter::new("debug"),
        OutputMode::Normal | OutputMode::Quiet => EnvFilter::new("off"),
        OutputMode::Plain => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devvm=info"))
        }
    };
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: always devvm=debug, discarded until a guest is known
    let (file_writer, file_handle) = logging::DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("devvm=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let layout = Layout::discover();

    match cli.command {
        Command::Image { action } => {
            let cache = &layout.cache_root;
            match action {
                ImageCommand::List => image::list_cached(cache)?,
                ImageCommand::Delete { name } => image::delete_cached(cache, &name)?,
                ImageCommand::Clear => image::clear_cache(cache)?,
            }
        }
        Command::Show { name } => {
            let name = config::resolve_name(name, &layout)?;
            let record = record::load(&layout.record_path(&name))?
                .ok_or(DevvmError::UnknownGuest { name })?;
            print!("{}", record.render());
        }
        Command::Provision {
            name,
            token,
            cpu,
            accel,
            cores,
            disk_size,
        } => {
            let overrides = Overrides {
                cpu,
                accel,
                cores,
                disk_size,
            };
            let settings_path = cli.settings.unwrap_or_else(|| layout.settings_path());
            run_provision(
                &layout,
                &settings_path,
                name,
                token,
                &overrides,
                mode,
                &file_handle,
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_provision(
    layout: &Layout,
    settings_path: &std::path::Path,
    name: Option<String>,
    token: Option<String>,
    overrides: &Overrides,
    mode: OutputMode,
    file_handle: &DeferredFileHandle,
) -> Result<(), DevvmError> {
    let settings = config::load_settings(settings_path)?;
    let name = config::resolve_name(name, layout)?;
    let existing = record::load(&layout.record_path(&name))?;
    let token = config::resolve_token(token, existing.as_ref())?;

    // nothing below may touch disk before every tool is known to exist
    let tools = preflight::check_dependencies().await?;

    let git = match &existing {
        Some(r) if !r.git_name.is_empty() && !r.git_email.is_empty() => config::GitIdentity {
            name: r.git_name.clone(),
            email: r.git_email.clone(),
        },
        _ => preflight::git_identity().await?,
    };
    let params =
        config::resolve_params(name, token, git, overrides, &settings, existing.as_ref())?;

    let backend = backend::create_backend(tools.iso_tool);
    let record = provision::provision(&backend, layout, &params, mode, file_handle).await?;
    print!("{}", record.render());
    Ok(())
}

/// Plain output when stdout is not a terminal, then `--verbose`/`--quiet` on top.
fn resolve_output_mode(verbose: bool, quiet: bool) -> OutputMode {
    if quiet {
        OutputMode::Quiet
    } else if verbose {
        OutputMode::Verbose
    } else if !std::io::stdout().is_terminal() {
        OutputMode::Plain
    } else {
        OutputMode::Normal
    }
}
