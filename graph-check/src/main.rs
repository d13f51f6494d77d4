#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::{
    fmt::{self, Write as _},
    fs::{self, File},
    path::PathBuf,
};

use clap::Parser;
use eyre::WrapErr;
use rgpu_guard::render_pass::RenderPassCreateInfo;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod graph_file;

use graph_file::GraphFile;

#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Clone,
    Copy,
    Default,
    clap::ValueEnum,
)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //Off never reaches a filter; clamp to the lowest level anyway
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Validate a TOML render-graph description.
#[derive(clap::Parser, Debug)]
struct CliArgs {
    /// Render-graph TOML file
    graph: PathBuf,
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    /// Also check the graph's [framebuffer] section
    #[arg(short, long)]
    framebuffer: bool,
    /// Print nothing on success
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(level: TracingLogLevel) -> eyre::Result<()> {
    if level == TracingLogLevel::Off {
        return Ok(());
    }

    let app_dirs =
        directories::ProjectDirs::from("", "parengus", "graph-check");
    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    fs::create_dir_all(&log_dir)?;

    let mut log_file_path = log_dir;
    log_file_path.push("log-file");
    log_file_path.set_extension("txt");
    let log_file = File::create(&log_file_path)?;
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let level_filter =
        tracing_subscriber::filter::LevelFilter::from_level(level.into());
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(level_filter);

    tracing_subscriber::registry()
        .with(stdout_log.and_then(file_log))
        .init();

    tracing::debug!("log_file_path: {}", log_file_path.display());
    Ok(())
}

fn summarize(info: &RenderPassCreateInfo) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "attachments:")?;
    for (index, attachment) in info.attachments().iter().enumerate() {
        let cleared = if attachment.is_cleared() {
            " (cleared)"
        } else {
            ""
        };
        writeln!(
            out,
            "  [{index}] {} {:?} samples={:?}{cleared}",
            attachment.id(),
            attachment.format(),
            attachment.sample_count(),
        )?;
    }
    writeln!(out, "subpasses:")?;
    for (index, subpass) in info.subpasses().iter().enumerate() {
        let indices = |refs: &[rgpu_guard::ash::vk::AttachmentReference]| {
            refs.iter().map(|r| r.attachment).collect::<Vec<_>>()
        };
        let depth = subpass
            .depth_stencil_attachment()
            .map(|r| r.attachment);
        writeln!(
            out,
            "  [{index}] input={:?} color={:?} resolve={:?} \
             depth_stencil={depth:?} preserve={:?}",
            indices(subpass.input_attachments()),
            indices(subpass.color_attachments()),
            indices(subpass.resolve_attachments()),
            subpass.preserve_attachments(),
        )?;
    }
    writeln!(out, "dependencies:")?;
    for dependency in info.dependencies() {
        let endpoint = |subpass: u32| {
            if subpass == rgpu_guard::ash::vk::SUBPASS_EXTERNAL {
                "external".to_owned()
            } else {
                subpass.to_string()
            }
        };
        writeln!(
            out,
            "  {} -> {} stages {:?} -> {:?}",
            endpoint(dependency.src_subpass),
            endpoint(dependency.dst_subpass),
            dependency.src_stage_mask,
            dependency.dst_stage_mask,
        )?;
    }
    Ok(out)
}

fn main() -> eyre::Result<()> {
    let cli_args = CliArgs::parse();
    init_tracing(cli_args.tracing_log_level)?;
    tracing::debug!("cli_args: {:#?}", cli_args);

    let source = fs::read_to_string(&cli_args.graph)
        .wrap_err_with(|| format!("reading {}", cli_args.graph.display()))?;
    let graph = GraphFile::parse(&source)
        .wrap_err_with(|| format!("parsing {}", cli_args.graph.display()))?;
    let info = graph.render_pass_info()?;
    tracing::info!(
        "Render graph has {} attachment(s), {} subpass(es)",
        info.attachments().len(),
        info.subpass_count()
    );

    if cli_args.framebuffer {
        graph.check_framebuffer(&info)?;
        tracing::info!("Framebuffer is compatible");
    }

    if !cli_args.quiet {
        print!("{}", summarize(&info)?);
        if cli_args.framebuffer {
            println!("framebuffer: compatible");
        }
    }

    Ok(())
}
