use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;

use crate::context::AppContext;
use crate::launcher::CommandLauncher;
use crate::prepare::{PreparePool, TargetSize};
use crate::state::{Collaborators, ViewerState};
use crate::workset::FilePair;

mod context;
mod error;
mod gui;
mod launcher;
mod mover;
mod prepare;
mod queue;
mod resolver;
mod state;
mod workset;

const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("APP_GIT_HASH"), ")");

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    long_version = LONG_VERSION,
    about = "Sort videos into category folders by looking at their contact sheets.",
    long_about = None
)]
struct Cli {
    /// Folder holding the videos and the contact-sheet folder.
    root: PathBuf,

    /// Name prefix of the contact-sheet folder.
    #[arg(long, value_name = "PREFIX")]
    marker: Option<String>,
    /// Suffix appended to a video filename to get its sheet.
    #[arg(long)]
    suffix: Option<String>,
    /// Folder under ROOT that receives sorted pairs.
    #[arg(long, value_name = "DIR")]
    keep_dir: Option<String>,
    /// Player command used for P/Enter.
    #[arg(long, value_name = "CMD")]
    player: Option<String>,
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
    /// Print the pairs that would be shown and exit.
    #[arg(long)]
    list: bool,
}

impl Cli {
    fn validate(&self) -> Result<(), String> {
        if self.workers == Some(0) {
            return Err("--workers must be at least 1".to_string());
        }
        for (flag, value) in [("--marker", &self.marker), ("--suffix", &self.suffix), ("--keep-dir", &self.keep_dir)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(format!("{} must not be empty", flag));
            }
        }
        if let Some(dir) = &self.keep_dir
            && (dir.contains('/') || dir.contains('\\') || dir == "..")
        {
            return Err("--keep-dir must be a plain folder name".to_string());
        }
        Ok(())
    }

    fn apply(&self, ctx: &mut AppContext) {
        let cfg = &mut ctx.config;
        if let Some(marker) = &self.marker {
            cfg.layout.marker_prefix = marker.clone();
        }
        if let Some(suffix) = &self.suffix {
            cfg.layout.image_suffix = suffix.clone();
        }
        if let Some(keep) = &self.keep_dir {
            cfg.layout.keep_dir = keep.clone();
        }
        if let Some(player) = &self.player {
            cfg.player.command = Some(player.clone());
            cfg.player.args.clear();
        }
        if self.workers.is_some() {
            cfg.pipeline.workers = self.workers;
        }
    }
}

fn print_pairs(pairs: &[FilePair]) {
    for pair in pairs {
        println!("{}\t{}", pair.video_path.display(), pair.image_path.display());
    }
    println!("{} pairs", pairs.len());
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut ctx = AppContext::init().context("loading configuration")?;
    cli.apply(&mut ctx);

    let layout = ctx.config.layout.clone();
    let found = resolver::canonical_root(&cli.root)
        .and_then(|root| resolver::resolve(&root, &layout).map(|pairs| (root, pairs)));
    let (root, pairs) = match found {
        Ok(found) => found,
        Err(e) if e.is_fatal() => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ctx.shutdown();
            return Ok(ExitCode::from(1));
        }
        Err(e) => return Err(e.into()),
    };

    if cli.list {
        print_pairs(&pairs);
        ctx.shutdown();
        return Ok(ExitCode::SUCCESS);
    }

    let pipeline = ctx.config.pipeline.clone();
    let quit = Arc::new(AtomicBool::new(false));
    let (results_tx, results_rx) = queue::load_queue(pipeline.queue_capacity, quit.clone());
    let mut pool = PreparePool::start(pipeline.worker_count(), results_tx, quit.clone())
        .context("starting prepare workers")?;

    let initial_target = TargetSize::new(
        ctx.config.gui.width.unwrap_or(1280),
        ctx.config.gui.height.unwrap_or(800),
    );
    let collab = Collaborators {
        jobs: pool.sender(),
        results: results_rx,
        launcher: Box::new(CommandLauncher::new(&ctx.config.player)),
    };
    let state = ViewerState::new(root, pairs, layout, pipeline, initial_target, collab);

    let ctx = Arc::new(ctx);
    log::info!("Launching viewer...");
    let gui_result = gui::GuiApp::new(ctx.clone(), state).run();

    quit.store(true, Ordering::Release);
    pool.shutdown();
    ctx.shutdown();

    gui_result.map_err(|e| anyhow::anyhow!("GUI error: {}", e))?;
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = cli.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::from(1);
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
