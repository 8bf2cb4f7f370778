mod commands;

use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use commands::Command;
use dwarf_annotator_core::{
    load_configured, AppConfig, CutoutSource, ImageCompositor, LabelStore, Outcome, Result,
    Session,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::Status => run_status(&config),
        Commands::Render { index, output } => run_render(&config, index, &output),
        Commands::Label { frame } => run_label(&config, &frame),
    }
}

fn load_dataset(config: &AppConfig) -> Result<Arc<dyn CutoutSource>> {
    Ok(Arc::new(load_configured(&config.sources)?))
}

fn run_init(config: &AppConfig) -> Result<()> {
    let dataset = load_dataset(config)?;
    let store = LabelStore::new(&config.store, &config.labeling);
    if store.initialize(&dataset.catalogue_ids())? {
        println!("created {} with {} objects", store.path().display(), dataset.len());
    } else {
        println!("{} already exists, left untouched", store.path().display());
    }
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<()> {
    let store = LabelStore::new(&config.store, &config.labeling);
    let total = store.read_all()?.len();
    let complete = store.count_complete()?;
    println!("{complete}/{total} complete, {} remaining", total - complete);
    Ok(())
}

fn run_render(config: &AppConfig, index: usize, output: &Path) -> Result<()> {
    let compositor =
        ImageCompositor::from_config(&config.display, &config.sources, load_dataset(config)?)?;
    let frame = compositor.render(index)?;
    frame.save_png(output)?;
    for cell in frame.cells.iter().filter(|cell| cell.status.is_placeholder()) {
        println!("  {} ({}, {}): {}", cell.view, cell.row, cell.col, cell.status.label());
    }
    println!("wrote {} for {}", output.display(), frame.object_id);
    Ok(())
}

fn run_label(config: &AppConfig, frame_path: &Path) -> Result<()> {
    let mut session = Session::open(config, load_dataset(config)?)?;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut rendered = None;

    while !session.is_complete() {
        if rendered != session.current() {
            session.render_current()?.save_png(frame_path)?;
            rendered = session.current();
            println!("{}", session.progress()?.title(config.display.show_object_id));
            println!("  frame: {}", frame_path.display());
        }

        let stage = session.state().stage;
        print!("{} {} > ", stage.question(), commands::choices(stage));
        io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        match commands::parse(&line?, stage) {
            Command::Quit => break,
            Command::Skip => {
                let index = session.skip()?;
                println!("  skipped object {index}");
            }
            Command::Unknown(text) => println!("  unrecognised answer `{text}`"),
            Command::Answer(event) => match session.handle(event) {
                Ok(Outcome::Committed { object_id, .. }) => println!("  saved {object_id}"),
                Ok(Outcome::Skipped { object_id, .. }) => {
                    println!("  {object_id} was labelled by someone else, skipped")
                }
                Ok(Outcome::Ignored) => println!("  not applicable here"),
                Ok(Outcome::Updated) => {}
                Err(err) if err.is_retryable() => {
                    println!("  {err}; press enter to retry");
                }
                Err(err) if err.is_commit_scoped() => {
                    tracing::error!(error = %err, "commit rejected");
                    println!("  {err}; nothing was saved, `s` skips this object, `q` quits");
                }
                Err(err) => return Err(err),
            },
        }
    }

    println!("{}", session.progress()?.title(config.display.show_object_id));
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Dwarf galaxy cutout annotator", long_about = None)]
struct Cli {
    /// TOML configuration file; `DWARF_ANNOTATE_*` variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the label store from the dataset catalogue.
    Init,
    /// Print how much of the catalogue is labelled.
    Status,
    /// Render one object's composite frame to a PNG file.
    Render {
        /// Catalogue index of the object.
        #[arg(short, long)]
        index: usize,
        /// Output PNG path.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Label queued objects interactively from stdin.
    Label {
        /// PNG file rewritten with the current object's frame.
        #[arg(short, long, default_value = "current_frame.png")]
        frame: PathBuf,
    },
}
