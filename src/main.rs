mod fetcher;
mod parser;
mod pipeline;
mod session;
mod settings;
mod store;
mod transport;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use fetcher::Fetcher;
use parser::extract::Extractor;
use pipeline::Pipeline;
use session::Session;
use settings::Settings;
use store::{FsStore, Store};
use transport::ReqwestTransport;

#[derive(Parser)]
#[command(name = "caselaw_scraper", about = "Kenya Law advanced-search case metadata scraper")]
struct Cli {
    /// Settings file (JSON, TOML or YAML); CASELAW_* env vars override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit the search, fetch every result page, save pages + case_metadata.json (default)
    Run(RunArgs),
    /// Rebuild case_metadata.json from saved page-<n>.html files (no network)
    Extract {
        /// Saved pages, in page order (default: every page-<n>.html in the output dir)
        files: Vec<PathBuf>,
        /// Directory to read pages from and write metadata to
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Print the effective settings as JSON
    Config,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Directory for page-<n>.html and case_metadata.json
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
    /// Number of result pages, including the search page
    #[arg(short = 'n', long)]
    pages: Option<usize>,
    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Search filter start date, e.g. "01 Jan 2022"
    #[arg(long)]
    date_from: Option<String>,
    /// Search filter end date, e.g. "31 Jan 2022"
    #[arg(long)]
    date_to: Option<String>,
    /// Court identifier; repeat for several courts
    #[arg(long = "court")]
    courts: Vec<String>,
}

impl RunArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(dir) = self.out_dir {
            settings.output_dir = dir;
        }
        if let Some(pages) = self.pages {
            settings.page_count = pages;
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout_secs = secs;
        }
        if let Some(from) = self.date_from {
            settings.search.date_from = from;
        }
        if let Some(to) = self.date_to {
            settings.search.date_to = to;
        }
        if !self.courts.is_empty() {
            settings.search.courts = self.courts;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            args.apply(&mut settings);
            run(&settings).await
        }
        Commands::Extract { files, out_dir } => {
            let dir = out_dir.unwrap_or_else(|| settings.output_dir.clone());
            extract(&settings, dir, files)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

async fn run(settings: &Settings) -> anyhow::Result<()> {
    let specs = settings.page_specs()?;
    let transport = ReqwestTransport::new(settings.timeout(), &settings.user_agent)
        .context("Failed to build HTTP client")?;
    let extractor = Extractor::new(&settings.container_selector)?;

    let pb = ProgressBar::new(specs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let mut pipeline = Pipeline::new(
        Fetcher::new(transport),
        extractor,
        FsStore::new(&settings.output_dir),
    )
    .with_progress(pb);
    let mut session = Session::new();

    println!(
        "Fetching {} pages from {} into {}",
        specs.len(),
        settings.base_url,
        settings.output_dir.display()
    );

    match pipeline.run(&specs, &mut session).await {
        Ok(collection) => {
            println!(
                "Saved {} records from {} pages ({} without a delivery date).",
                collection.len(),
                collection.pages(),
                collection.undated()
            );
            Ok(())
        }
        Err(err) => {
            println!(
                "Aborted at page {} of {}; kept {} records from {} pages.",
                err.page,
                err.total,
                err.partial.len(),
                err.partial.pages()
            );
            Err(err.into())
        }
    }
}

fn extract(settings: &Settings, dir: PathBuf, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let mut store = FsStore::new(dir);
    let files = if files.is_empty() {
        store.saved_pages().context("Failed to list saved pages")?
    } else {
        files
    };
    if files.is_empty() {
        println!("No saved pages found. Run 'run' first.");
        return Ok(());
    }

    let extractor = Extractor::new(&settings.container_selector)?;
    let collection = pipeline::rebuild_from_files(&extractor, &files);
    let path = store.save_metadata(collection.records())?;
    println!(
        "Saved {} records from {} pages to {}",
        collection.len(),
        collection.pages(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_override_settings() {
        let cli = Cli::parse_from([
            "caselaw_scraper",
            "run",
            "--pages",
            "2",
            "--out-dir",
            "out",
            "--court",
            "200000",
            "--court",
            "300000",
            "--date-from",
            "01 Mar 2022",
        ]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };

        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.page_count, 2);
        assert_eq!(settings.output_dir, PathBuf::from("out"));
        assert_eq!(settings.search.courts, ["200000", "300000"]);
        assert_eq!(settings.search.date_from, "01 Mar 2022");
        // Flags not given keep the loaded values.
        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.search.date_to, "31 Jan 2022");
    }

    #[test]
    fn no_run_flags_leave_settings_alone() {
        let mut settings = Settings::default();
        RunArgs::default().apply(&mut settings);

        assert_eq!(settings.page_count, 5);
        assert_eq!(settings.search.courts, ["190000"]);
        assert_eq!(settings.output_dir, PathBuf::from("."));
    }
}
