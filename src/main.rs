use chrono::{Duration, Utc};

use threat_digest::config::Config;
use threat_digest::error::{AppError, Result};
use threat_digest::pipeline::Pipeline;
use threat_digest::report::{collect_digest, render_digest};

enum Command {
    Run,
    Loop,
    Ingest,
    Group,
    Subgroup(Option<String>),
    Cves,
    Report(Option<i64>),
}

fn parse_args(args: &[String]) -> Result<Command> {
    let command = match args.get(1).map(String::as_str) {
        None | Some("--run") => Command::Run,
        Some("--loop") => Command::Loop,
        Some("--ingest") => Command::Ingest,
        Some("--group") => Command::Group,
        Some("--subgroup") => Command::Subgroup(args.get(2).cloned()),
        Some("--cves") => Command::Cves,
        Some("--report") => {
            let hours = match args.get(2) {
                Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                    AppError::Config(format!("--report expects a number of hours, got {:?}", raw))
                })?),
                None => None,
            };
            Command::Report(hours)
        }
        Some(other) => {
            return Err(AppError::Config(format!(
                "Unknown argument {:?}. Usage: threat-digest [--run | --loop | --ingest | --group | --subgroup <category> | --cves | --report [hours]]",
                other
            )))
        }
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (info by default, RUST_LOG overrides)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    // Load configuration
    let config = Config::load()?;

    // The report only reads storage and needs no credentials
    if let Command::Report(hours) = &command {
        let repository = threat_digest::db::Repository::new(&config.db_path).await?;
        let cutoff = hours.map(|h| Utc::now() - Duration::hours(h));
        let digest = collect_digest(&repository, cutoff).await?;
        print!("{}", render_digest(&digest));
        return Ok(());
    }

    let pipeline = match Pipeline::new(config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Cannot start pipeline");
            return Err(e);
        }
    };

    match command {
        Command::Run => {
            let report = pipeline.run_once().await;
            println!(
                "Classified {} articles, created {} subgroups ({} failed steps)",
                report.categories.assigned,
                report.subgroups_created(),
                report.failed_steps.len()
            );
        }
        Command::Loop => pipeline.run_forever().await?,
        Command::Ingest => {
            let report = pipeline.ingest().await;
            println!(
                "Fetched {} entries, stored {}, skipped {} duplicates",
                report.fetched, report.inserted, report.duplicates
            );
        }
        Command::Group => {
            let report = pipeline.group().await?;
            println!(
                "Classified {} of {} articles into {} groups",
                report.assigned, report.candidates, report.saved.groups_created
            );
        }
        Command::Subgroup(Some(category)) => {
            let report = pipeline.subgroup(&category).await?;
            println!(
                "Created {} subgroups for {:?} from {} articles",
                report.subgroups_created, category, report.candidates
            );
        }
        Command::Subgroup(None) => {
            for result in pipeline.subgroup_all().await {
                match result {
                    Ok(report) => println!(
                        "{}: {} subgroups from {} articles",
                        report.category, report.subgroups_created, report.candidates
                    ),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
        Command::Cves => {
            let (mentions, details) = pipeline.cves().await?;
            println!("Recorded {} CVE mentions, refreshed {} CVE records", mentions, details);
        }
        Command::Report(_) => {}
    }

    Ok(())
}
