use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use followsort_bilibili::{BilibiliClient, BilibiliSettings};
use followsort_core::{
    config::Config,
    pipeline::{Pipeline, RunReport},
    ports::FollowPlatform,
    progress::Progress,
    throttled::ThrottledPlatform,
};
use followsort_openai::{OpenAiClassifier, OpenAiSettings};

/// Sort the accounts you follow on Bilibili into AI-chosen follow groups.
#[derive(Debug, Parser)]
#[command(name = "followsort", version)]
struct Cli {
    /// Classify and print the summary without creating or filling any group.
    #[arg(long)]
    dry_run: bool,

    /// Load and validate the settings, print a summary and exit.
    #[arg(long, conflicts_with = "dry_run")]
    check: bool,

    /// Print the final report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Read settings from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    followsort_core::logging::init("followsort")?;

    let cfg = match &cli.env_file {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if cli.check {
        println!("configuration ok");
        for (label, value) in cfg.summary() {
            println!("{:<19}{value}", format!("{label}:"));
        }
        return Ok(());
    }

    let client = BilibiliClient::new(BilibiliSettings::from_config(&cfg))
        .context("cannot set up the bilibili client")?;
    let platform: Arc<dyn FollowPlatform> = Arc::new(ThrottledPlatform::new(
        Arc::new(client),
        cfg.request_delay,
    ));
    let model = Arc::new(
        OpenAiClassifier::new(OpenAiSettings::from_config(&cfg))
            .context("cannot set up the openai client")?,
    );

    let progress = Progress::new(|stage, current, total| {
        eprintln!("[{stage}] {current}/{total}");
    });

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping at the next step");
                cancel.cancel();
            }
        }
    });

    let mut pipeline = Pipeline::new(platform, model, cfg.pipeline(), cfg.classifier(), progress);
    let report = match pipeline.run(cli.dry_run, &cancel).await {
        Ok(report) => report,
        Err(e) => {
            let stats = pipeline.stats();
            eprintln!(
                "run aborted after {} followings and {} assignments",
                stats.total_entities, stats.assigned_entities
            );
            return Err(e).context("followsort run failed");
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    if report.dry_run && !report.summary.is_empty() {
        println!("{}", report.summary.trim_end());
        println!();
    }

    let s = &report.stats;
    println!("followings:        {}", s.total_entities);
    println!("analyzed:          {}", s.analyzed);
    println!("unknown:           {}", s.unknown);
    println!("success rate:      {:.1}%", s.success_rate());
    if !report.dry_run {
        println!("groups created:    {}", s.created_groups);
        println!("groups reused:     {}", s.reused_groups);
        println!("filtered out:      {}", s.filtered_categories);
        println!("failed categories: {}", s.failed_categories);
        println!("assigned:          {}", s.assigned_entities);
        if s.failed_batches > 0 {
            println!(
                "failed:            {} ({} batches)",
                s.failed_entities, s.failed_batches
            );
        }
    }
    if let Some(d) = s.duration().and_then(|d| d.to_std().ok()) {
        println!("duration:          {:.1}s", d.as_secs_f64());
    }
}
