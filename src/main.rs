use clap::Parser;
use console::style;
use env_logger::Env;
use std::sync::Arc;

use sentra::cli::{Args, KindArg};
use sentra::config::ConfigSnapshot;
use sentra::checks::{KeywordProvider, LexicalUrlProvider};
use sentra::deep::PersuasionPredictor;
use sentra::ensemble::{CharGramPredictor, PredictorBackend, TabularPredictor, TokenPredictor};
use sentra::models::{Branch, FinalVerdict, RiskLevel, ScanTarget};
use sentra::pipeline::ScanPipeline;

fn level_style(level: RiskLevel) -> console::StyledObject<&'static str> {
    match level {
        RiskLevel::Safe => style("SAFE").green(),
        RiskLevel::Low => style("LOW").green(),
        RiskLevel::Medium => style("MEDIUM").yellow(),
        RiskLevel::High => style("HIGH").red(),
        RiskLevel::Critical => style("CRITICAL").red().bold(),
    }
}

fn print_verdict(verdict: &FinalVerdict) {
    println!();
    println!("{}", style("SCAN VERDICT").bold().underlined());
    println!("Target:     {}", verdict.target.id);
    println!("Branch:     {}", verdict.target.branch);
    println!("Risk level: {}", level_style(verdict.risk_level));
    println!(
        "Risk score: {:.3} (confidence {:.2}, interval [{:.2}, {:.2}])",
        verdict.risk_score,
        verdict.confidence,
        verdict.confidence_interval.lower,
        verdict.confidence_interval.upper
    );
    if let Some(ref fired) = verdict.policy_override {
        println!(
            "Override:   rule '{}' (priority {})",
            style(&fired.rule).cyan(),
            fired.priority
        );
    }
    if verdict.degraded {
        println!("{}", style("Note: scan degraded, see findings").yellow());
    }

    if !verdict.findings.is_empty() {
        println!();
        println!("{}", style("FINDINGS").bold());
        for finding in verdict.findings.iter().take(10) {
            println!("  [{}] {}", finding.category, finding.detail);
        }
        if verdict.findings.len() > 10 {
            println!("  ... and {} more", verdict.findings.len() - 10);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let log_level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let snapshot = match &args.config {
        Some(path) => ConfigSnapshot::load(path)?,
        None => ConfigSnapshot::default(),
    };

    let target = if let Some(path) = &args.file {
        let bytes = std::fs::read(path)?;
        ScanTarget::file_from_bytes(&bytes, Branch::Online)
    } else {
        let raw = args.target.as_deref().unwrap_or_default();
        match args.kind {
            KindArg::Url => ScanTarget::url(raw, Branch::Online),
            KindArg::Message => ScanTarget::message(raw, Branch::Online),
            KindArg::File => ScanTarget::file_from_hash(raw, Branch::Online),
        }
    };
    let target = match args.branch {
        Some(hint) => target.with_branch(hint.into()),
        None => target,
    };

    let mut pipeline = ScanPipeline::new();
    pipeline
        .register_provider(Arc::new(LexicalUrlProvider::new()?))
        .register_provider(Arc::new(KeywordProvider::new()?))
        .register_stage1(Arc::new(CharGramPredictor::new(PredictorBackend::Local)))
        .register_stage1(Arc::new(TokenPredictor::new(PredictorBackend::Local)))
        .register_stage1(Arc::new(TabularPredictor::new(PredictorBackend::Local)))
        .register_stage2(Arc::new(PersuasionPredictor::new()?));

    let verdict = pipeline.run_scan(&target, &snapshot).await?;

    print_verdict(&verdict);

    if let Some(path) = &args.output {
        log::info!("Writing verdict JSON to {:?}", path);
        std::fs::write(path, serde_json::to_string_pretty(&verdict)?)?;
    }

    Ok(())
}
