use crate::infra::{parse_date, read_feedback_csv};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use triage_engine::clinical::assessment::{AgeGroup, PatientAssessment};
use triage_engine::clinical::engine::EngineError;
use triage_engine::clinical::feedback::{summarize, FeedbackQuery, FeedbackSummary};
use triage_engine::clinical::rulepack::{
    normalize_topic, CoverageClassifier, LoadSource, PackSource, RuleLoadResult,
};
use triage_engine::clinical::{
    validate_vitals, FsRulePackStore, RuleEngine, RulePack, RulePackResolver, TriageResult,
    TriageScorer,
};
use triage_engine::config::AppConfig;
use triage_engine::error::AppError;
use triage_engine::telemetry::{self, LogSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Tier {
    Primary,
    Community,
}

impl From<Tier> for PackSource {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Primary => PackSource::Primary,
            Tier::Community => PackSource::Community,
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct ResolveArgs {
    /// Chief complaint, in any spelling ("Chest Pain", "chest_pain")
    pub(crate) topic: String,
    /// Override the rule pack storage root
    #[arg(long)]
    pub(crate) root: Option<PathBuf>,
    /// Print the full load result as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct PublishArgs {
    /// Rule pack JSON document to publish
    #[arg(long)]
    pub(crate) file: PathBuf,
    /// Storage tier to write into
    #[arg(long, value_enum, default_value_t = Tier::Primary)]
    pub(crate) tier: Tier,
    /// Topic file name; defaults to the pack's first declared topic
    #[arg(long)]
    pub(crate) topic: Option<String>,
    /// Version directory to publish under
    #[arg(long)]
    pub(crate) pack_version: Option<String>,
    /// Activate the version after publishing (community tier only)
    #[arg(long)]
    pub(crate) activate: bool,
    /// Override the rule pack storage root
    #[arg(long)]
    pub(crate) root: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ActivateArgs {
    /// Published community version to make current
    pub(crate) pack_version: String,
    /// Override the rule pack storage root
    #[arg(long)]
    pub(crate) root: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct TriageScoreArgs {
    /// JSON file holding a patient assessment
    #[arg(long)]
    pub(crate) file: PathBuf,
    /// Also apply the rule pack for this topic
    #[arg(long)]
    pub(crate) topic: Option<String>,
    /// Override the rule pack storage root
    #[arg(long)]
    pub(crate) root: Option<PathBuf>,
    /// Print the triage result as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct StatsArgs {
    /// Feedback CSV export
    #[arg(long)]
    pub(crate) csv: PathBuf,
    /// Restrict to one chief complaint
    #[arg(long)]
    pub(crate) complaint: Option<String>,
    /// Restrict to one age group (adult or pediatric)
    #[arg(long, value_parser = parse_age_group)]
    pub(crate) age_group: Option<AgeGroup>,
    /// Ignore feedback recorded before this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) since: Option<NaiveDate>,
    /// Print the summary as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

fn parse_age_group(raw: &str) -> Result<AgeGroup, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "adult" => Ok(AgeGroup::Adult),
        "pediatric" | "paediatric" => Ok(AgeGroup::Pediatric),
        other => Err(format!("unknown age group '{other}' (expected adult or pediatric)")),
    }
}

/// CLI commands keep stdout for their own output.
fn load_config(root: Option<PathBuf>) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(root) = root {
        config.engine.rule_pack_root = root;
    }
    telemetry::init_with_sink(&config.telemetry, LogSink::Stderr)?;
    Ok(config)
}

pub(crate) fn run_rules_resolve(args: ResolveArgs) -> Result<(), AppError> {
    let config = load_config(args.root)?;
    let store = Arc::new(FsRulePackStore::from_config(&config.engine));
    let resolver = RulePackResolver::new(store, CoverageClassifier::new(config.engine.coverage));

    let result = resolver.resolve(&args.topic).map_err(EngineError::from)?;
    if args.json {
        print_json(&result)?;
    } else {
        render_load_result(&normalize_topic(&args.topic), &result);
    }
    Ok(())
}

pub(crate) fn run_rules_publish(args: PublishArgs) -> Result<(), AppError> {
    let config = load_config(args.root.clone())?;
    let store = FsRulePackStore::from_config(&config.engine);
    let path = publish_from_file(&store, &args)?;
    println!("Published {}", path.display());
    if let (true, Some(version)) = (args.activate, args.pack_version.as_deref()) {
        println!("Activated community version {version}");
    }
    Ok(())
}

pub(crate) fn run_rules_activate(args: ActivateArgs) -> Result<(), AppError> {
    let config = load_config(args.root)?;
    let store = FsRulePackStore::from_config(&config.engine);
    store.activate(&args.pack_version)?;
    info!(version = %args.pack_version, "community version activated");
    println!("Activated community version {}", args.pack_version);
    Ok(())
}

pub(crate) fn run_triage_score(args: TriageScoreArgs) -> Result<(), AppError> {
    let config = load_config(args.root)?;
    let assessment = read_assessment(&args.file)?;
    let scorer = TriageScorer::new(config.engine.conditions);

    let result = match args.topic.as_deref() {
        Some(topic) => {
            let store = Arc::new(FsRulePackStore::from_config(&config.engine));
            let engine = RuleEngine::new(store, &config.engine);
            let rules = engine.apply_rules(topic, &assessment)?;
            if !rules.success {
                println!("No rule coverage for '{topic}': {}", rules.message);
            }
            scorer.score_with_recommendations(&assessment, &rules.recommendations)
        }
        None => scorer.score(&assessment),
    };

    if args.json {
        print_json(&result)?;
    } else {
        render_triage(&result);
    }
    Ok(())
}

pub(crate) fn run_calibration_stats(args: StatsArgs) -> Result<(), AppError> {
    let records = read_feedback_csv(&args.csv)?;
    let query = FeedbackQuery {
        chief_complaint: args.complaint,
        age_group: args.age_group,
        since: args
            .since
            .map(|date| date.and_time(NaiveTime::MIN).and_utc()),
        limit: None,
    };
    let matching = records
        .into_iter()
        .filter(|record| query.matches(record))
        .collect::<Vec<_>>();

    let summary = summarize(&matching);
    if args.json {
        print_json(&summary)?;
    } else {
        render_summary(&summary);
    }
    Ok(())
}

pub(crate) fn publish_from_file(
    store: &FsRulePackStore,
    args: &PublishArgs,
) -> Result<PathBuf, AppError> {
    let activation = match (args.activate, args.tier, args.pack_version.as_deref()) {
        (false, _, _) => None,
        (true, Tier::Community, Some(version)) => Some(version),
        (true, _, _) => {
            return Err(AppError::Input(
                "--activate needs --tier community and --pack-version".to_string(),
            ))
        }
    };

    let raw = fs::read_to_string(&args.file)?;
    let pack: RulePack = serde_json::from_str(&raw)
        .map_err(|err| AppError::Input(format!("{}: {err}", args.file.display())))?;

    let topic = match args.topic.as_deref() {
        Some(topic) => topic.to_string(),
        None => pack
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.topics.first().cloned())
            .ok_or_else(|| {
                AppError::Input(format!("pack {} declares no topics; pass --topic", pack.id))
            })?,
    };

    let path = store.publish(
        args.tier.into(),
        &topic,
        args.pack_version.as_deref(),
        &pack,
    )?;
    info!(pack = %pack.id, path = %path.display(), "rule pack published");

    if let Some(version) = activation {
        store.activate(version)?;
    }
    Ok(path)
}

pub(crate) fn read_assessment(path: &Path) -> Result<PatientAssessment, AppError> {
    let raw = fs::read_to_string(path)?;
    let assessment: PatientAssessment = serde_json::from_str(&raw)
        .map_err(|err| AppError::Input(format!("{}: {err}", path.display())))?;
    validate_vitals(&assessment.vitals)?;
    Ok(assessment)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| AppError::Input(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}

fn render_load_result(topic: &str, result: &RuleLoadResult) {
    let source = match result.source {
        LoadSource::Primary => "primary",
        LoadSource::Community => "community",
        LoadSource::FallbackNeeded => "fallback-needed",
    };
    println!("Rule pack resolution for '{topic}'");
    println!(
        "- source {source} | coverage {} | success {}",
        result.coverage, result.success
    );
    if let Some(pack) = &result.rule_pack {
        println!(
            "- pack {} v{} ({} rules)",
            pack.id,
            pack.version,
            pack.rules.len()
        );
    }
    println!("- {}", result.message);
}

pub(crate) fn render_triage(result: &TriageResult) {
    println!(
        "Triage {} (priority {:?}) -> {}",
        result.color.label(),
        result.priority,
        result.recommended_action
    );
    match result.map {
        Some(map) => println!("- MEWS {} | MAP {map} mmHg", result.mews),
        None => println!("- MEWS {} | MAP unavailable", result.mews),
    }
    if !result.critical_flags.is_empty() {
        println!("Critical flags:");
        for flag in &result.critical_flags {
            println!("  - {flag}");
        }
    }
    println!("Reasons:");
    for reason in &result.reasons {
        println!("  - {reason}");
    }
}

pub(crate) fn render_summary(summary: &FeedbackSummary) {
    println!("Feedback summary ({} records, de-identified)", summary.records);
    println!("Coverage by chief complaint:");
    for entry in &summary.coverage {
        println!(
            "  - {}: {} records | {} diagnoses | adult {} / pediatric {}",
            entry.chief_complaint,
            entry.feedback_count,
            entry.distinct_diagnoses,
            entry.adult,
            entry.pediatric
        );
    }
    println!("Diagnoses:");
    for entry in &summary.diagnoses {
        println!(
            "  - {}: {} total | {} improved | {} worsened | {} diagnosed | {:.0}% favourable",
            entry.diagnosis,
            entry.outcomes.total,
            entry.outcomes.improved,
            entry.outcomes.worsened,
            entry.outcomes.diagnosed,
            entry.favourable_rate * 100.0
        );
    }
    println!("Weekly rollup:");
    for bucket in &summary.weekly {
        println!(
            "  - week of {}: {} records | top {}",
            bucket.period_start,
            bucket.outcomes.total,
            bucket.top_diagnoses.join(", ")
        );
    }
}
