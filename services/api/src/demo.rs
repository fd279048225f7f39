use crate::commands::{render_summary, render_triage};
use crate::infra::InMemoryFeedbackRepository;
use chrono::Utc;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use triage_engine::clinical::assessment::{PatientAssessment, Sample, Socrates, Vitals};
use triage_engine::clinical::calibration::InMemoryCalibrationStore;
use triage_engine::clinical::feedback::{FeedbackOutcome, FeedbackQuery};
use triage_engine::clinical::rulepack::synth::{synthesize, RuleDraft};
use triage_engine::clinical::rulepack::{PackSource, StoreError};
use triage_engine::clinical::service::{DecisionOutcome, PredictionRef};
use triage_engine::clinical::{
    ClinicalFeatures, DecisionRequest, DecisionService, FeedbackSubmission, FsRulePackStore,
    RulePack,
};
use triage_engine::config::EngineConfig;
use triage_engine::error::AppError;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Storage root for the demo packs. Defaults to a fresh temporary directory.
    #[arg(long)]
    pub(crate) root: Option<PathBuf>,
    /// Confirmed outcomes fed back for the top recommendation
    #[arg(long, default_value_t = 3)]
    pub(crate) confirmations: u32,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let root = args.root.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("triage-demo-{}", Utc::now().timestamp_millis()))
    });
    let config = EngineConfig {
        rule_pack_root: root.clone(),
        ..EngineConfig::default()
    };

    println!("Clinical decision engine demo");
    println!("Rule packs under {}", root.display());

    let store = FsRulePackStore::from_config(&config);
    publish_once(&store, PackSource::Primary, None, &chest_pain_pack())?;
    publish_once(&store, PackSource::Community, Some("demo"), &fever_pack())?;
    store.activate("demo")?;

    let service = DecisionService::new(
        Arc::new(store),
        Arc::new(InMemoryFeedbackRepository::default()),
        Arc::new(InMemoryCalibrationStore::new()),
        &config,
    );

    println!("\nResolution");
    for topic in ["Chest Pain", "fever", "rash"] {
        let result = service.resolve(topic, false).await?;
        let pack = result
            .rule_pack
            .as_ref()
            .map(|pack| format!("{} ({} rules)", pack.id, pack.rules.len()))
            .unwrap_or_else(|| "no pack".to_string());
        println!(
            "- {topic}: {} coverage | {pack} | {}",
            result.coverage, result.message
        );
    }

    let request = DecisionRequest {
        topic: "chest pain".to_string(),
        assessment: demo_assessment(),
        features: None,
    };

    println!("\nInitial decision");
    let first = service.decide(request.clone()).await?;
    render_triage(&first.triage);
    render_recommendations(&first);

    let Some(top) = first.recommendations.first() else {
        println!("No recommendations; skipping the feedback loop");
        return Ok(());
    };
    let condition_code = top.recommendation.condition_code.clone();
    let base = top.recommendation.confidence;
    let source_pack = first.rules.rule_pack_id.clone().unwrap_or_default();
    let features = ClinicalFeatures::from_assessment("chest pain", &demo_assessment());

    println!("\nFeedback loop");
    for index in 0..=args.confirmations {
        // The final submission refutes the prediction.
        let confirmed = index < args.confirmations;
        let diagnosis = if confirmed {
            condition_code.clone()
        } else {
            "K21.0".to_string()
        };
        let receipt = service.submit_feedback(FeedbackSubmission {
            session_id: format!("demo-{index}"),
            submitted_by: None,
            confirmed_diagnosis: diagnosis,
            outcome: if confirmed {
                FeedbackOutcome::Diagnosed
            } else {
                FeedbackOutcome::Improved
            },
            features: features.clone(),
            prediction: Some(PredictionRef {
                condition_code: condition_code.clone(),
                predicted_confidence: base,
                source_pack: source_pack.clone(),
            }),
        })?;
        if let Some(modifier) = receipt.modifier {
            println!(
                "- {} -> {}/{} confirmed/refuted | confidence {:.3} (base {:.3})",
                receipt.record.confirmed_diagnosis,
                modifier.successes,
                modifier.failures,
                modifier.adjusted_confidence,
                modifier.base_confidence
            );
        }
    }

    println!("\nCalibrated decision");
    let second = service.decide(request).await?;
    render_recommendations(&second);

    println!();
    let summary = service.feedback_summary(&FeedbackQuery::default())?;
    render_summary(&summary);
    Ok(())
}

fn publish_once(
    store: &FsRulePackStore,
    source: PackSource,
    version: Option<&str>,
    pack: &RulePack,
) -> Result<(), AppError> {
    let topic = pack
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.topics.first().cloned())
        .unwrap_or_default();
    match store.publish(source, &topic, version, pack) {
        Ok(path) => println!("- published {} -> {}", pack.id, path.display()),
        Err(StoreError::Conflict { path }) => {
            println!("- {} already published at {}", pack.id, path.display())
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn render_recommendations(outcome: &DecisionOutcome) {
    println!("Recommendations ({} rules applied):", outcome.rules.rules.len());
    for item in outcome.recommendations.iter().take(5) {
        println!(
            "  - [p{}] {} {} ({}): {} | confidence {:.3} -> {:.3} ({:?})",
            item.recommendation.priority,
            item.recommendation.triage.label(),
            item.recommendation.rule_id,
            item.recommendation.condition_code,
            item.recommendation.advice,
            item.calibrated.base,
            item.calibrated.confidence,
            item.calibrated.basis
        );
    }
}

type DraftEntry<'a> = (&'a str, &'a [&'a str], u8, Option<&'a str>);

fn drafts(entries: &[DraftEntry<'_>]) -> Vec<RuleDraft> {
    entries
        .iter()
        .map(|(name, conditions, priority, code)| {
            let draft = RuleDraft::new(
                *name,
                conditions.iter().map(|condition| condition.to_string()).collect(),
                *priority,
            );
            match code {
                Some(code) => draft.with_condition_code(*code),
                None => draft,
            }
        })
        .collect()
}

fn chest_pain_pack() -> RulePack {
    let entries: &[DraftEntry<'_>] = &[
        ("Chest pain with shock", &["chest pain", "hypotension"], 1, Some("R57.0")),
        ("Chest pain with hypoxia", &["chest pain", "hypoxia"], 1, Some("I26.9")),
        ("Chest pain with tachycardia", &["chest pain", "tachycardia"], 2, Some("I21.9")),
        ("Chest pain with dyspnea", &["chest pain", "shortness of breath"], 2, Some("I50.9")),
        ("Hypertensive chest pain", &["chest pain", "hypertension"], 2, Some("I16.1")),
        ("Altered consciousness", &["altered mental status"], 1, None),
        ("Tachypnea", &["tachypnea"], 2, None),
        ("Febrile chest pain", &["chest pain", "fever"], 3, Some("I30.9")),
        ("Bradycardia", &["bradycardia"], 2, None),
        ("Serial ECG", &[], 3, None),
        ("Pain reassessment", &[], 3, None),
    ];
    synthesize("chest_pain", "curated", "1.0.0", drafts(entries), Utc::now())
}

fn fever_pack() -> RulePack {
    let entries: &[DraftEntry<'_>] = &[
        ("Febrile tachycardia", &["fever", "tachycardia"], 1, Some("A41.9")),
        ("Fever with hypotension", &["fever", "hypotension"], 1, Some("A41.9")),
        ("Fever workup", &["fever"], 2, Some("R50.9")),
        ("Fever with tachypnea", &["fever", "tachypnea"], 2, Some("J18.9")),
        ("Hydration review", &[], 3, None),
        ("Antipyretic review", &[], 3, None),
    ];
    synthesize("fever", "community", "demo", drafts(entries), Utc::now())
}

fn demo_assessment() -> PatientAssessment {
    PatientAssessment {
        vitals: Vitals {
            hr: Some(112),
            rr: Some(22),
            sbp: Some(132),
            dbp: Some(84),
            spo2: Some(93),
            temp: Some(37.1),
            gcs: Some(15),
        },
        sample: Sample {
            signs_symptoms: vec!["diaphoresis".to_string(), "nausea".to_string()],
            past_history: vec!["diabetes".to_string()],
            ..Sample::default()
        },
        socrates: Socrates {
            site: Some("central chest".to_string()),
            character: Some("pressure".to_string()),
            severity: Some(7),
            ..Socrates::default()
        },
        ..PatientAssessment::default()
    }
}
