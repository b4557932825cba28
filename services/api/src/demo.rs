use crate::infra::{document_store, stage_function};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use underwriting_ai::config::{AppConfig, PipelineConfig};
use underwriting_ai::error::AppError;
use underwriting_ai::workflows::underwriting::pipeline::DependencyKind;
use underwriting_ai::workflows::underwriting::{
    sample_application, Application, Delivery, InMemoryReportStore, RuleBasedStages,
    StageFunction, StagePipeline, UnderwritingOrchestrator, UnderwritingReport,
    UnderwritingService,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Application JSON to underwrite. Defaults to the bundled LI2025001 sample.
    #[arg(long)]
    pub(crate) application: Option<PathBuf>,
    /// Use the hosted model configured through the environment instead of the rule tables.
    #[arg(long)]
    pub(crate) hosted: bool,
    /// Print the full report as JSON after the summary.
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        application,
        hosted,
        json,
    } = args;

    let application = load_application(application)?;
    let (stages, pipeline_config): (Arc<dyn StageFunction>, PipelineConfig) = if hosted {
        let config = AppConfig::load()?;
        (stage_function(&config)?, config.pipeline)
    } else {
        (Arc::new(RuleBasedStages), PipelineConfig::default())
    };

    let orchestrator = UnderwritingOrchestrator::new(
        stages,
        Arc::new(InMemoryReportStore::new()),
        &pipeline_config,
    );
    let service = UnderwritingService::new(orchestrator, document_store());

    println!("Underwriting workflow demo");
    println!(
        "Application {} for {} (age {}, {} covers, sum assured {})",
        application.application_id,
        application.applicant.name,
        application.applicant.age,
        application.coverage.covers.len(),
        application.coverage.total_sum_assured
    );

    let mut run = match service.stream(application) {
        Ok(run) => run,
        Err(err) => {
            println!("  Submission rejected: {}", err);
            return Ok(());
        }
    };
    println!("Run {}\n", run.handle.run_id());

    while let Some(delivery) = run.listener.recv().await {
        match delivery {
            Delivery::Event(event) => println!(
                "[{:>2}] {:<20} {:<14} {}",
                event.sequence,
                event.stage_name,
                format!("{:?}", event.status),
                event.message
            ),
            Delivery::Lagged { dropped } => println!("  ({} progress events dropped)", dropped),
        }
    }

    let outcome = run.handle.outcome().await;
    match (&outcome.report, &outcome.error) {
        (Some(report), _) => {
            render_report(report);
            if json {
                match serde_json::to_string_pretty(report) {
                    Ok(body) => println!("\n{}", body),
                    Err(err) => println!("\nReport payload unavailable: {}", err),
                }
            }
        }
        (None, Some(error)) => println!("\nRun failed: {}", error),
        (None, None) => println!("\nRun finished without a report"),
    }

    Ok(())
}

fn load_application(path: Option<PathBuf>) -> Result<Application, AppError> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw).map_err(std::io::Error::from)?)
        }
        None => Ok(sample_application()),
    }
}

fn render_report(report: &UnderwritingReport) {
    println!("\nDecision: {}", report.final_decision.label());
    println!(
        "Risk category {} | confidence {:.2}",
        report.risk_category, report.confidence_score
    );
    println!(
        "Premium: base {:.2} -> final {:.2}",
        report.total_base_premium, report.total_final_premium
    );
    println!(
        "Processed in {:.1}s",
        report.application_metadata.processing_time_seconds
    );

    let defaulted = report.sections.defaulted();
    if defaulted == 0 {
        println!("All sections produced by their stages");
    } else {
        println!("{} section(s) filled with defaults:", defaulted);
        for (stage, status) in &report.stage_statuses {
            if report.sections.get(*stage).defaulted {
                println!("  - {} ({})", stage.section(), status.label());
            }
        }
    }
}

pub(crate) fn print_stages() {
    let pipeline = StagePipeline::standard();
    println!("Underwriting stages");
    for stage in pipeline.stages() {
        println!("- {} ({})", stage.key(), stage.role());
        println!("    {}", stage.description());
        for dependency in pipeline.dependencies(stage) {
            let kind = match dependency.kind {
                DependencyKind::Required => "required",
                DependencyKind::Advisory => "advisory",
            };
            println!("    after {} [{}]", dependency.stage.key(), kind);
        }
        let alongside = pipeline.concurrent_with(stage);
        if !alongside.is_empty() {
            let names: Vec<&str> = alongside.iter().map(|stage| stage.key()).collect();
            println!("    runs alongside {}", names.join(", "));
        }
    }
}
