use crate::infra::{demo_catalog, RecordingEventPublisher};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use eco_tasks::error::AppError;
use eco_tasks::workflows::submissions::{
    DecisionOutcome, EvidenceDraft, GeoPoint, HeuristicScorer, InMemorySubmissionStore,
    InMemoryTaskCatalog, Reviewer, ScoreSignals, SettlementOutcome, SubmissionId,
    SubmissionService, TaskId, TaskListing, UserId, VerificationConfig,
};
use std::sync::Arc;

type DemoService = SubmissionService<InMemorySubmissionStore, InMemoryTaskCatalog>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// User id the demo submissions are filed under
    #[arg(long, default_value = "demo-user")]
    pub(crate) user: String,
    /// Skip the manual review portion of the demo
    #[arg(long)]
    pub(crate) skip_review: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { user, skip_review } = args;
    let user = UserId(user);
    let now = Utc::now();

    println!("Eco task verification demo");
    let catalog = Arc::new(demo_catalog());
    let events = Arc::new(RecordingEventPublisher::default());
    let store = Arc::new(InMemorySubmissionStore::default());
    let service = SubmissionService::new(store, catalog, VerificationConfig::default())
        .with_events(events.clone())
        .with_scorer(Arc::new(HeuristicScorer::default()));

    println!("Open tasks:");
    for TaskListing { task, .. } in service.available_tasks(Some(&user), None)? {
        let threshold = task
            .min_confidence
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "default".to_string());
        println!(
            "  - {} ({}, {}): {} points, confidence threshold {}",
            task.id, task.title, task.category, task.base_points, threshold
        );
    }

    println!("\nModerated submissions on previous days");
    for (task, days_ago) in [("task-beach-cleanup", 2), ("task-tree-planting", 1)] {
        let outcome = moderated_submission(
            &service,
            task,
            &user,
            ScoreSignals::new(Some(0.91), Some(0.04), Vec::new()),
            now - Duration::days(days_ago),
        )?;
        render_outcome(&outcome);
    }

    println!("\nScored submission (heuristic scorer)");
    let commute = submit(&service, "task-bike-commute", &user)?;
    let outcome = service.verify(&commute, None).await?;
    render_outcome(&outcome);
    match service.settle(&commute)? {
        SettlementOutcome::AlreadySettled { awarded_at } => {
            println!("  Repeat settlement ignored (awarded at {awarded_at})")
        }
        other => println!("  Unexpected repeat settlement: {other:?}"),
    }

    println!("\nSingle-winner check");
    let late_user = UserId("late-user".to_string());
    match service.start(&TaskId("task-beach-cleanup".to_string()), &late_user) {
        Ok(submission) => println!("  Unexpectedly opened {}", submission.id),
        Err(err) => println!("  {late_user} refused: {err}"),
    }

    if !skip_review {
        println!("\nManual review");
        let survey = submit(&service, "task-solar-survey", &user)?;
        let outcome = service.verify(&survey, None).await?;
        render_outcome(&outcome);

        let outcome = service.decide_at(
            &survey,
            ScoreSignals::new(Some(0.95), Some(0.0), vec!["moderator_checked".to_string()]),
            Reviewer::Person("demo-moderator".to_string()),
            Utc::now(),
        )?;
        render_outcome(&outcome);

        let record = service.verification(&survey)?;
        match serde_json::to_string_pretty(&record) {
            Ok(json) => println!("  Latest verification record:\n{json}"),
            Err(err) => println!("  Verification record unavailable: {err}"),
        }
    }

    let dashboard = service.dashboard(&user)?;
    println!("\nDashboard for {user}");
    println!(
        "- {} points from {} tasks | streak {} days (best {}) | {} awaiting review",
        dashboard.ledger.total_points,
        dashboard.ledger.tasks_completed,
        dashboard.ledger.streak_days,
        dashboard.ledger.streak_best_days,
        dashboard.pending_review
    );
    for progress in &dashboard.category_progress {
        println!(
            "  {}: {}/{} completed",
            progress.category, progress.completed, progress.total
        );
    }
    let still_open = service.available_tasks(Some(&user), None)?;
    println!("{} tasks still open", still_open.len());

    let published = events.events();
    if published.is_empty() {
        println!("Task events: none emitted");
    } else {
        println!("Task events:");
        for event in published {
            println!(
                "  - {:?} {} ({} by {})",
                event.kind, event.submission_id, event.task_id, event.user_id
            );
        }
    }

    Ok(())
}

fn submit(service: &DemoService, task: &str, user: &UserId) -> Result<SubmissionId, AppError> {
    let started = service.start(&TaskId(task.to_string()), user)?;
    let draft = EvidenceDraft {
        image_refs: vec![format!("uploads/{task}/{}.jpg", started.id)],
        description: format!("Demo evidence for {task}"),
        location: GeoPoint::new(52.3676, 4.9041),
        location_text: "Amsterdam".to_string(),
    };
    let submission = service.attach_evidence(&started.id, user, draft)?;
    Ok(submission.id)
}

fn moderated_submission(
    service: &DemoService,
    task: &str,
    user: &UserId,
    signals: ScoreSignals,
    decided_at: DateTime<Utc>,
) -> Result<DecisionOutcome, AppError> {
    let id = submit(service, task, user)?;
    let outcome = service.decide_at(
        &id,
        signals,
        Reviewer::Person("demo-moderator".to_string()),
        decided_at,
    )?;
    Ok(outcome)
}

fn render_outcome(outcome: &DecisionOutcome) {
    let decision = outcome
        .decision
        .map(|decision| decision.label())
        .unwrap_or("settlement only");
    println!(
        "- {} [{}] -> {} ({})",
        outcome.submission.id,
        outcome.submission.task_id,
        outcome.status(),
        decision
    );

    if let Some(snapshot) = &outcome.submission.verification {
        let confidence = snapshot
            .confidence
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        let fraud = snapshot
            .fraud_score
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  confidence {confidence} | fraud {fraud} | flags [{}]",
            snapshot.flags.join(", ")
        );
    }

    if let Some(receipt) = outcome.settlement.as_ref().and_then(SettlementOutcome::receipt) {
        println!(
            "  +{} points -> total {} | streak {} days",
            receipt.points_awarded, receipt.total_points, receipt.streak.days
        );
    }
}
