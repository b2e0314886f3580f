use crate::infra::{build_stack, reviewer, seed_reference_data, ReviewStack};
use benefit_review::clock::{Clock, ManualClock};
use benefit_review::config::{AppEnvironment, ReviewPolicy};
use benefit_review::error::AppError;
use benefit_review::workflows::eligibility::audit::{summarize, write_csv, SYSTEM_ACTOR_NAME};
use benefit_review::workflows::eligibility::transitions::ProofReviewError;
use benefit_review::workflows::eligibility::{
    ApplicationId, AuditEntry, CertificationInput, CertificationStatus, InMemoryObjectStorage,
    ObjectStorage, SubmissionMethod, TransitionOutcome, UploadedFile, User, UserId,
};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum TimelineFormat {
    #[default]
    Text,
    Csv,
    Json,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Output format for the audit timeline.
    #[arg(long, value_enum, default_value_t = TimelineFormat::Text)]
    pub(crate) format: TimelineFormat,
    /// Print every audit record instead of the deduplicated timeline.
    #[arg(long)]
    pub(crate) raw: bool,
    /// Write the timeline to a file instead of stdout.
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
    /// Starting timestamp for the scripted clock (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) start: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct TimelineLine {
    timestamp: DateTime<Utc>,
    kind: &'static str,
    action: String,
    actor: String,
    summary: String,
}

pub(crate) fn run(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        format,
        raw,
        output,
        start,
    } = args;
    let narrate = format == TimelineFormat::Text || output.is_some();

    let clock = Arc::new(ManualClock::starting_at(start.unwrap_or_else(Utc::now)));
    let stack = build_stack(
        &ReviewPolicy::default(),
        AppEnvironment::Development,
        clock.clone(),
    );
    let application_id = run_script(&stack, &clock, narrate)?;

    let entries = if raw {
        stack.api.timeline.build(&application_id)?
    } else {
        stack.api.timeline.build_deduplicated(&application_id)?
    };
    let actors = stack.api.timeline.actors(&entries)?;

    if narrate {
        println!(
            "\nAudit timeline for application #{} ({} entries{})",
            application_id,
            entries.len(),
            if raw { ", raw" } else { "" }
        );
    }

    match output {
        Some(path) => {
            let file = File::create(&path)?;
            render_timeline(format, &entries, &actors, file)?;
            if narrate {
                println!("  Written to {}", path.display());
            }
        }
        None => render_timeline(format, &entries, &actors, io::stdout().lock())?,
    }
    Ok(())
}

/// Walks the sample application from proof review through automatic approval.
fn run_script(
    stack: &ReviewStack,
    clock: &ManualClock,
    narrate: bool,
) -> Result<ApplicationId, AppError> {
    let id = seed_reference_data(&stack.store, clock.now())?;
    let admin = reviewer();
    let service = &stack.api.transitions;

    if narrate {
        println!("Eligibility review demo");
        println!("  Application #{id} reviewed by {}", admin.full_name());
    }

    report_review(
        narrate,
        "Income proof rejected",
        service.review_proof(
            &id,
            &admin,
            "income",
            "rejected",
            Some("Pay stub is missing the employer name"),
            None,
        ),
    );
    clock.advance(Duration::days(1));
    report_review(
        narrate,
        "Income proof approved",
        service.review_proof(&id, &admin, "income", "approved", None, None),
    );
    report_review(
        narrate,
        "Residency proof approved",
        service.review_proof(&id, &admin, "residency", "approved", None, None),
    );

    clock.advance(Duration::hours(2));
    report(
        narrate,
        "Certification requested",
        &service.request_certification(&id, &admin),
    );
    clock.advance(Duration::seconds(20));
    report(
        narrate,
        "Certification request resent",
        &service.request_certification(&id, &admin),
    );
    for task in stack.queue.drain() {
        if let Err(err) = service.notifications().perform_task(&task) {
            if narrate {
                println!("  Provider email failed: {err}");
            }
        }
    }
    if narrate {
        println!("  Provider emails sent: {}", stack.mailer.sent().len());
    }

    clock.advance(Duration::days(3));
    let stored = stack.storage.store_upload(&UploadedFile {
        filename: "hart-certification.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        bytes: b"%PDF-1.7 signed certification".to_vec(),
    });
    match stored {
        Ok(attachment) => report(
            narrate,
            "Certification received by fax",
            &service.attach_certification(
                &id,
                CertificationInput::SignedId(InMemoryObjectStorage::signed_id_for(&attachment)),
                CertificationStatus::Received,
                &admin,
                SubmissionMethod::Fax,
                Default::default(),
            ),
        ),
        Err(err) => {
            if narrate {
                println!("  Upload failed: {err}");
            }
        }
    }

    clock.advance(Duration::hours(1));
    report(
        narrate,
        "Certification approved",
        &service.update_certification_status_only(
            &id,
            CertificationStatus::Approved,
            &admin,
            None,
            Default::default(),
        ),
    );

    Ok(id)
}

fn report(narrate: bool, label: &str, outcome: &TransitionOutcome) {
    if !narrate {
        return;
    }
    match (&outcome.error, outcome.success) {
        (None, true) => println!("  {label}"),
        (Some(error), true) => println!("  {label} (partial: {error})"),
        (error, false) => println!(
            "  {label} failed: {}",
            error.as_deref().unwrap_or("unknown error")
        ),
    }
    for effect in outcome.side_effects.iter().filter(|effect| !effect.completed) {
        println!(
            "    side effect {} incomplete: {}",
            effect.name,
            effect.error.as_deref().unwrap_or("no detail")
        );
    }
}

fn report_review<T>(narrate: bool, label: &str, result: Result<T, ProofReviewError>) {
    if !narrate {
        return;
    }
    match result {
        Ok(_) => println!("  {label}"),
        Err(err) => println!("  {label} failed: {err}"),
    }
}

fn render_timeline<W: Write>(
    format: TimelineFormat,
    entries: &[AuditEntry],
    actors: &HashMap<UserId, User>,
    mut writer: W,
) -> Result<(), AppError> {
    match format {
        TimelineFormat::Csv => write_csv(entries, actors, writer)?,
        TimelineFormat::Json => {
            let lines = timeline_lines(entries, actors);
            serde_json::to_writer_pretty(&mut writer, &lines)?;
            writeln!(writer)?;
        }
        TimelineFormat::Text => {
            for line in timeline_lines(entries, actors) {
                writeln!(
                    writer,
                    "  {}  {:<13} {:<20} {}",
                    line.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    line.kind,
                    line.actor,
                    line.summary
                )?;
            }
        }
    }
    Ok(())
}

fn timeline_lines(entries: &[AuditEntry], actors: &HashMap<UserId, User>) -> Vec<TimelineLine> {
    entries
        .iter()
        .map(|entry| {
            let actor = entry.actor_id().and_then(|id| actors.get(id));
            TimelineLine {
                timestamp: entry.timestamp(),
                kind: entry.kind(),
                action: entry.action().into_owned(),
                actor: actor
                    .map(User::full_name)
                    .unwrap_or_else(|| SYSTEM_ACTOR_NAME.to_string()),
                summary: summarize(entry, actor),
            }
        })
        .collect()
}
