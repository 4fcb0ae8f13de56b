//! Job queue command handlers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use edgeprov_core::{BatchReport, CoreError, JobState, JobTarget, JobType, ProvisioningJob};
use serde_json::Map;
use tabled::Tabled;

use crate::cli::{EnqueueArgs, JobsArgs, JobsCommand};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Requested")]
    requested: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl JobRow {
    fn new(job: &ProvisioningJob, color: bool) -> Self {
        Self {
            id: job.id.to_string(),
            job_type: job.job_type.to_string(),
            target: job.target.to_string(),
            state: output::job_state(job.state, color),
            attempts: format!("{}/{}", job.attempts, job.max_attempts),
            requested: timestamp(&job.requested_at),
            error: job.error_message.as_deref().map(truncate).unwrap_or_default(),
        }
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(message: &str) -> String {
    const MAX: usize = 48;
    if message.chars().count() <= MAX {
        message.to_owned()
    } else {
        let head: String = message.chars().take(MAX - 1).collect();
        format!("{head}…")
    }
}

fn detail(job: &ProvisioningJob, color: bool) -> String {
    let mut lines = vec![
        format!("ID:        {}", job.id),
        format!("Type:      {}", job.job_type),
        format!("Target:    {}", job.target),
        format!("State:     {}", output::job_state(job.state, color)),
        format!("Attempts:  {}/{}", job.attempts, job.max_attempts),
        format!("Requested: {}", timestamp(&job.requested_at)),
        format!(
            "Executed:  {}",
            job.executed_at.as_ref().map_or_else(|| "-".into(), timestamp)
        ),
    ];
    if let Some(error) = &job.error_message {
        lines.push(format!("Error:     {error}"));
    }
    if !job.payload.is_empty() {
        lines.push(output::heading("Payload:", color));
        for (key, value) in &job.payload {
            lines.push(format!("  {key} = {value}"));
        }
    }
    lines.join("\n")
}

fn batch_detail(report: &BatchReport) -> String {
    let mut lines = vec![format!(
        "Picked: {}  Succeeded: {}  Failed: {}",
        report.picked, report.succeeded, report.failed
    )];
    for (id, error) in &report.errors {
        lines.push(format!("  {id}: {error}"));
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: JobsArgs, ctx: &Context) -> Result<(), CliError> {
    let dispatcher = ctx.dispatcher()?;

    match args.command {
        JobsCommand::Enqueue(args) => {
            let (job_type, target, payload) = enqueue_request(args)?;
            let id = dispatcher.enqueue(job_type, target, payload)?;
            let job = dispatcher
                .store()
                .get(id)?
                .ok_or_else(|| CoreError::JobNotFound { id: id.to_string() })?;
            let out = output::render_single(ctx.output, &job, |j| detail(j, ctx.color), |j| j.id.to_string());
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        JobsCommand::List { state, job_type } => {
            let state = state.as_deref().map(parse_state).transpose()?;
            let job_type = job_type.as_deref().map(parse_job_type).transpose()?;
            let jobs: Vec<ProvisioningJob> = dispatcher
                .store()
                .list()?
                .into_iter()
                .filter(|j| state.is_none_or(|s| j.state == s))
                .filter(|j| job_type.is_none_or(|t| j.job_type == t))
                .collect();
            let out = output::render_list(
                ctx.output,
                &jobs,
                |j| JobRow::new(j, ctx.color),
                |j| j.id.to_string(),
            );
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        JobsCommand::Show { id } => {
            let id = util::parse_job_id(&id)?;
            let job = dispatcher
                .store()
                .get(id)?
                .ok_or_else(|| CoreError::JobNotFound { id: id.to_string() })?;
            let out = output::render_single(ctx.output, &job, |j| detail(j, ctx.color), |j| j.id.to_string());
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        JobsCommand::Run { limit: _, id: Some(id) } => {
            let id = util::parse_job_id(&id)?;
            let job = dispatcher.execute_id(id).await?;
            let out = output::render_single(ctx.output, &job, |j| detail(j, ctx.color), |j| j.state.to_string());
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        JobsCommand::Run { limit, id: None } => {
            let limit = limit.unwrap_or(ctx.config.dispatcher.batch_size);
            let report = dispatcher.run_pending(limit).await?;
            let out = output::render_single(ctx.output, &report, batch_detail, |r| r.failed.to_string());
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        JobsCommand::Retry { id, run } => {
            let id = util::parse_job_id(&id)?;
            let mut job = dispatcher.requeue(id)?;
            if run {
                job = dispatcher.execute_id(id).await?;
            } else if !ctx.quiet {
                eprintln!("✓ Job {id} queued (attempt {} of {})", job.attempts + 1, job.max_attempts);
            }
            let out = output::render_single(ctx.output, &job, |j| detail(j, ctx.color), |j| j.state.to_string());
            output::print_output(&out, ctx.quiet);
            Ok(())
        }
    }
}

// ── Argument parsing ─────────────────────────────────────────────────

fn enqueue_request(
    args: EnqueueArgs,
) -> Result<(JobType, JobTarget, Map<String, serde_json::Value>), CliError> {
    let job_type = parse_job_type(&args.job_type)?;
    if args.device.is_none() && args.sector.is_none() {
        return Err(CliError::Validation {
            field: "target".into(),
            reason: "give --device or --sector".into(),
        });
    }
    let target = JobTarget {
        device: args.device,
        sector: args.sector,
        subscription: args.subscription,
    };
    let payload = match (args.payload, args.from_file) {
        (Some(raw), _) => util::parse_payload(&raw, "payload")?,
        (None, Some(path)) => util::read_payload_file(&path)?,
        (None, None) => Map::new(),
    };
    Ok((job_type, target, payload))
}

fn parse_job_type(raw: &str) -> Result<JobType, CliError> {
    JobType::from_str(raw).map_err(|_| {
        CliError::from(CoreError::NoHandler {
            job_type: raw.to_owned(),
        })
    })
}

fn parse_state(raw: &str) -> Result<JobState, CliError> {
    JobState::from_str(raw).map_err(|_| CliError::Validation {
        field: "state".into(),
        reason: format!("expected queued, running, success or failed, got '{raw}'"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(job_type: &str) -> EnqueueArgs {
        EnqueueArgs {
            job_type: job_type.into(),
            device: Some("core-1".into()),
            sector: None,
            subscription: Some("SUB-0042".into()),
            payload: Some(r#"{"pppoe_username":"alice"}"#.into()),
            from_file: None,
        }
    }

    #[test]
    fn enqueue_request_builds_target_and_payload() {
        let (job_type, target, payload) = enqueue_request(args("activate_subscription")).unwrap();
        assert_eq!(job_type, JobType::ActivateSubscription);
        assert_eq!(target.device.as_deref(), Some("core-1"));
        assert_eq!(target.subscription.as_deref(), Some("SUB-0042"));
        assert_eq!(payload["pppoe_username"], "alice");
    }

    #[test]
    fn unknown_job_type_lists_known_ones() {
        let err = enqueue_request(args("reboot_everything")).unwrap_err();
        match err {
            CliError::NoHandler { known, .. } => assert!(known.contains("device_healthcheck")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn target_is_required() {
        let mut request = args("device_healthcheck");
        request.device = None;
        assert!(matches!(enqueue_request(request), Err(CliError::Validation { .. })));
    }

    #[test]
    fn long_errors_are_shortened_for_tables() {
        let long = "x".repeat(100);
        assert_eq!(truncate(&long).chars().count(), 48);
        assert_eq!(truncate("short"), "short");
    }
}
