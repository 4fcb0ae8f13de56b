//! Onboarding command handlers.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use edgeprov_config::{directory_client, load_onboarding_document, resolve_onboarding_secrets};
use edgeprov_core::onboarding::scan::hosts;
use edgeprov_core::onboarding::{CandidateOutcome, OnboardedDevice};
use edgeprov_core::{Directory, OdooDirectory, OnboardingConfig, Orchestrator, ScanReport, SectorPlan, load_profile};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::info;

use crate::cli::{OnboardArgs, OnboardCommand, OutputFormat, ProfileArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Rendering ───────────────────────────────────────────────────────

fn device_line(device: &OnboardedDevice) -> String {
    let mut line = format!("{}  {}  api:{}", device.ip, device.identity, device.api_port);
    if let Some(iface) = &device.mgmt_interface {
        let _ = write!(line, "  mgmt:{iface}");
    }
    if let Some(reg) = &device.registration {
        let _ = write!(line, "  device#{} router#{}", reg.device_id, reg.router_id);
    }
    line
}

fn report_detail(report: &ScanReport, color: bool) -> String {
    let mut lines = vec![
        format!("Subnet:     {}", report.subnet),
        format!("Scanned:    {}", report.scanned),
        format!("Candidates: {}", report.candidates.len()),
    ];
    if !report.completed.is_empty() {
        lines.push(output::heading("Completed:", color));
        lines.extend(report.completed.iter().map(|d| format!("  ✓ {}", device_line(d))));
    }
    if !report.skipped.is_empty() {
        lines.push(output::heading("Skipped:", color));
        lines.extend(report.skipped.iter().map(|s| format!("  - {}  {}", s.ip, s.reason)));
    }
    if !report.failed.is_empty() {
        lines.push(output::heading("Failed:", color));
        lines.extend(report.failed.iter().map(|f| format!("  ✗ {f}")));
        for runbook in report.failed.iter().filter_map(|f| f.runbook.as_ref()) {
            lines.push(String::new());
            lines.push(runbook.to_string());
        }
    }
    lines.join("\n")
}

// ── Profile loading ─────────────────────────────────────────────────

/// Read the onboarding document and apply command-line overrides.
fn read_document(path: &Path, overrides: &[(&str, Option<String>)]) -> Result<Value, CliError> {
    let mut doc = load_onboarding_document(path)?;
    if let Value::Object(map) = &mut doc {
        for (key, value) in overrides {
            if let Some(value) = value {
                map.insert((*key).to_owned(), Value::String(value.clone()));
            }
        }
    }
    Ok(doc)
}

/// Build an orchestrator for the profile: remote profile merged in when
/// the document asks for it, secrets resolved, directory attached.
async fn orchestrator(doc: &Value, ctx: &Context) -> Result<Orchestrator, CliError> {
    let local = OnboardingConfig::from_value(doc.clone())?;
    let local_secrets = resolve_onboarding_secrets(&local)?;
    let directory = directory_client(&local, &local_secrets, ctx.timeout)?.map(|c| Arc::new(OdooDirectory::new(c)));

    let cfg = load_profile(doc, directory.as_deref().map(|d| d as &dyn Directory)).await?;
    let secrets = resolve_onboarding_secrets(&cfg)?;
    let mut orchestrator = Orchestrator::new(cfg, secrets, ctx.connector())?;
    match directory {
        Some(_) if ctx.dry_run => info!("dry run: directory registration disabled"),
        Some(directory) => orchestrator = orchestrator.with_directory(directory),
        None => {}
    }
    Ok(orchestrator)
}

fn scan_progress(ctx: &Context, total: usize) -> Option<ProgressBar> {
    if ctx.quiet || ctx.output != OutputFormat::Table {
        return None;
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    let template = if ctx.dry_run {
        "{spinner:.yellow} (dry-run) probing {msg} [{bar:40.yellow/blue}] {pos}/{len}"
    } else {
        "{spinner:.green} probing {msg} [{bar:40.cyan/blue}] {pos}/{len}"
    };
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        bar.set_style(style.progress_chars("█▓▒░"));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    Some(bar)
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: OnboardArgs, ctx: &Context) -> Result<(), CliError> {
    match args.command {
        OnboardCommand::Scan { profile, subnet } => {
            let ProfileArgs { profile, sector } = profile;
            let doc = read_document(&profile, &[("sector_code", sector), ("mgmt_subnet", subnet)])?;
            let orchestrator = orchestrator(&doc, ctx).await?;
            let subnet = orchestrator.config().mgmt_subnet.clone();
            let total = hosts(&subnet)?.len();

            let prompt = format!("Onboard every device answering on {subnet} ({total} addresses)?");
            if !util::confirm(&prompt, "onboard scan", ctx.yes || ctx.dry_run)? {
                eprintln!("Aborted.");
                return Ok(());
            }

            let progress = scan_progress(ctx, total);
            let report = orchestrator
                .run_scan_with(|ip, open| {
                    if let Some(bar) = &progress {
                        bar.inc(1);
                        bar.set_message(ip.to_string());
                        if open {
                            bar.println(format!("  found {ip}"));
                        }
                    }
                })
                .await;
            if let Some(bar) = &progress {
                bar.finish_and_clear();
            }
            let report = report?;

            let out = output::render_single(
                ctx.output,
                &report,
                |r| report_detail(r, ctx.color),
                |r| r.completed.iter().map(|d| d.ip.to_string()).collect::<Vec<_>>().join("\n"),
            );
            output::print_output(&out, ctx.quiet);

            if report.is_clean() {
                Ok(())
            } else {
                Err(CliError::OnboardingIncomplete {
                    failed: report.failed.len(),
                })
            }
        }

        OnboardCommand::Device { ip, profile } => {
            let ProfileArgs { profile, sector } = profile;
            let doc = read_document(&profile, &[("sector_code", sector)])?;
            let orchestrator = orchestrator(&doc, ctx).await?;

            let prompt = format!("Onboard {ip} as sector {}?", orchestrator.config().sector_code);
            if !util::confirm(&prompt, "onboard device", ctx.yes || ctx.dry_run)? {
                eprintln!("Aborted.");
                return Ok(());
            }

            match orchestrator.onboard(ip).await {
                Ok(CandidateOutcome::Completed(device)) => {
                    let out = output::render_single(ctx.output, &device, device_line, |d| d.identity.clone());
                    output::print_output(&out, ctx.quiet);
                    Ok(())
                }
                Ok(CandidateOutcome::Skipped(skipped)) => {
                    if !ctx.quiet {
                        eprintln!("Skipped {}: {}", skipped.ip, skipped.reason);
                    }
                    Ok(())
                }
                Err(failure) => {
                    if let Some(runbook) = &failure.runbook {
                        let out = output::render_single(ctx.output, runbook, ToString::to_string, |r| {
                            r.commands.join("\n")
                        });
                        output::print_output(&out, ctx.quiet);
                    }
                    Err(failure.into_error(ip).into())
                }
            }
        }

        OnboardCommand::Plan { profile, mgmt_interface } => {
            let doc = read_document(&profile, &[])?;
            let cfg = OnboardingConfig::from_value(doc)?;
            let plan = SectorPlan::from_config(&cfg.routeros.config, mgmt_interface.as_deref())?;
            let commands = plan.render();
            let out = output::render_single(ctx.output, &commands, |c| c.join("\n"), |c| c.join("\n"));
            output::print_output(&out, ctx.quiet);
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use edgeprov_core::onboarding::{CandidateFailure, OnboardingStep, SkippedCandidate};

    use super::*;

    #[test]
    fn overrides_replace_document_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yaml");
        std::fs::write(&path, "mgmt_subnet: 192.168.88.0/24\nsector_code: NORTE\n").unwrap();

        let doc = read_document(
            &path,
            &[("sector_code", Some("SUR".into())), ("mgmt_subnet", None)],
        )
        .unwrap();
        assert_eq!(doc["sector_code"], "SUR");
        assert_eq!(doc["mgmt_subnet"], "192.168.88.0/24");
    }

    #[test]
    fn report_lists_every_outcome() {
        let mut report = ScanReport::new("10.0.0.0/30");
        report.scanned = 2;
        report.candidates = vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)];
        report.completed.push(OnboardedDevice {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            identity: "ISP-NORTE-2".into(),
            api_port: 8728,
            mgmt_interface: Some("ether1".into()),
            registration: None,
        });
        report.skipped.push(SkippedCandidate {
            ip: Ipv4Addr::new(10, 0, 0, 3),
            reason: "MAC filter".into(),
        });
        report.failed.push(CandidateFailure {
            ip: Ipv4Addr::new(10, 0, 0, 1),
            step: OnboardingStep::Connect,
            error: "connection refused".into(),
            runbook: None,
        });

        let text = report_detail(&report, false);
        assert!(text.contains("✓ 10.0.0.2  ISP-NORTE-2  api:8728  mgmt:ether1"));
        assert!(text.contains("- 10.0.0.3  MAC filter"));
        assert!(text.contains("✗ 10.0.0.1 failed at connect: connection refused"));
    }
}
