use std::{io, process, str::FromStr};

use anyhow::Context;
use clap::Parser;
use console::style;
use sockbudget_cli::{Cli, OutputFormat};
use sockbudget_core::{AuditReport, Verdict};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_OK: i32 = 0;
const EXIT_NEGOTIATION_FAILED: i32 = 1;
/// Exit code when the audit is unsane and `--strict` is set.
const EXIT_UNSANE: i32 = 2;

fn main() -> anyhow::Result<()> {
    let cli = {
        dotenvy::dotenv().ok();
        Cli::parse()
    };

    let filter = EnvFilter::from_str(&cli.global.log_level.to_string()).context("parse env log level failed")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(cfg!(debug_assertions))
                .with_file(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
                .with_thread_names(false)
                .with_thread_ids(false),
        )
        .init();

    let code = run(&cli)?;
    if code != EXIT_OK {
        process::exit(code);
    }

    anyhow::Ok(())
}

/// Negotiate, audit and print the report; returns the process exit code.
#[cfg(unix)]
fn run(cli: &Cli) -> anyhow::Result<i32> {
    use sockbudget_core::{Auditor, Negotiated, ProcTunables, SystemLimits};

    let connections = cli.load.connections;
    let workers = cli.load.workers();

    debug!(connections, workers, "sockbudget is starting");

    if cli.load.skip_negotiation {
        info!("skipping open files limit negotiation");
    } else {
        match sockbudget_core::negotiate(connections, workers) {
            Ok(Negotiated::Unchanged { soft }) => debug!("open files limit {} is already sufficient", soft),
            Ok(Negotiated::Raised { .. }) => {}
            Err(e) => {
                error!("{}", e);
                return Ok(EXIT_NEGOTIATION_FAILED);
            }
        }
    }

    let tunables = ProcTunables::with_root(&cli.global.proc_sys_root);
    let report = Auditor::new(SystemLimits::new(), SystemLimits::new(), tunables).audit(connections, workers);

    print_report(&report, cli.global.format)?;

    if cli.load.strict && !report.is_sane() {
        return Ok(EXIT_UNSANE);
    }

    Ok(EXIT_OK)
}

#[cfg(not(unix))]
fn run(_cli: &Cli) -> anyhow::Result<i32> {
    anyhow::bail!("open files limits can only be negotiated on unix-like systems")
}

fn print_report(report: &AuditReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("serialize audit report failed")?;
            println!("{json}");
        }
        OutputFormat::Text => {
            let verdict = match report.verdict() {
                Verdict::Sane => style(report.verdict()).green().bold(),
                Verdict::Unsane => style(report.verdict()).yellow().bold(),
            };
            println!(
                "{} for {} connections and {} workers (need {} descriptors)",
                verdict, report.expected_sockets, report.workers, report.required
            );
            for finding in &report.findings {
                println!("  {}: {}", style(finding.check).dim(), finding);
            }
            for check in &report.skipped {
                println!("  {}: not applicable on this host", style(check).dim());
            }
        }
    }

    Ok(())
}
