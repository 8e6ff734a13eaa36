//! Interactive console: records telemetry from typed commands and shows the
//! pipeline state.
use super::commands::{ConsoleCommand, HELP};
use super::setup::PreparedApp;
use anyhow::{anyhow, Result};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use site_telemetry::logging::{self, TelemetryLayer};
use site_telemetry::sink::{HttpSink, Sink};
use site_telemetry::storage::SledEventStore;
use site_telemetry::{
    AmbientContext, DeliveryResult, ErrorInfo, ErrorTracker, MemoryObserver, MetricStatus,
    PerformanceMonitor, RecordKind, Severity, Telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

/// Target used for events the console emits on behalf of a host application.
const HOST_TARGET: &str = "site_admin";

pub async fn run(prepared: PreparedApp) -> Result<()> {
    let PreparedApp {
        args,
        config,
        session_id,
        db,
        ..
    } = prepared;

    let sink: Arc<dyn Sink + Send + Sync> = match args.endpoint {
        Some(ref endpoint) => Arc::new(HttpSink::new(endpoint, config.sink_timeout())?),
        None => Arc::new(SledEventStore::new(db)?),
    };

    let ambient = AmbientContext::new(session_id, config.user_agent.clone());
    let telemetry = Telemetry::start(&config, ambient, sink);

    logging::init_subscriber(config.mode, Some(TelemetryLayer::new(telemetry.clone())))
        .map_err(|e| anyhow!(e))?;

    let tracker = ErrorTracker::new(telemetry.clone());
    let monitor = Arc::new(PerformanceMonitor::new(telemetry.clone(), &config));

    let observer = match MemoryObserver::start(monitor.clone(), MEMORY_SAMPLE_INTERVAL) {
        Ok(handle) => Some(handle),
        Err(e) => {
            debug!("Memory observer disabled: {}", e);
            None
        }
    };

    println!("Type 'help' for commands.\n");

    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || read_lines(line_tx));

    while let Some(line) = line_rx.recv().await {
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message.yellow());
                continue;
            }
        };

        if command == ConsoleCommand::Quit {
            break;
        }
        execute(command, &telemetry, &tracker, &monitor).await;
    }

    if let Some(observer) = observer {
        observer.abort();
    }

    let result = telemetry.destroy().await;
    println!("Final flush: {}", describe(&result));
    println!("👋 Bye");
    Ok(())
}

/// Reads lines on a plain thread so a pending `readline` never holds up
/// runtime shutdown.
fn read_lines(line_tx: mpsc::Sender<String>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Failed to start line editor: {}", e);
            return;
        }
    };

    loop {
        match editor.readline("telemetry> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                let quit = matches!(line.trim(), "quit" | "exit");
                if line_tx.blocking_send(line).is_err() || quit {
                    return;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                let _ = line_tx.blocking_send("quit".to_string());
                return;
            }
            Err(e) => {
                eprintln!("Input error: {}", e);
                let _ = line_tx.blocking_send("quit".to_string());
                return;
            }
        }
    }
}

async fn execute(
    command: ConsoleCommand,
    telemetry: &Telemetry,
    tracker: &ErrorTracker,
    monitor: &PerformanceMonitor,
) {
    match command {
        ConsoleCommand::Log { severity, message } => {
            let buffered = telemetry.record(RecordKind::Log, severity, message, None, None);
            report_buffered(buffered, telemetry);
        }
        ConsoleCommand::Error { message } => {
            let tracked = tracker.track_error(ErrorInfo::new("ConsoleError", message), None);
            if tracked.count == 1 {
                println!("Tracked new error {}", tracked.key.cyan());
            } else {
                println!(
                    "Seen {} times, not buffered again ({})",
                    tracked.count,
                    tracked.key.cyan()
                );
            }
        }
        ConsoleCommand::Critical { message } => {
            let error = ErrorInfo::new("ConsoleError", message.clone());
            telemetry.critical(message, None, Some(error));
            println!("{}", "Critical recorded, flush requested".red());
        }
        ConsoleCommand::Metric { name, value } => {
            let status = monitor.record_metric(&name, value, None);
            let label = match status {
                MetricStatus::Healthy => "healthy".green(),
                MetricStatus::Warning => "warning".yellow(),
                MetricStatus::Critical => "critical".red(),
            };
            println!("{} = {} is {}", name, value, label);
        }
        ConsoleCommand::Page { path } => {
            telemetry.set_page_path(path.clone());
            println!("Page set to {}", path);
        }
        ConsoleCommand::Trace { severity, message } => emit_host_event(severity, &message),
        ConsoleCommand::Flush => {
            let result = telemetry.flush().await;
            println!("{}", describe(&result));
        }
        ConsoleCommand::Stats => {
            let stats = telemetry.stats();
            println!("Mode:      {}", telemetry.mode());
            println!("Buffered:  {}", stats.buffered);
            println!("Filtered:  {}", stats.filtered_records);
            println!(
                "Delivered: {} records in {} batches",
                stats.delivered_records, stats.delivered_batches
            );
            println!(
                "Dropped:   {} records in {} batches",
                stats.dropped_records, stats.dropped_batches
            );
            for (name, summary) in monitor.summaries() {
                println!(
                    "Metric {}: last {} max {} over {} samples",
                    name, summary.last, summary.max, summary.count
                );
            }
        }
        ConsoleCommand::Errors { top } => {
            let summary = tracker.summary(top);
            println!(
                "{} occurrences of {} distinct errors, {} in the last hour",
                summary.total_occurrences, summary.distinct_errors, summary.last_hour
            );
            for error in summary.top {
                println!(
                    "  {:>4}x {}: {} (last {})",
                    error.count,
                    error.name.bold(),
                    error.message,
                    error.last_occurrence.format("%H:%M:%S")
                );
            }
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
}

fn report_buffered(buffered: bool, telemetry: &Telemetry) {
    if buffered {
        println!("Buffered ({} waiting)", telemetry.buffered_len());
    } else {
        println!("{}", format!("Filtered out in {} mode", telemetry.mode()).dimmed());
    }
}

fn emit_host_event(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => debug!(target: HOST_TARGET, "{}", message),
        Severity::Info => info!(target: HOST_TARGET, "{}", message),
        Severity::Warn => warn!(target: HOST_TARGET, "{}", message),
        Severity::Error => error!(target: HOST_TARGET, "{}", message),
        Severity::Critical => error!(target: HOST_TARGET, critical = true, "{}", message),
    }
}

fn describe(result: &DeliveryResult) -> String {
    match result {
        DeliveryResult::Delivered { .. } => result.to_string().green().to_string(),
        DeliveryResult::Dropped { .. } => result.to_string().red().to_string(),
        DeliveryResult::Empty => result.to_string(),
    }
}
