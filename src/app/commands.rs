//! Console command parsing.
use site_telemetry::Severity;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Log { severity: Severity, message: String },
    Error { message: String },
    Critical { message: String },
    Metric { name: String, value: f64 },
    Page { path: String },
    /// Emits a `tracing` event as the host application would.
    Trace { severity: Severity, message: String },
    Flush,
    Stats,
    Errors { top: usize },
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  log <debug|info|warn|error|critical> <message>   record a log entry
  error <message>                                  track an error (deduplicated)
  critical <message>                               record a critical error
  metric <name> <value>                            record a performance metric
  page <path>                                      set the current page path
  trace <level> <message>                          emit a host tracing event
  flush                                            deliver the buffer now
  stats                                            show pipeline counters
  errors [n]                                       show the n most frequent errors
  help                                             show this help
  quit                                             flush and exit";

impl ConsoleCommand {
    /// Parses one input line. Empty input yields `Ok(None)`.
    pub fn parse(input: &str) -> Result<Option<Self>, String> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(None);
        }

        let rest = |from: usize| parts[from..].join(" ");

        let command = match parts[0] {
            "log" | "trace" => {
                if parts.len() < 3 {
                    return Err(format!("Usage: {} <level> <message>", parts[0]));
                }
                let severity = parts[1].parse::<Severity>()?;
                let message = rest(2);
                if parts[0] == "log" {
                    ConsoleCommand::Log { severity, message }
                } else {
                    ConsoleCommand::Trace { severity, message }
                }
            }
            "error" | "critical" => {
                if parts.len() < 2 {
                    return Err(format!("Usage: {} <message>", parts[0]));
                }
                let message = rest(1);
                if parts[0] == "error" {
                    ConsoleCommand::Error { message }
                } else {
                    ConsoleCommand::Critical { message }
                }
            }
            "metric" => {
                if parts.len() != 3 {
                    return Err("Usage: metric <name> <value>".to_string());
                }
                let value = parts[2]
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| format!("Invalid metric value: {}", parts[2]))?;
                ConsoleCommand::Metric {
                    name: parts[1].to_string(),
                    value,
                }
            }
            "page" => {
                if parts.len() != 2 {
                    return Err("Usage: page <path>".to_string());
                }
                ConsoleCommand::Page {
                    path: parts[1].to_string(),
                }
            }
            "flush" => ConsoleCommand::Flush,
            "stats" => ConsoleCommand::Stats,
            "errors" => {
                let top = match parts.get(1) {
                    Some(n) => n
                        .parse::<usize>()
                        .map_err(|_| "Usage: errors [n]".to_string())?,
                    None => 5,
                };
                ConsoleCommand::Errors { top }
            }
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("Unknown command: {}. Type 'help'.", other)),
        };

        Ok(Some(command))
    }
}
