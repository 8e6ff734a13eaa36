use clap::Parser;
use site_telemetry::RuntimeMode;

#[derive(Parser, Debug, Clone)]
#[command(name = "site-telemetry")]
#[command(about = "Buffered client telemetry with a local collector")]
pub struct AppArgs {
    #[arg(long, help = "Run the telemetry collector instead of the console")]
    pub serve: bool,

    #[arg(long, help = "Collector port (random free port if not specified)")]
    pub port: Option<u16>,

    #[arg(long, help = "Config file path (JSON)")]
    pub config: Option<String>,

    #[arg(long, default_value = "data", help = "Data directory")]
    pub data_dir: String,

    #[arg(long, help = "Runtime mode: development or production")]
    pub mode: Option<RuntimeMode>,

    #[arg(
        long,
        help = "Collector URL to deliver batches to (local store if not specified)"
    )]
    pub endpoint: Option<String>,
}

impl AppArgs {
    pub fn from_cli() -> Self {
        <Self as Parser>::parse()
    }
}
