pub mod args;
mod collector;
mod commands;
mod console;
mod setup;

pub use args::AppArgs;

use anyhow::Result;

pub async fn launch() -> Result<()> {
    launch_with_args(AppArgs::from_cli()).await
}

pub async fn launch_with_args(args: AppArgs) -> Result<()> {
    let prepared = setup::prepare(args)?;

    if prepared.args.serve {
        collector::run(prepared).await
    } else {
        console::run(prepared).await
    }
}
