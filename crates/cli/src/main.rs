use std::time::Duration;

use clap::Parser;

use jobfleet_infra::QueueConfig;

mod args;
mod commands;
mod shell;

use args::Args;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    jobfleet_observability::init("warn", args.log_json);

    let config = QueueConfig::new(&args.queue)
        .with_busy_delay(Duration::from_millis(args.busy_delay_ms));

    let mut stdout = std::io::stdout();
    commands::execute(args.command, config, &mut stdout).await
}
