use std::io;

use clap::Parser;
use elif_migrations_cli::Cli;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current migration...");
            on_signal.cancel();
        }
    });

    let mut stdout = io::stdout().lock();
    if let Err(e) = elif_migrations_cli::run(cli, None, cancel, &mut stdout).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
