use std::process::ExitCode;

use clap::Parser;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sqltaint::config::{Cli, Command, Settings};
use sqltaint::error::{ClientError, FuzzError, StoreError};
use sqltaint::findings::{FindingStore, JsonlStore};
use sqltaint::{fuzz, logging};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format, None);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let mut chain = e.to_string();
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                chain.push_str(": ");
                chain.push_str(&cause.to_string());
                source = cause.source();
            }
            error!(error = %chain, config = e.is_config(), "sqltaint failed");
            eprintln!("error: {chain}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<(), FuzzError> {
    match cli.command {
        Command::Findings { run_id } => {
            let store = JsonlStore::new(&cli.findings_path);
            let findings = store.by_run(&run_id).await?;
            for finding in &findings {
                let line = serde_json::to_string(finding).map_err(StoreError::from)?;
                println!("{line}");
            }
            info!(run_id = %run_id, count = findings.len(), "Findings listed");
            Ok(())
        }
        Command::Fuzz(args) => {
            let settings = Settings::resolve(args, cli.findings_path)?;
            let cancel = CancellationToken::new();
            let signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping");
                    signal.cancel();
                }
            });

            info!(run_id = %settings.run_id, target = %settings.target, "Run starting");
            match fuzz::launch(&settings, &cancel).await {
                Ok(_) | Err(FuzzError::Client(ClientError::Cancelled)) => Ok(()),
                Err(e) => Err(e),
            }
        }
    }
}
