use anyhow::Result;
use clap::Parser;
use inbox_triage::cli::{self, Cli, Commands};
use inbox_triage::config::Config;
use inbox_triage::error::TriageError;
use inbox_triage::ledger::{ActionLedger, EntryStatus};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: inbox-triage --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // This is necessary because multiple dependencies use different crypto providers
    // On non-Windows platforms, use aws-lc-rs (better performance, FIPS support)
    // On Windows, use ring (better compatibility, no NASM/CMake required)
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing with level based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("inbox_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("inbox_triage=info,warn,error"))
    };

    // Logs go to the run log file in append mode; the console keeps the
    // progress display and summary
    if let Some(parent) = cli.log_file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    tracing::info!("inbox-triage starting...");

    match cli.command {
        Commands::Run {
            ref first_name,
            ref last_name,
            ref model,
            dry_run,
            max_messages,
        } => {
            tracing::info!(
                "Processing unread backlog for {} {}",
                first_name,
                last_name
            );
            if dry_run {
                println!("Running in DRY RUN mode - no changes will be made");
            }

            let summary = cli::run_backlog(
                &cli,
                first_name,
                last_name,
                model.as_deref(),
                dry_run,
                max_messages,
            )
            .await?;

            cli::print_summary(&summary);

            // Per-message failures are reported in the summary but don't
            // change the exit code; only setup failures do
            Ok(())
        }

        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Delete existing token if force flag is set
            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            // Initialize Gmail hub (will trigger OAuth flow if needed)
            let hub =
                inbox_triage::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache)
                    .await?;
            inbox_triage::auth::secure_token_file(&cli.token_cache).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            // Test the connection - must specify scope to avoid triggering
            // an additional OAuth flow
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await
                .map_err(TriageError::from)?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Status { detailed } => {
            if !cli.ledger_file.exists() {
                println!("No ledger found at {:?}.", cli.ledger_file);
                println!("Nothing has been processed yet.");
                return Ok(());
            }

            let ledger = ActionLedger::load(&cli.ledger_file).await?;
            let counts = ledger.counts();

            println!("\n========================================");
            println!("Ledger Status");
            println!("========================================");
            println!("Ledger file: {:?}", cli.ledger_file);
            println!("Messages recorded: {}", ledger.len());
            println!("Succeeded: {}", counts.succeeded);
            println!("Failed (will retry): {}", counts.failed);
            println!("Pending (interrupted mid-flight): {}", counts.pending);

            if detailed && counts.failed > 0 {
                println!("\n--- Failed messages ---");
                for (id, entry) in ledger.failed_entries() {
                    if let EntryStatus::Failed { stage, reason } = &entry.status {
                        println!("  - {} ({} stage): {}", id, stage, reason);
                    }
                }
            }
            println!("========================================");

            Ok(())
        }

        Commands::InitConfig { ref output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(TriageError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - classifier.model: OpenAI model used for verdicts");
            println!("  - classifier.on_ambiguous: what to do with unclear verdicts");
            println!("  - action.mode: mark_read, archive, or label");

            Ok(())
        }
    }
}
