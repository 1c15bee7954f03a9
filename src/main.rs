use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use container_depot::{
    collaborators::{InMemoryDocumentStore, InMemoryReferenceData, TracingAuditSink},
    config,
    db,
    events::{self, EventSender},
    Actor, DepotServices, DepotSettings, ServiceFactory,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "depot-cli", about = "Maintenance commands for the depot core", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Rebuild an invoice's cached totals from its lines
    RecomputeInvoice { invoice_id: Uuid },
    /// Print the transition history of a service request
    History { request_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;

    if let Commands::Migrate = cli.command {
        db::run_migrations(&pool).await?;
        info!("Migrations applied");
        return Ok(());
    }
    if cfg.auto_migrate {
        db::run_migrations(&pool).await?;
    }

    let (sender, rx) = EventSender::channel(cfg.event_channel_capacity);
    let consumer = tokio::spawn(events::process_events(rx, Vec::new()));

    let factory = ServiceFactory::new(
        Arc::new(pool),
        DepotSettings::from(&cfg),
        sender,
        Arc::new(TracingAuditSink),
        Arc::new(InMemoryReferenceData::new()),
        Arc::new(InMemoryDocumentStore::new()),
    );
    let services = DepotServices::new(&factory);
    let actor = Actor::system();

    match cli.command {
        Commands::Migrate => {}
        Commands::RecomputeInvoice { invoice_id } => {
            let invoice = services.invoicing.recompute_totals(invoice_id).await?;
            if cli.json {
                print_json(&invoice)?;
            } else {
                println!(
                    "{} subtotal {} tax {} total {} {}",
                    invoice.invoice_no,
                    invoice.subtotal,
                    invoice.tax_amount,
                    invoice.total_amount,
                    invoice.currency
                );
            }
        }
        Commands::History { request_id } => {
            let history = services.requests.history(request_id, &actor).await?;
            if cli.json {
                print_json(&history)?;
            } else {
                for row in history {
                    let from = row
                        .from_status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:>3} {} {:>14} -> {:<14} {} {}",
                        row.seq,
                        row.created_at.to_rfc3339(),
                        from,
                        row.to_status,
                        row.actor,
                        row.note.unwrap_or_default()
                    );
                }
            }
        }
    }

    drop(services);
    drop(factory);
    consumer.await.context("event consumer panicked")?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
