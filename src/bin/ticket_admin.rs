use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use ticket_market::{
    config::{self, AppConfig},
    db::{self, DbPool},
    notifications::LogNotificationSink,
    services::{expiry::SweepReport, loyalty::PointAudit},
    TicketingCore, TransactionDetails,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = AdminContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Sweep => {
            let report = context
                .core
                .sweep_expired()
                .await
                .context("expiry sweep failed")?;
            render(&report, cli.json, render_sweep)?;
        }
        Commands::Show(args) => {
            let details = context
                .core
                .get_transaction(args.transaction_id)
                .await
                .context("failed to load transaction")?;
            render(&details, cli.json, render_transaction)?;
        }
        Commands::Confirm(args) => {
            let details = context
                .core
                .confirm_payment(args.transaction_id)
                .await
                .context("failed to confirm payment")?;
            render(&details, cli.json, render_transaction)?;
        }
        Commands::Cancel(args) => {
            let details = context
                .core
                .cancel_transaction(args.transaction_id)
                .await
                .context("failed to cancel transaction")?;
            render(&details, cli.json, render_transaction)?;
        }
        Commands::AuditPoints(args) => {
            let audit = context
                .core
                .audit_points(args.user_id)
                .await
                .context("failed to audit points")?;
            render(&audit, cli.json, render_audit)?;
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "ticket-admin", about = "Privileged operations on ticket transactions", version)]
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
    /// Cancel every transaction whose payment window has closed
    Sweep,
    /// Show a transaction with its items and attendees
    Show(TransactionArgs),
    /// Confirm a submitted payment
    Confirm(TransactionArgs),
    /// Cancel a pending transaction and release its seats
    Cancel(TransactionArgs),
    /// Compare a user's point balance with its history
    AuditPoints(UserArgs),
}

#[derive(Args)]
struct TransactionArgs {
    #[arg(help = "Transaction id")]
    transaction_id: Uuid,
}

#[derive(Args)]
struct UserArgs {
    #[arg(help = "User id")]
    user_id: Uuid,
}

struct AdminContext {
    db: Arc<DbPool>,
    core: TicketingCore,
}

impl AdminContext {
    async fn initialize() -> Result<Self> {
        let config: AppConfig = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);
        let core = TicketingCore::from_config(db.clone(), &config, Arc::new(LogNotificationSink));

        Ok(Self { db, core })
    }
}

fn render<T: Serialize>(value: &T, json: bool, text: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn render_transaction(details: &TransactionDetails) {
    let txn = &details.transaction;
    println!(
        "Transaction {} • user {} • event {} • status {}",
        txn.id, txn.user_id, txn.event_id, txn.status
    );
    println!(
        "  total {} • promotion -{} • coupon -{} • points -{} • final {}",
        txn.total_amount, txn.promotion_discount, txn.coupon_discount, txn.points_used, txn.final_amount
    );
    println!("  payment deadline {}", txn.payment_deadline);
    if let Some(proof) = &txn.payment_proof {
        println!("  payment proof {}", proof);
    }
    if let Some(reason) = &txn.cancel_reason {
        println!("  canceled ({})", reason);
    }
    for item in &details.items {
        println!(
            "  - {} x{} @ {} = {}",
            item.ticket_name,
            item.quantity,
            item.unit_price,
            item.line_total()
        );
    }
    if !details.attendees.is_empty() {
        println!("  {} attendee(s) issued", details.attendees.len());
    }
}

fn render_sweep(report: &SweepReport) {
    println!(
        "Scanned {} • canceled {} • skipped {} • failed {}",
        report.scanned,
        report.canceled.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for id in &report.failed {
        println!("  failed: {}", id);
    }
}

fn render_audit(audit: &PointAudit) {
    let verdict = if audit.is_consistent() { "consistent" } else { "DRIFTED" };
    println!(
        "User {} • balance {} • history total {} over {} entries • {}",
        audit.user_id, audit.balance, audit.history_total, audit.entries, verdict
    );
}
