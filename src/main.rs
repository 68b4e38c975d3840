use clap::Parser;
use miette::{IntoDiagnostic, Result};
use refund_engine::application::refunds::RefundService;
use refund_engine::config::EngineConfig;
use refund_engine::domain::order::OrderLine;
use refund_engine::domain::ports::{OrderRepositoryBox, RefundStoreBox};
use refund_engine::error::RefundError;
use refund_engine::infrastructure::gateway::LedgerCreditIssuer;
use refund_engine::infrastructure::in_memory::{InMemoryOrderStore, InMemoryRefundStore};
use refund_engine::infrastructure::notifier::{AuditLogListener, LogNotificationDispatcher};
use refund_engine::infrastructure::revocation::EntitlementRevoker;
use refund_engine::interfaces::csv::action_reader::{ActionReader, RefundCommand};
use refund_engine::interfaces::csv::refund_writer::RefundWriter;
use refund_engine::interfaces::json::order_reader::read_orders;
use refund_engine::telemetry::{self, LogFormat};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Orders JSON file (an array of orders)
    orders: PathBuf,

    /// Refund actions CSV file
    actions: PathBuf,

    /// Engine configuration JSON file (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(RefundStoreBox, OrderRepositoryBox)> {
    use refund_engine::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(db_path) => {
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            Ok((Box::new(store.clone()), Box::new(store)))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(RefundStoreBox, OrderRepositoryBox)> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (RefundStoreBox, OrderRepositoryBox) {
    (
        Box::new(InMemoryRefundStore::new()),
        Box::new(InMemoryOrderStore::new()),
    )
}

async fn run_command(service: &RefundService, command: RefundCommand) -> Result<(), RefundError> {
    match command {
        RefundCommand::Create { order, lines } => {
            let order = service.order(&order).await?;
            let selected: Vec<OrderLine> = if lines.is_empty() {
                order.lines.clone()
            } else {
                lines
                    .iter()
                    .map(|id| {
                        order.line(*id).cloned().ok_or_else(|| {
                            RefundError::Validation(format!(
                                "Order line {id} does not belong to order {}",
                                order.number
                            ))
                        })
                    })
                    .collect::<Result<_, _>>()?
            };

            match service.create_with_lines(&order, &selected).await? {
                Some(refund) => tracing::info!(
                    refund_id = refund.id,
                    order_number = %order.number,
                    status = %refund.status,
                    "Refund created"
                ),
                None => tracing::warn!(
                    order_number = %order.number,
                    "All requested lines are already refunded"
                ),
            }
        }
        RefundCommand::Process { refund, action } => {
            let outcome = service.process(refund, action).await?;
            if outcome.succeeded {
                tracing::info!(
                    refund_id = refund,
                    ?action,
                    status = %outcome.status(),
                    "Refund action succeeded"
                );
            } else if let Some(e) = &outcome.payment_error {
                tracing::warn!(
                    refund_id = refund,
                    ?action,
                    status = %outcome.status(),
                    unsettled = outcome.is_unsettled(),
                    error = %e,
                    "Refund action failed at the payment step"
                );
            } else {
                tracing::warn!(
                    refund_id = refund,
                    ?action,
                    status = %outcome.status(),
                    "Refund action failed"
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };

    let orders = read_orders(File::open(&cli.orders).into_diagnostic()?).into_diagnostic()?;
    let revoker = EntitlementRevoker::from_orders(&orders).await;
    let (refund_store, order_store) = open_stores(cli.db_path)?;

    let mut service = RefundService::new(
        config,
        order_store,
        refund_store,
        Box::new(LedgerCreditIssuer::new()),
        Box::new(revoker),
        Box::new(LogNotificationDispatcher),
    );
    service.subscribe(Arc::new(AuditLogListener));

    for order in orders {
        service.register_order(order).await.into_diagnostic()?;
    }

    // Process actions
    let file = File::open(&cli.actions).into_diagnostic()?;
    let reader = ActionReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = run_command(&service, command).await {
                    tracing::error!(error = %e, "Error processing action");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error reading action");
            }
        }
    }

    // Output final state
    let refunds = service.refunds().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = RefundWriter::new(stdout.lock());
    writer.write_refunds(refunds).into_diagnostic()?;

    Ok(())
}
