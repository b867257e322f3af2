//! VPN marketplace CLI
//!
//! One-shot commands against the marketplace contract, plus an interactive
//! console that keeps a wallet session open.

use clap::{Parser, Subcommand};
use dvpn_console::wallet::{RpcWallet, WalletProvider};
use dvpn_console::{
    ActionRequest, AuditLog, BalanceKind, Config, ContractActionGateway, Result, RpcConfig,
    SessionEvent, WalletSessionManager,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dvpn")]
#[command(about = "Pay-per-session VPN marketplace client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Action(Action),

    /// Show current configuration
    Config,

    /// Interactive console with a live wallet session
    Console,
}

/// Commands that need a connected wallet
#[derive(Subcommand, Clone)]
enum Action {
    /// Show the connected account
    Account,

    /// Show your deposited balance
    Balance,

    /// Show the total balance held by the contract
    ContractBalance,

    /// Deposit funds (in ETH, e.g. 0.01)
    Deposit { amount: String },

    /// Pay for a VPN session with a provider
    Pay { provider: String },

    /// Refund part of your balance (in ETH)
    Refund { amount: String },

    /// Register the connected account as a VPN provider
    Register,

    /// Withdraw provider earnings
    Withdraw,
}

/// A line typed into the console
#[derive(Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand)]
enum ConsoleCommand {
    #[command(flatten)]
    Action(Action),

    /// Connect the wallet
    Connect,

    /// Drop the wallet session
    Disconnect,

    /// Leave the console
    #[command(alias = "exit")]
    Quit,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let (text, json) = if cli.json_logs {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(text)
        .with(json)
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Action(action) => {
            let app = App::new(config)?;
            app.connect().await?;
            app.run_action(action).await
        }
        Commands::Console => {
            let app = App::new(config)?;
            run_console(app).await
        }
    }
}

#[derive(Clone)]
struct App {
    config: Arc<Config>,
    wallet: Arc<RpcWallet>,
    session: Arc<WalletSessionManager>,
    gateway: Arc<ContractActionGateway>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let contract_address = config.contract_address()?;
        let wallet = Arc::new(RpcConfig::from_env().wallet(config.confirmation_policy())?);
        let session = Arc::new(WalletSessionManager::new(wallet.clone(), contract_address));

        let mut gateway = ContractActionGateway::new(session.clone());
        if let Some(path) = &config.audit_log_path {
            gateway = gateway.with_audit_log(AuditLog::new(path));
        }

        tracing::info!(contract = %contract_address, "Marketplace client ready");

        Ok(Self {
            config: Arc::new(config),
            wallet,
            session,
            gateway: Arc::new(gateway),
        })
    }

    async fn connect(&self) -> Result<()> {
        self.session.connect().await?;
        self.check_chain().await;
        Ok(())
    }

    /// Warn when the wallet is on another chain than the contract
    async fn check_chain(&self) {
        let Some(expected) = self.config.chain_id else {
            return;
        };
        match self.wallet.chain_id().await {
            Ok(actual) if actual != expected => {
                eprintln!(
                    "Warning: wallet is on chain {}, contract is on chain {}",
                    actual, expected
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not read wallet chain id"),
        }
    }

    async fn run_action(&self, action: Action) -> Result<()> {
        match action {
            Action::Account => {
                let session = self.session.current().await?;
                println!("Connected account: {}", session.account());
            }
            Action::Balance => {
                let balance = self.gateway.fetch_balance(BalanceKind::User).await?;
                println!("Your balance: {} ETH", balance);
            }
            Action::ContractBalance => {
                let balance = self.gateway.fetch_balance(BalanceKind::Contract).await?;
                println!("Contract balance: {} ETH", balance);
            }
            Action::Deposit { amount } => {
                self.submit(
                    ActionRequest::new("addBalance").value(amount),
                    "Balance added!",
                )
                .await?;
                self.refresh_user_balance().await;
            }
            Action::Pay { provider } => {
                self.submit(
                    ActionRequest::new("payForSession").arg(provider),
                    "Session paid!",
                )
                .await?;
            }
            Action::Refund { amount } => {
                self.submit(ActionRequest::new("refundUser").value(amount), "Refunded!")
                    .await?;
                self.refresh_user_balance().await;
            }
            Action::Register => {
                self.submit(
                    ActionRequest::new("registerProvider"),
                    "Provider registered!",
                )
                .await?;
            }
            Action::Withdraw => {
                self.submit(ActionRequest::new("withdraw"), "Withdraw successful!")
                    .await?;
            }
        }
        Ok(())
    }

    async fn submit(&self, request: ActionRequest, done: &str) -> Result<()> {
        let tx = self.gateway.submit(request).await?;
        match tx.tx_hash {
            Some(hash) => println!("{} ({})", done, hash),
            None => println!("{}", done),
        }
        Ok(())
    }

    async fn refresh_user_balance(&self) {
        match self.gateway.fetch_balance(BalanceKind::User).await {
            Ok(balance) => println!("Your balance: {} ETH", balance),
            Err(e) => eprintln!("{}", e.user_message()),
        }
    }
}

async fn run_console(app: App) -> Result<()> {
    let mut events = Box::pin(app.session.subscribe().await);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                SessionEvent::Disconnected => println!("[wallet] disconnected"),
                SessionEvent::Connecting => println!("[wallet] connecting..."),
                SessionEvent::Connected { account } => println!("[wallet] connected: {}", account),
            }
        }
    });
    let watcher = app.session.watch_wallet(app.config.wallet_poll_interval());

    if let Err(e) = app.connect().await {
        eprintln!("{}", e.user_message());
    }

    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        while tasks.try_join_next().is_some() {}

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let command = match ConsoleLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let app = app.clone();
        match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Disconnect => app.session.disconnect().await,
            ConsoleCommand::Connect => {
                tasks.spawn(async move {
                    if let Err(e) = app.connect().await {
                        eprintln!("{}", e.user_message());
                    }
                });
            }
            ConsoleCommand::Action(action) => {
                tasks.spawn(async move {
                    if let Err(e) = app.run_action(action).await {
                        eprintln!("{}", e.user_message());
                    }
                });
            }
        }
    }

    finish_pending(&mut tasks).await;
    watcher.abort();
    printer.abort();
    Ok(())
}

/// Wait for in-flight commands so their outcome and audit entries are written
async fn finish_pending(tasks: &mut JoinSet<()>) -> usize {
    let pending = tasks.len();
    if pending > 0 {
        eprintln!("Waiting for {} pending command(s)...", pending);
    }
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "Console command task failed");
        }
    }
    pending
}
