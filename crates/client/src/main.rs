// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::error;

use paymall::cart::GuestCartItem;
use paymall::config::ClientConfig;
use paymall::http::ApiRequest;
use paymall::redirect::RedirectIntent;
use paymall::session::{Registration, RegistrationOutcome, SessionState};
use paymall::token::ExpiryStatus;
use paymall::Client;

/// Headless PayMall client.
#[derive(Debug, Parser)]
#[command(name = "paymall", version)]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and resume any stored checkout intent.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PAYMALL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PAYMALL_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign out locally and, best effort, on the server.
    Logout,
    /// Show the restored session.
    Whoami,
    /// Authenticated GET against an API path.
    Get {
        path: String,
        /// Query parameter as key=value (repeatable).
        #[arg(long = "query", short = 'q', value_parser = parse_pair)]
        query: Vec<(String, String)>,
        /// Fail on 401 without refreshing or prompting.
        #[arg(long)]
        silent: bool,
    },
    /// Manage the local guest cart.
    Cart {
        #[command(subcommand)]
        action: CartCommand,
    },
    /// Check out a mall's cart, merging the guest cart after login.
    Checkout { mall: String },
    /// Show how long the stored access token remains valid.
    Expiry,
}

#[derive(Debug, Subcommand)]
enum CartCommand {
    Show {
        mall: Option<String>,
    },
    Add {
        mall: String,
        product: u64,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        price: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
    Set {
        mall: String,
        product: u64,
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    Remove {
        mall: String,
        product: u64,
    },
    Clear {
        mall: Option<String>,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli.config);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &ClientConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn state_json(state: &SessionState) -> Value {
    match state.user() {
        Some(user) => json!({ "state": state.as_str(), "user": user }),
        None => json!({ "state": state.as_str() }),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = Client::open(cli.config)?;

    // The terminal is the login gate: say so once, then accept the next prompt.
    let events = Arc::downgrade(&client.events);
    client.events.subscribe(move |event| {
        match event.reason {
            Some(reason) => eprintln!("login required ({reason}): run `paymall login`"),
            None => eprintln!("login required: run `paymall login`"),
        }
        if let Some(bus) = events.upgrade() {
            bus.unlock();
        }
    });

    match cli.command {
        Command::Login { email, password } => {
            let outcome = client
                .session
                .login(&email, &password)
                .await
                .map_err(|e| anyhow::anyhow!("login failed: {}", e.user_message()))?;
            print_json(&serde_json::to_value(&outcome)?)?;
        }
        Command::Register { email, password, username, name } => {
            let registration = Registration { username, name, ..Registration::new(email, password) };
            let outcome = client
                .session
                .register(&registration)
                .await
                .map_err(|e| anyhow::anyhow!("registration failed: {}", e.user_message()))?;
            match outcome {
                RegistrationOutcome::Authenticated(outcome) => print_json(&serde_json::to_value(&outcome)?)?,
                RegistrationOutcome::PendingApproval => print_json(&json!({
                    "state": "pending_approval",
                    "message": "Registration received. An administrator must approve the account.",
                }))?,
            }
        }
        Command::Logout => {
            client.session.logout().await;
            print_json(&state_json(&client.session.state()))?;
        }
        Command::Whoami => {
            let state = client.session.restore_session().await;
            print_json(&state_json(&state))?;
        }
        Command::Get { path, query, silent } => {
            let mut request = ApiRequest::get(path);
            for (k, v) in query {
                request = request.query(k, v);
            }
            if silent {
                request = request.silent();
            }
            let resp = client.http.send(request).await.map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&resp.data)?;
        }
        Command::Cart { action } => cart(&client, action)?,
        Command::Checkout { mall } => {
            let state = client.session.restore_session().await;
            if state.is_authenticated() {
                let report = client.carts.merge_into_server(&client.http, &mall).await?;
                print_json(&serde_json::to_value(&report)?)?;
            } else {
                client.redirect.set(&RedirectIntent::cart_checkout(&mall))?;
                print_json(&json!({
                    "state": state.as_str(),
                    "redirect": RedirectIntent::cart_checkout(&mall),
                    "message": "Sign in to continue checkout; the guest cart merges after login.",
                }))?;
            }
        }
        Command::Expiry => {
            let value = match client.session.expiry_status() {
                ExpiryStatus::Valid { remaining_secs } => json!({ "status": "valid", "remaining_secs": remaining_secs }),
                ExpiryStatus::ExpiringSoon { remaining_secs } => {
                    json!({ "status": "expiring_soon", "remaining_secs": remaining_secs })
                }
                ExpiryStatus::Expired => json!({ "status": "expired" }),
                ExpiryStatus::Unknown => json!({ "status": "unknown" }),
            };
            print_json(&value)?;
        }
    }
    Ok(())
}

fn cart(client: &Client, action: CartCommand) -> anyhow::Result<()> {
    let carts = &client.carts;
    match action {
        CartCommand::Show { mall: Some(mall) } => print_json(&serde_json::to_value(carts.get(&mall))?)?,
        CartCommand::Show { mall: None } => print_json(&serde_json::to_value(carts.get_all())?)?,
        CartCommand::Add { mall, product, quantity, name, price, image } => {
            carts.add_item(&mall, GuestCartItem { product_id: product, quantity, name, price, image })?;
            print_json(&serde_json::to_value(carts.get(&mall))?)?;
        }
        CartCommand::Set { mall, product, quantity } => {
            carts.update_quantity(&mall, product, quantity)?;
            print_json(&serde_json::to_value(carts.get(&mall))?)?;
        }
        CartCommand::Remove { mall, product } => {
            carts.remove_item(&mall, product)?;
            print_json(&serde_json::to_value(carts.get(&mall))?)?;
        }
        CartCommand::Clear { mall: Some(mall) } => {
            carts.clear(&mall)?;
            print_json(&json!({ "cleared": mall }))?;
        }
        CartCommand::Clear { mall: None } => {
            carts.clear_all()?;
            print_json(&json!({ "cleared": "all" }))?;
        }
    }
    Ok(())
}
