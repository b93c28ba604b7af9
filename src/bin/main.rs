// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use ticket_ledger_rs::{Engine, EngineConfig, SimulatedGateway, SystemClock, api, seed};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ticket Ledger - Ticket sales and transfer server
///
/// Serves the purchase and transfer API over HTTP, backed by an
/// in-memory store and a simulated payment gateway.
#[derive(Parser, Debug)]
#[command(name = "ticket-ledger")]
#[command(about = "A ticket sales server with safe concurrent purchases", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "TICKET_LEDGER_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// CSV file with users, events, sales and tickets to load at startup
    ///
    /// Expected format: kind,key,parent,email,title,price,ticket_type,vip,place,amount,start,end
    #[arg(long, env = "TICKET_LEDGER_SEED_FILE", value_name = "FILE")]
    seed_file: Option<PathBuf>,

    /// Share of charges the simulated gateway approves, between 0 and 1
    #[arg(long, env = "TICKET_LEDGER_PAYMENT_SUCCESS_RATE", default_value_t = 0.9)]
    payment_success_rate: f64,

    /// Simulated gateway latency in milliseconds
    #[arg(long, env = "TICKET_LEDGER_PAYMENT_DELAY_MS", default_value_t = 100)]
    payment_delay_ms: u64,

    /// Longest wait for a gateway answer before the charge counts as declined
    #[arg(long, env = "TICKET_LEDGER_PAYMENT_TIMEOUT_MS", default_value_t = 5000)]
    payment_timeout_ms: u64,

    /// Seed for the simulated gateway; random when omitted
    #[arg(long, env = "TICKET_LEDGER_RNG_SEED")]
    rng_seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_ledger_rs=info,ticket_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let rng_seed = args.rng_seed.unwrap_or_else(rand::random);
    let gateway = SimulatedGateway::new(
        rng_seed,
        args.payment_success_rate,
        Duration::from_millis(args.payment_delay_ms),
    );
    let config = EngineConfig {
        payment_timeout: Duration::from_millis(args.payment_timeout_ms),
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::with_parts(
        Arc::new(SystemClock),
        Arc::new(gateway),
        config,
    ));
    info!(
        rng_seed,
        success_rate = args.payment_success_rate,
        "Payment gateway ready"
    );

    if let Some(path) = &args.seed_file {
        if let Err(e) = seed::load_seed_file(&engine, path) {
            error!(path = %path.display(), error = %e, "Error loading seed file");
            process::exit(1);
        }
    }

    let listener = match TcpListener::bind(args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %args.bind, error = %e, "Failed to bind address");
            process::exit(1);
        }
    };
    info!(bind = %args.bind, "Ticket ledger listening");

    let app = api::router(engine);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server failed");
        process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
}
