//! # Preheat CLI Entry Point
//!
//! The `preheat` executable warms up an HTTP and/or a gRPC service:
//!
//! 1. **Initialization**: Parses and validates the command line ([`cli::Cli`], [`cli::Plan`]).
//! 2. **Warmup**: Runs one [`runner::warmup`] per configured target, concurrently.
//! 3. **Shutdown**: Logs a summary per target and closes the clients.
//!
//! Failed calls never fail the process; only invalid input does.
mod cli;
mod runner;

use clap::Parser;
use cli::{Cli, Plan};
use preheat_core::{
    GrpcCall, Request,
    client::{grpc::GrpcWarmupClient, http::HttpWarmupClient},
};
use std::future::Future;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let plan = Plan::from_cli(Cli::parse())?;
    let settings = plan.settings;

    let http = plan.http.map(|target| {
        let client = HttpWarmupClient::new(target.address, plan.insecure, plan.timeout_seconds)
            .with_headers(target.headers);
        runner::warmup(client, target.descriptors, Request::parse, settings)
    });

    let grpc = plan.grpc.map(|target| {
        let client = GrpcWarmupClient::new(target.address, plan.insecure, plan.timeout_seconds);
        let headers = target.headers;
        let parse = move |descriptor: &str| {
            GrpcCall::parse(descriptor).map(|call| call.with_headers(headers.clone()))
        };
        runner::warmup(client, target.descriptors, parse, settings)
    });

    tokio::join!(run(http), run(grpc));

    Ok(())
}

async fn run(warmup: Option<impl Future<Output = runner::Stats>>) {
    if let Some(warmup) = warmup {
        warmup.await;
    }
}
