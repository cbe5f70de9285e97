//! # CLI
//!
//! This module defines the command-line interface of `preheat` using `clap`.
//!
//! Only the shape of the input is checked here (header format, numeric ranges, which targets
//! were given). Request descriptors are validated against the request model by [`Plan`].
use anyhow::Context;
use clap::{ArgGroup, Parser, builder::RangedU64ValueParser};
use preheat_core::{GrpcCall, Request};
use std::time::Duration;

use crate::runner::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "preheat",
    version,
    about = "Warm up HTTP and gRPC services before they take traffic"
)]
#[command(group(
    ArgGroup::new("targets")
        .args(["target_http_url", "target_grpc_host"])
        .required(true)
        .multiple(true)
))]
pub struct Cli {
    /// Base URL of the HTTP target (e.g. http://localhost:8080)
    #[arg(long, requires = "http_requests")]
    pub target_http_url: Option<String>,

    /// Address of the gRPC target (e.g. localhost:50051)
    #[arg(long, requires = "grpc_requests")]
    pub target_grpc_host: Option<String>,

    /// HTTP request to send, as METHOD:/path[:body]. Can be repeated.
    ///
    /// Placeholders such as {$currentDate|days=1} or {$range|min=1,max=9} are resolved on
    /// every send.
    #[arg(long = "http-request", requires = "target_http_url")]
    pub http_requests: Vec<String>,

    /// gRPC call to send, as package.Service/Method[:json]. Can be repeated.
    #[arg(long = "grpc-request", requires = "target_grpc_host")]
    pub grpc_requests: Vec<String>,

    /// Header sent with every HTTP request ("key: value"). Can be repeated.
    #[arg(long = "http-header", value_parser = parse_header)]
    pub http_headers: Vec<String>,

    /// Metadata sent with every gRPC call ("key: value"). Can be repeated.
    #[arg(long = "grpc-header", value_parser = parse_header)]
    pub grpc_headers: Vec<String>,

    /// Skip TLS for gRPC and accept invalid certificates for HTTP
    #[arg(long)]
    pub insecure: bool,

    /// Number of workers per protocol
    #[arg(
        long,
        default_value_t = 2,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub concurrency: usize,

    /// How long the warmup runs
    #[arg(long, default_value_t = 60)]
    pub max_duration_seconds: u64,

    /// Timeout of a single call, 0 disables it
    #[arg(long, default_value_t = 10)]
    pub request_timeout_seconds: u64,

    /// Pause of each worker between two calls
    #[arg(long, default_value_t = 50)]
    pub request_delay_milliseconds: u64,
}

/// The validated warmup to run.
#[derive(Debug)]
pub struct Plan {
    pub http: Option<Target>,
    pub grpc: Option<Target>,
    pub insecure: bool,
    pub timeout_seconds: u64,
    pub settings: Settings,
}

/// One protocol target and the descriptors to send to it.
#[derive(Debug)]
pub struct Target {
    pub address: String,
    pub descriptors: Vec<String>,
    pub headers: Vec<String>,
}

impl Plan {
    /// Checks every descriptor once up front so that a typo fails the run before any call.
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        for descriptor in &cli.http_requests {
            Request::parse(descriptor)
                .with_context(|| format!("Invalid --http-request '{descriptor}'"))?;
        }

        for descriptor in &cli.grpc_requests {
            GrpcCall::parse(descriptor)
                .with_context(|| format!("Invalid --grpc-request '{descriptor}'"))?;
        }

        let settings = Settings {
            concurrency: cli.concurrency,
            max_duration: Duration::from_secs(cli.max_duration_seconds),
            delay: Duration::from_millis(cli.request_delay_milliseconds),
        };

        Ok(Self {
            http: cli.target_http_url.map(|address| Target {
                address,
                descriptors: cli.http_requests,
                headers: cli.http_headers,
            }),
            grpc: cli.target_grpc_host.map(|address| Target {
                address,
                descriptors: cli.grpc_requests,
                headers: cli.grpc_headers,
            }),
            insecure: cli.insecure,
            timeout_seconds: cli.request_timeout_seconds,
            settings,
        })
    }
}

fn parse_header(s: &str) -> Result<String, String> {
    match s.split_once(':') {
        Some((key, _)) if !key.trim().is_empty() => Ok(s.to_string()),
        _ => Err("Format must be 'key: value'".to_string()),
    }
}
