//! # dynrpc CLI Entry Point
//!
//! The main executable for dynrpc. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs logging.
//! 2. **Schema**: Builds a descriptor source, either from `--protoset` files or from server
//!    reflection over a channel to `--url`.
//! 3. **Execution**: Runs the command through `dynrpc_core`.
//! 4. **Presentation**: Prints results to stdout and failures to stderr, exiting with a status
//!    that reflects the gRPC code when the server rejected the call.
mod cli;
mod formatter;
mod logging;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use dynrpc_core::{
    client::{CallError, DynamicClient, DynamicRequest, DynamicResponse},
    codec::JsonOptions,
    grpc::{
        CallOptions, InvokeError, Invoker,
        transport::{self, ConnectOptions},
    },
    source::{DescriptorSource, ProtosetSource, ReflectionSource, SchemaSource},
    tonic::{Code, transport::Channel},
};
use formatter::{Failure, FormattedString, ServiceList};
use futures_util::StreamExt;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exit statuses above this offset carry a gRPC status code.
const STATUS_EXIT_BASE: i32 = 64;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    logging::init(args.verbose);

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted, cancelling");
                token.cancel();
            }
        }
    });

    if let Err(err) = run(args, token).await {
        eprint!("{}", FormattedString::from(Failure(&err)));
        process::exit(exit_code(&err));
    }
}

async fn run(args: Cli, token: CancellationToken) -> anyhow::Result<()> {
    match args.command {
        Commands::List { ref service } => {
            let mut source = schema_source(&args, &token).await?;
            match service {
                Some(service) => {
                    let descriptor = source
                        .find_symbol(service)
                        .await?
                        .and_then(|d| d.service_descriptor().cloned())
                        .with_context(|| format!("Service '{service}' not found"))?;

                    let methods = descriptor.methods().map(|m| m.full_name().to_string());
                    println!("{}", FormattedString::from(ServiceList(methods.collect())));
                }
                None => {
                    let services = source.list_services().await?;
                    println!("{}", FormattedString::from(ServiceList(services)));
                }
            }
        }
        Commands::Describe { ref symbol } => {
            let mut source = schema_source(&args, &token).await?;
            let descriptor = source
                .resolve_symbol(symbol)
                .await?
                .with_context(|| format!("Symbol '{symbol}' not found"))?;

            println!("{}", FormattedString::from(descriptor));
        }
        Commands::Export { ref out } => {
            let mut source = schema_source(&args, &token).await?;

            // Reflection only knows what was asked for; pull in every service first.
            for service in source.list_services().await? {
                source.find_symbol(&service).await?;
            }

            std::fs::write(out, source.registry().encode_descriptor_set())
                .with_context(|| format!("Failed to write '{}'", out.display()))?;
        }
        Commands::Call {
            ref endpoint,
            ref body,
            ref headers,
            max_time,
            emit_defaults,
            use_proto_names,
            allow_unknown_fields,
        } => {
            let channel = connect(&args).await?;
            let source = schema_source_on(&args, Some(channel.clone()), headers, &token)?;
            let mut client = DynamicClient::new(source, Invoker::new(channel));

            let json = JsonOptions::default()
                .emit_defaults(emit_defaults)
                .use_proto_field_names(use_proto_names)
                .allow_unknown_fields(allow_unknown_fields);

            let mut options = CallOptions::default()
                .with_headers(headers.clone())
                .with_json(json)
                .with_cancellation(token.clone());
            if let Some(timeout) = max_time {
                options = options.with_timeout(timeout);
            }

            let (service, method) = endpoint;
            let request = DynamicRequest::new(service.as_str(), method.as_str(), body.clone())
                .with_options(options);

            match client.call(request).await? {
                DynamicResponse::Unary(value) => println!("{}", FormattedString::from(value)),
                DynamicResponse::Streaming(mut stream) => {
                    while let Some(item) = stream.next().await {
                        println!("{}", FormattedString::from(item?));
                    }
                }
            }
        }
    }

    Ok(())
}

async fn connect(args: &Cli) -> anyhow::Result<Channel> {
    let url = args
        .url
        .as_deref()
        .context("No server to talk to, pass --url or set DYNRPC_URL")?;

    let options = ConnectOptions {
        connect_timeout: args.connect_timeout,
        authority: args.authority.clone(),
        ..Default::default()
    };

    Ok(transport::connect(url, &options).await?)
}

/// Protoset files when given, otherwise reflection against `--url`.
async fn schema_source(args: &Cli, token: &CancellationToken) -> anyhow::Result<SchemaSource> {
    if !args.protosets.is_empty() {
        return schema_source_on(args, None, &[], token);
    }

    let channel = connect(args).await?;
    schema_source_on(args, Some(channel), &[], token)
}

fn schema_source_on(
    args: &Cli,
    channel: Option<Channel>,
    headers: &[(String, String)],
    token: &CancellationToken,
) -> anyhow::Result<SchemaSource> {
    if !args.protosets.is_empty() {
        let source = ProtosetSource::from_paths(&args.protosets)?;
        return Ok(SchemaSource::Protoset(source));
    }

    let channel = channel.context("Server reflection needs --url")?;
    let source = ReflectionSource::new(channel)
        .with_headers(headers)?
        .with_cancellation(token.clone());

    Ok(SchemaSource::Reflection(source))
}

fn exit_code(err: &anyhow::Error) -> i32 {
    let invoke = err.downcast_ref::<InvokeError>().or_else(|| {
        match err.downcast_ref::<CallError>() {
            Some(CallError::Invoke(e)) => Some(e),
            _ => None,
        }
    });

    match invoke {
        Some(InvokeError::RpcFailed { code, .. }) => STATUS_EXIT_BASE + *code as i32,
        Some(InvokeError::DeadlineExceeded) => STATUS_EXIT_BASE + Code::DeadlineExceeded as i32,
        _ => 1,
    }
}
