//! # CLI
//!
//! This module defines the command-line interface of `dynrpc` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use clap::{ArgAction, Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug)]
#[command(name = "dynrpc", version, about = "Call any gRPC method from JSON")]
pub struct Cli {
    /// The server URL to connect to (e.g. http://localhost:50051)
    #[arg(long, global = true, env = "DYNRPC_URL")]
    pub url: Option<String>,

    /// Read the schema from descriptor set files instead of server reflection
    #[arg(
        long = "protoset",
        global = true,
        env = "DYNRPC_PROTOSET",
        value_delimiter = ','
    )]
    pub protosets: Vec<PathBuf>,

    /// Seconds to wait for the connection to be established
    #[arg(long, global = true, value_parser = parse_seconds)]
    pub connect_timeout: Option<Duration>,

    /// Override the `:authority` sent to the server
    #[arg(long, global = true)]
    pub authority: Option<String>,

    /// Log more (-v debug, -vv trace). Overrides DYNRPC_LOG
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List services, or the methods of one service
    List {
        /// Fully qualified service name (e.g. my.package.Service)
        service: Option<String>,
    },

    /// Describe a service, method, message or enum
    Describe {
        /// Fully qualified symbol (e.g. my.package.Message or my.package.Service.Method)
        symbol: String,
    },

    /// Perform a gRPC call to a server
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// dynrpc --url http://localhost:50051 call my.pkg.Service/Method --body '{"key": "value"}'
    /// ```
    Call {
        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),

        /// JSON body (Object for Unary and Server Streaming, Array for Client Streaming and Bidirectional)
        #[arg(long, value_parser = parse_body, default_value = "{}")]
        body: serde_json::Value,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Deadline for the whole call, in seconds
        #[arg(long, value_parser = parse_seconds)]
        max_time: Option<Duration>,

        /// Print unset fields with their default value
        #[arg(long)]
        emit_defaults: bool,

        /// Print field names as declared in the .proto file instead of lowerCamelCase
        #[arg(long)]
        use_proto_names: bool,

        /// Drop request fields unknown to the schema instead of failing
        #[arg(long)]
        allow_unknown_fields: bool,
    },

    /// Write every resolved file to a descriptor set
    Export {
        /// Destination file
        #[arg(long)]
        out: PathBuf,
    },
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("Invalid number of seconds: '{value}'"))?;

    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid duration '{value}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("echo.Greeter/SayHello").unwrap(),
            ("echo.Greeter".to_string(), "SayHello".to_string())
        );
        assert!(parse_endpoint("echo.Greeter").is_err());
        assert!(parse_endpoint("/SayHello").is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("authorization: Bearer abc").unwrap(),
            ("authorization".to_string(), "Bearer abc".to_string())
        );
        assert!(parse_header("no-colon").is_err());
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_call_arguments() {
        let cli = Cli::try_parse_from([
            "dynrpc",
            "--url",
            "http://localhost:50051",
            "call",
            "echo.Greeter/SayHello",
            "--body",
            r#"{"name":"World"}"#,
            "-H",
            "x-a:1",
            "--max-time",
            "2",
            "--emit-defaults",
        ])
        .unwrap();

        assert_eq!(cli.url.as_deref(), Some("http://localhost:50051"));
        match cli.command {
            Commands::Call {
                endpoint,
                body,
                headers,
                max_time,
                emit_defaults,
                use_proto_names,
                ..
            } => {
                assert_eq!(endpoint.1, "SayHello");
                assert_eq!(body["name"], "World");
                assert_eq!(headers, vec![("x-a".to_string(), "1".to_string())]);
                assert_eq!(max_time, Some(Duration::from_secs(2)));
                assert!(emit_defaults);
                assert!(!use_proto_names);
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }
}
