//! Fetch a URL, answering NTLM challenges

use clap::Parser;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use rust_ntlm_http::auth::{Credentials, NtlmCredentialHandler};
use rust_ntlm_http::client::{ClientConfig, HttpClient};
use rust_ntlm_http::transport::tcp::TcpTransport;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ntlm-fetch")]
#[command(about = "HTTP client with NTLM authentication", long_about = None)]
struct Args {
    /// URL to fetch
    url: String,

    /// Username for authentication, optionally as DOMAIN\user
    #[arg(short = 'u', long, env = "NTLM_USERNAME")]
    username: Option<String>,

    /// Password for authentication
    #[arg(short = 'P', long, env = "NTLM_PASSWORD", default_value = "")]
    password: String,

    /// Domain
    #[arg(short = 'd', long, env = "NTLM_DOMAIN")]
    domain: Option<String>,

    /// Workstation name sent in the negotiate message
    #[arg(short = 'w', long, env = "NTLM_WORKSTATION", default_value = "")]
    workstation: String,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, as 'Name: value'
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(long)]
    data: Option<String>,

    /// Timeout per round trip, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed header {:?}, expected 'Name: value'", line))?;
        headers.append(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    Ok(headers)
}

fn credentials(args: &Args, username: &str) -> Credentials {
    let credentials =
        Credentials::from_login(username, args.password.clone(), args.workstation.clone());
    match &args.domain {
        Some(domain) => Credentials::new(
            credentials.username(),
            credentials.password(),
            domain.clone(),
            credentials.workstation(),
        ),
        None => credentials,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig {
        timeout: args.timeout.map(Duration::from_secs),
        ..ClientConfig::default()
    };
    let mut client = HttpClient::with_transport(config, Arc::new(TcpTransport::new()));

    match &args.username {
        Some(username) => {
            let credentials = credentials(&args, username);
            tracing::info!(
                "Authenticating as {}\\{}",
                credentials.domain(),
                credentials.username()
            );
            client.add_handler(Arc::new(NtlmCredentialHandler::new(credentials)));
        }
        None => tracing::info!("No username given, NTLM challenges will not be answered"),
    }

    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())?;
    let headers = parse_headers(&args.headers)?;
    let payload = args.data.clone().map(bytes::Bytes::from);

    let response = client.request(method, &args.url, headers, payload).await?;

    println!("{}", response.status);
    for (name, value) in &response.headers {
        println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
    }
    println!();
    println!("{}", String::from_utf8_lossy(&response.body));

    if !response.status.is_success() {
        tracing::warn!("Server answered {}", response.status);
    }

    Ok(())
}
