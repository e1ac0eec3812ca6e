// main.rs - wsctl: send a templated message over a WebSocket connection

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use wsctl::config::{DEFAULT_ORIGIN, DEFAULT_RECV_TIMEOUT_MS, DEFAULT_SEND_TIMEOUT_MS, DEFAULT_URL};
use wsctl::{ClientConfig, ExchangeEvent, ExchangeObserver, ResponseManager, WsConnection, template};

#[derive(Parser, Debug)]
#[command(name = "wsctl", version, about = "WebSocket command line tool", long_about = None)]
struct Cli {
    /// Websocket url (ws://... or wss://...)
    #[arg(short, long, default_value = DEFAULT_URL)]
    url: String,

    /// Origin http url
    #[arg(short, long, default_value = DEFAULT_ORIGIN)]
    origin: String,

    /// Websocket sub-protocol
    #[arg(short, long, default_value = "sip")]
    proto: String,

    /// Skip tls certificate validation for wss (true|false)
    #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
    insecure: bool,

    /// Wait to receive response from ws server (true|false)
    #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
    receive: bool,

    /// Path to template file (mandatory parameter)
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Path to the json fields file
    #[arg(short, long)]
    fields: Option<PathBuf>,

    /// Replace '\n' with '\r\n' inside the data to be sent (true|false)
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    crlf: bool,

    /// Username to be used for authentication
    #[arg(long)]
    auser: Option<String>,

    /// Password to be used for authentication
    #[arg(long)]
    apasswd: Option<String>,

    /// Timeout waiting to receive data (milliseconds)
    #[arg(long, default_value_t = DEFAULT_RECV_TIMEOUT_MS)]
    timeout_recv: u64,

    /// Timeout trying to send data (milliseconds)
    #[arg(long, default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    timeout_send: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> wsctl::Result<ClientConfig> {
        let mut builder = ClientConfig::builder()
            .url(&self.url)
            .origin(&self.origin)
            .subprotocol(&self.proto)
            .insecure(self.insecure)
            .receive(self.receive)
            .fields(self.fields)
            .crlf(self.crlf)
            .credentials(self.auser, self.apasswd)
            .timeouts(self.timeout_send, self.timeout_recv);
        if let Some(template) = self.template {
            builder = builder.template(template);
        }
        builder.build()
    }
}

// Prints every step of the exchange for a human to inspect
struct ConsoleReporter;

impl ExchangeObserver for ConsoleReporter {
    fn on_event(&self, event: &ExchangeEvent<'_>) {
        match event {
            ExchangeEvent::Sent(data) => print_frame("Sending", data),
            ExchangeEvent::Received(data) | ExchangeEvent::ReceivedFinal(data) => print_frame("Receiving", data),
            ExchangeEvent::Resent(data) => print_frame("Resending", data),
            ExchangeEvent::ChallengeParsed(params) => println!("\nAuth params map:\n    {}\n", params),
        }
    }
}

fn print_frame(label: &str, data: &[u8]) {
    println!("{} ({} bytes):\n[[{}]]", label, data.len(), String::from_utf8_lossy(data));
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    println!();

    let config = cli.into_config()?;
    let payload = template::render_payload(&config.payload)?;

    let conn = WsConnection::dial(&config.connect, config.exchange.send_timeout)
        .await
        .with_context(|| format!("cannot open connection to {}", config.connect.url))?;

    let mut manager = ResponseManager::new(conn, config.exchange.clone(), ConsoleReporter);
    let report = manager.run(&payload).await?;
    debug!("Exchange finished, auth handled: {}", report.auth_handled);

    if let Err(e) = manager.into_connection().close().await {
        debug!("Closing connection failed: {}", e);
    }

    Ok(())
}
