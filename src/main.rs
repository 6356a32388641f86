use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;

use chatwire::{
    config::{load_config_from_path, CONFIG_FILE_PATH},
    logger::{self, LogTag},
    ChatEvent, ChatSession, TransportContext,
};

#[derive(Parser)]
#[command(name = "chatwire")]
#[command(about = "Connect to an IRC-over-WebSocket chat and print its events", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = CONFIG_FILE_PATH)]
    config: String,

    /// Channel to join (repeatable)
    #[arg(long = "channel", value_name = "CHANNEL")]
    channels: Vec<String>,

    #[arg(long)]
    nick: Option<String>,

    /// OAuth token sent as PASS
    #[arg(long)]
    pass: Option<String>,

    /// Endpoint override (ws:// or wss://)
    #[arg(long)]
    url: Option<String>,

    /// Enable debug output for a log tag (repeatable, e.g. websocket, irc)
    #[arg(long = "debug", value_name = "TAG")]
    debug_tags: Vec<String>,

    /// Enable verbose output for every tag
    #[arg(short, long)]
    verbose: bool,

    /// Print events as JSON lines instead of log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        logger::error(LogTag::System, &format!("Fatal: {:#}", e));
        logger::flush();
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config_from_path(&args.config)
        .with_context(|| format!("loading {}", args.config))?;

    // =========================================================================
    // CLI OVERRIDES
    // =========================================================================

    if let Some(url) = args.url {
        config.connection.url = url;
    }
    if let Some(nick) = args.nick {
        config.connection.nick = nick;
    }
    if let Some(pass) = args.pass {
        config.connection.pass = pass;
    }
    if !args.channels.is_empty() {
        config.connection.channels = args.channels;
    }
    config.logging.debug_tags.extend(args.debug_tags);
    config.logging.verbose |= args.verbose;
    config.validate().context("invalid configuration")?;

    logger::init(&config.logging);
    logger::info(
        LogTag::System,
        &format!(
            "chatwire {} connecting to {} as {}",
            env!("CARGO_PKG_VERSION"),
            config.connection.url,
            config.connection.nick
        ),
    );

    let context = TransportContext::new(&config);
    let (session, mut events) = ChatSession::connect(&config, &context)?;

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.notify_one()).context("installing Ctrl+C handler")?;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                logger::info(LogTag::System, "Received Ctrl+C, disconnecting...");
                if let Err(e) = session.disconnect().await {
                    logger::warning(LogTag::System, &format!("Disconnect failed: {}", e));
                }
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if args.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    print_event(&event);
                }
                if matches!(event, ChatEvent::ConnectionClosed { .. }) {
                    break;
                }
            }
        }
    }

    for status in context.breaker_report() {
        logger::debug(
            LogTag::CircuitBreaker,
            &format!(
                "{}: {} (failures {})",
                status.name, status.state, status.failure_count
            ),
        );
    }
    logger::info(LogTag::System, "Shutdown complete");
    logger::flush();
    Ok(())
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::MessageReceived(msg) => {
            let marker = if msg.is_action { "*" } else { ":" };
            logger::info(
                LogTag::Irc,
                &format!("[{}] {}{} {}", msg.channel, msg.display_name, marker, msg.text),
            );
        }
        ChatEvent::RawMessage(raw) => {
            logger::verbose(LogTag::Irc, &format!("<< {}", raw.raw));
        }
        ChatEvent::ConnectionError { error } => {
            logger::warning(LogTag::Session, &format!("Connection error: {}", error));
        }
        ChatEvent::ConnectionUnhealthy {
            consecutive_failures,
        } => {
            logger::warning(
                LogTag::Health,
                &format!("Connection unhealthy ({} missed pings)", consecutive_failures),
            );
        }
        ChatEvent::ReconnectExhausted { attempts } => {
            logger::error(
                LogTag::Session,
                &format!("Gave up reconnecting after {} attempts", attempts),
            );
        }
        other => {
            let detail = serde_json::to_string(other).unwrap_or_default();
            logger::info(LogTag::Session, &format!("{} {}", other.name(), detail));
        }
    }
}
