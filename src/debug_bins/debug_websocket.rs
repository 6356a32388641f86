use std::time::Duration;

use clap::Parser;
use chatwire::{
    config::WebSocketConfig,
    websocket::{WebSocketClient, WsEvent, WsMessage, CLOSE_NORMAL},
};

#[derive(Parser)]
#[command(name = "debug_websocket")]
#[command(about = "Connect to a WebSocket endpoint and print every event", long_about = None)]
struct Args {
    /// ws:// or wss:// endpoint
    #[arg(short, long, default_value = "wss://irc-ws.chat.twitch.tv:443")]
    url: String,

    /// Text frame to send once the connection opens (repeatable)
    #[arg(short, long = "send", value_name = "TEXT")]
    send: Vec<String>,

    /// Seconds to stay connected before closing
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "10000")]
    ping_interval_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "3")]
    max_reconnects: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("WebSocket Debug Tool\n");
    println!("{}", "=".repeat(80));
    println!("Endpoint: {}", args.url);

    let config = WebSocketConfig {
        ping_interval_ms: args.ping_interval_ms,
        max_reconnect_attempts: args.max_reconnects,
        ..WebSocketConfig::default()
    };

    let (client, mut events) = WebSocketClient::connect(&args.url, config)?;
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    let mut frames = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("\n[DONE] {}s elapsed, closing", args.duration);
                client.close(CLOSE_NORMAL, "debug session finished").await?;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let now = chrono::Utc::now().format("%H:%M:%S%.3f");
                match event {
                    WsEvent::Open => {
                        println!("{} [OPEN]", now);
                        for text in &args.send {
                            client.send(text.clone()).await?;
                            println!("{} [SENT] {}", now, text);
                        }
                    }
                    WsEvent::Message(WsMessage::Text(text)) => {
                        frames += 1;
                        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
                            println!("{} [TEXT] {}", now, line);
                        }
                    }
                    WsEvent::Message(WsMessage::Binary(data)) => {
                        frames += 1;
                        println!("{} [BINARY] {} bytes", now, data.len());
                    }
                    WsEvent::Pong { latency } => {
                        println!("{} [PONG] {} ms", now, latency.as_millis());
                    }
                    WsEvent::Close { code, reason } => {
                        println!("{} [CLOSE] {} {}", now, code, reason);
                    }
                    WsEvent::Error { error } => {
                        println!("{} [ERROR] {}", now, error);
                    }
                    WsEvent::Reconnecting { attempt, delay } => {
                        println!("{} [RECONNECTING] attempt {} in {:?}", now, attempt, delay);
                    }
                    WsEvent::MaxReconnectAttempts { attempts } => {
                        println!("{} [GAVE UP] after {} attempts", now, attempts);
                        break;
                    }
                }
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("Messages received: {}", frames);
    println!("Still queued: {}", client.queued().await.unwrap_or(0));
    Ok(())
}
