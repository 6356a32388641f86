use std::io::BufRead;

use clap::Parser;
use chatwire::irc::{tags, IrcMessage};

#[derive(Parser)]
#[command(name = "debug_irc_parse")]
#[command(about = "Parse raw IRC lines from stdin and dump their structure", long_about = None)]
struct Args {
    /// Print each parsed message as JSON
    #[arg(long)]
    json: bool,

    /// Decode badges and emotes when present
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let stdin = std::io::stdin();

    let mut parsed = 0usize;
    let mut failed = 0usize;

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let msg = match IrcMessage::parse(&line) {
            Ok(msg) => msg,
            Err(e) => {
                failed += 1;
                println!("[ERROR] {}\n  line: {}", e, line);
                continue;
            }
        };
        parsed += 1;

        if args.json {
            println!("{}", serde_json::to_string(&msg)?);
            continue;
        }

        println!("{}", "=".repeat(80));
        println!("command : {} ({:?})", msg.command, msg.kind());
        if let Some(prefix) = &msg.prefix {
            println!("prefix  : {} (nick {:?})", prefix, msg.nick());
        }
        for (i, param) in msg.params.iter().enumerate() {
            println!("param[{}]: {}", i, param);
        }
        for (key, value) in &msg.tags {
            println!("tag     : {} = {:?}", key, value);
        }

        if args.verbose {
            if let Some(badges) = msg.tag("badges") {
                for badge in tags::parse_badges(badges) {
                    println!("badge   : {}/{}", badge.name, badge.version);
                }
            }
            if let Some(emotes) = msg.tag("emotes") {
                for emote in tags::parse_emotes(emotes) {
                    let ranges: Vec<String> = emote
                        .ranges
                        .iter()
                        .map(|r| format!("{}-{}", r.start, r.end))
                        .collect();
                    println!("emote   : {} at {}", emote.id, ranges.join(","));
                }
            }
        }
    }

    eprintln!("\nParsed {} line(s), {} failed", parsed, failed);
    Ok(())
}
