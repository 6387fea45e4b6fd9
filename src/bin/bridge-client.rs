use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use lipsum::lipsum_words;
use serial_bridge::{client::BridgeClient, config::Delimiter};
use tracing::{info, Level};

/// Sends a message to a bridge and prints the reply.
/// Without a message, random lorem ipsum text is sent.
#[derive(Parser, Debug)]
struct Args {
    /// Bridge address.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Bridge port.
    #[arg(short, long)]
    port: u16,

    /// What to send.
    #[arg(short, long, conflicts_with = "words")]
    message: Option<String>,

    /// How many lorem ipsum words to send, if no message is given.
    #[arg(short, long, default_value_t = 10)]
    words: usize,

    /// Append this to what is sent, and wait for it in the reply, for example `\r\n`.
    #[arg(short, long)]
    delimiter: Option<String>,

    /// How long the bridge may be quiet before the reply is considered complete, in milliseconds.
    #[arg(short, long, default_value_t = 2000)]
    timeout_ms: u64,

    /// How many times to send.
    #[arg(short, long, default_value_t = 1)]
    repeat: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    serial_bridge::logging::init(Level::INFO, None).await;

    let args = Args::parse();
    let delimiter = match &args.delimiter {
        Some(delimiter) => Delimiter::parse_optional(delimiter)?,
        None => None,
    };

    let mut client = BridgeClient::connect(&args.host, args.port).await?;
    if let Some(delimiter) = &delimiter {
        client = client.with_delimiter(delimiter);
    }

    for _ in 0..args.repeat {
        let mut message = match &args.message {
            Some(message) => message.clone().into_bytes(),
            None => lipsum_words(args.words).into_bytes(),
        };
        if let Some(delimiter) = &delimiter {
            message.extend_from_slice(delimiter.as_bytes());
        }

        info!(message = %String::from_utf8_lossy(&message), "Sending");

        let reply = client
            .request(&message, Duration::from_millis(args.timeout_ms))
            .await?;

        if reply.is_empty() {
            info!("No reply");
        } else {
            println!("{}", String::from_utf8_lossy(&reply));
        }
    }

    client.close().await?;

    Ok(())
}
