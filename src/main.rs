//! CLI for PopSub Messenger
//!
//! Subcommands:
//! - `subscribe`: print every message arriving on an exchange until ctrl-c
//! - `publish`: publish a message and wait until it was sent

use clap::{Args, Parser, Subcommand, ValueEnum};
use popsub_messenger::codec::{Codec, CodecKind};
use popsub_messenger::config::{DEFAULT_CONFIG_FILE, Settings, load_config_from};
use popsub_messenger::health::HealthMonitor;
use popsub_messenger::transport::WebSocketTransport;
use popsub_messenger::utils::logging;
use popsub_messenger::{ExchangeKind, Messenger, MessengerConfig, TopicDescriptor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "popsub-messenger", version, about)]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, env = "POPSUB_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to an exchange and print deliveries
    Subscribe {
        #[command(flatten)]
        topic: TopicArgs,
    },
    /// Publish a message (a JSON value, or plain text)
    Publish {
        #[command(flatten)]
        topic: TopicArgs,
        message: String,
        /// Publish the message this many times
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
}

#[derive(Args)]
struct TopicArgs {
    /// Exchange name
    exchange: String,
    #[arg(long, value_enum, default_value_t = Kind::Fanout)]
    kind: Kind,
    #[arg(long)]
    routing_key: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Direct,
    Topic,
    Fanout,
}

impl TopicArgs {
    fn descriptor(&self) -> TopicDescriptor {
        let kind = match self.kind {
            Kind::Direct => ExchangeKind::Direct,
            Kind::Topic => ExchangeKind::Topic,
            Kind::Fanout => ExchangeKind::Fanout,
        };
        let topic = TopicDescriptor::new(kind, self.exchange.clone());
        match &self.routing_key {
            Some(key) => topic.with_routing_key(key.clone()),
            None => topic,
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config_from(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.log.level);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (messenger, task) = start_messenger(&settings, shutdown_rx);

    let health = HealthMonitor::new();
    health.register_readiness_check("messenger", messenger.readiness_check());

    let result = tokio::select! {
        result = run(cli.command, &messenger, &health) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };
    if let Err(e) = result {
        error!("Command failed: {}", e);
    }

    shutdown_tx.send_replace(true);
    if let Err(e) = task.await {
        error!("Messenger task failed: {}", e);
    }
}

fn start_messenger(
    settings: &Settings,
    shutdown: watch::Receiver<bool>,
) -> (Messenger<CodecKind>, JoinHandle<()>) {
    let transport = WebSocketTransport::from_settings(&settings.broker);
    info!(url = %transport.url(), codec = settings.messenger.codec.name(), "Starting messenger");

    Messenger::builder(transport)
        .config(MessengerConfig::from(&settings.messenger))
        .codec(settings.messenger.codec)
        .spawn(shutdown)
}

async fn run(command: Command, messenger: &Messenger<CodecKind>, health: &HealthMonitor) -> CliResult {
    match command {
        Command::Subscribe { topic } => subscribe(messenger, topic.descriptor()).await,
        Command::Publish {
            topic,
            message,
            count,
        } => {
            let result = publish(messenger, topic.descriptor(), &message, count).await;
            for failure in health.check_readiness() {
                warn!(check = %failure, "Not ready");
            }
            result
        }
    }
}

async fn subscribe(messenger: &Messenger<CodecKind>, topic: TopicDescriptor) -> CliResult {
    let mut stream = messenger.subscribe(&topic).await?;
    info!(topic = %topic, "Subscribed, waiting for messages");

    while let Some(entry) = stream.recv().await {
        let delivery = entry?;
        let payload = match delivery.decode::<serde_json::Value, _>(messenger.codec()) {
            Ok(value) => value.to_string(),
            Err(_) => String::from_utf8_lossy(&delivery.body).into_owned(),
        };
        println!(
            "[{}] {} {}: {}",
            delivery.timestamp,
            delivery.exchange,
            delivery.routing_key.as_deref().unwrap_or("-"),
            payload
        );
    }
    Ok(())
}

async fn publish(
    messenger: &Messenger<CodecKind>,
    topic: TopicDescriptor,
    message: &str,
    count: u32,
) -> CliResult {
    let value = serde_json::from_str::<serde_json::Value>(message)
        .unwrap_or_else(|_| serde_json::Value::String(message.to_string()));

    for n in 1..=count {
        let mut confirmation = messenger.publish_confirmed(&topic, &value).await?;
        match confirmation.recv().await {
            Some(Ok(())) => info!(topic = %topic, n, "Message published"),
            Some(Err(e)) => return Err(e.into()),
            None => return Err("messenger stopped before the message was sent".into()),
        }
    }
    Ok(())
}
