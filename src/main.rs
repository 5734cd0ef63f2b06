//! mqttdeck CLI
//!
//! Command-line front end for the message bus:
//! - Watch topics and print decoded values
//! - Publish a single message
//! - Generate a default config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use mqttdeck::config::{generate_default_config, Config};
use mqttdeck::extract::{extract, FieldPath};
use mqttdeck::{CacheEvent, MessageBus, MqttTransport, SubscribeOutcome};

#[derive(Parser)]
#[command(name = "mqttdeck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MQTT dashboard message bus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/mqttdeck/config.toml, then ./mqttdeck.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Broker URL, overrides the config file
    #[arg(short, long, global = true)]
    pub broker: Option<String>,

    /// Seconds to wait for the broker to accept the connection
    #[arg(long, default_value = "10", global = true)]
    pub connect_timeout: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe and print every decoded message
    Watch {
        /// Topic filters (default: the topics of configured widgets)
        topics: Vec<String>,
        /// Field path to print instead of the whole decoded value
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Publish one message and exit
    Publish {
        topic: String,
        payload: String,
    },

    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        return write_default_config(output.as_deref());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(broker) = &cli.broker {
        config.broker.url = broker.clone();
    }

    mqttdeck::logging::init(&config.logging)?;
    tracing::info!("mqttdeck v{}", env!("CARGO_PKG_VERSION"));

    let bus = build_bus(&config).await?;
    let timeout = Duration::from_secs(cli.connect_timeout);

    let result = match cli.command {
        Commands::Watch { topics, path } => watch(&bus, &config, topics, path, timeout).await,
        Commands::Publish { topic, payload } => {
            publish(&bus, &config, &topic, &payload, timeout).await
        }
        Commands::InitConfig { .. } => Ok(()),
    };

    bus.shutdown().await?;
    result
}

fn write_default_config(output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("writing config to {}", path.display()))?;
            println!("Config written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Bus with the configured parsers and widgets installed
async fn build_bus(config: &Config) -> anyhow::Result<MessageBus> {
    let transport = Arc::new(MqttTransport::new(config.broker.command_capacity));
    let history = config.history_store().context("opening series history")?;

    let bus = MessageBus::new(transport, config.bus_config(), history);
    bus.init()?;

    for spec in &config.parsers {
        bus.set_parser(&spec.topic, spec.build()?).await;
    }
    for widget in &config.widgets {
        let binding = bus.add_widget(widget).await?;
        tracing::debug!(series_id = %binding.series_id, topic = %binding.topic, "Widget bound");
    }

    Ok(bus)
}

async fn connect(bus: &MessageBus, config: &Config, timeout: Duration) -> anyhow::Result<()> {
    let mut state = bus.watch_state();
    bus.connect(&config.broker.url, config.connect_options())
        .await?;

    tokio::time::timeout(timeout, state.wait_for(|s| s.is_connected()))
        .await
        .with_context(|| {
            format!(
                "broker {} did not accept the connection within {:?} ({})",
                config.broker.url,
                timeout,
                bus.state()
            )
        })??;

    Ok(())
}

async fn watch(
    bus: &MessageBus,
    config: &Config,
    topics: Vec<String>,
    path: Option<String>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut topics = topics;
    if topics.is_empty() {
        topics = config.widgets.iter().map(|w| w.topic.clone()).collect();
        topics.sort();
        topics.dedup();
    }
    anyhow::ensure!(!topics.is_empty(), "no topics given and no widgets configured");

    let path = path.as_deref().and_then(FieldPath::parse);
    let mut messages = bus.watch_messages().await;

    connect(bus, config, timeout).await?;
    for topic in &topics {
        if bus.subscribe(topic).await? == SubscribeOutcome::AlreadySubscribed {
            tracing::info!(topic = %topic, "Already subscribed");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(());
            }
            event = messages.recv() => match event {
                Ok(CacheEvent::Updated(message)) => {
                    let time = chrono::DateTime::from_timestamp_millis(message.received_at)
                        .map(|t| t.format("%H:%M:%S%.3f").to_string())
                        .unwrap_or_default();
                    match extract(Some(&message), path.as_ref()) {
                        Some(value) => println!("{} {} {}", time, message.topic, value),
                        None => println!(
                            "{} {} <unparsed> {}",
                            time,
                            message.topic,
                            message.payload_str()
                        ),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Display fell behind; showing latest values");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn publish(
    bus: &MessageBus,
    config: &Config,
    topic: &str,
    payload: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    connect(bus, config, timeout).await?;
    bus.publish(topic, payload).await?;
    println!("Published {} bytes to {}", payload.len(), topic);

    // Commands are queued; give the session a moment to write them out
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(())
}
