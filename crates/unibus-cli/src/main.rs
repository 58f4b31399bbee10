//! unibus CLI - loopback demonstration of the universal client

use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use unibus_amqp::AmqpBackend;
use unibus_core::{Backend, Credentials, Topology, UniversalClient};
use unibus_harness::{BrokerHub, LoopbackAmqpWire, LoopbackJmsWire};
use unibus_jms::JmsBackend;

mod cli;

use cli::{BackendKind, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = match cli.command {
        Commands::Demo {
            backend,
            topic,
            count,
            allow_echo,
        } => run_demo(backend, &topic, count, !allow_echo).await,
    };

    if let Err(e) = result {
        error!("Demo failed: {e}");
        std::process::exit(1);
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
}

async fn run_demo(
    backend: BackendKind,
    topic: &str,
    count: u32,
    suppress_echo: bool,
) -> unibus_core::Result<()> {
    let hub = BrokerHub::new();
    info!("Starting {backend:?} demo on topic '{topic}'");

    match backend {
        BackendKind::Amqp => {
            let alice = AmqpBackend::new(LoopbackAmqpWire::new(hub.clone()));
            let bob = AmqpBackend::new(LoopbackAmqpWire::new(hub.clone()));
            exchange(alice, bob, topic, count, suppress_echo).await
        }
        BackendKind::Jms => {
            let alice = JmsBackend::new(LoopbackJmsWire::new(hub.clone()));
            let bob = JmsBackend::new(LoopbackJmsWire::new(hub.clone()));
            exchange(alice, bob, topic, count, suppress_echo).await
        }
    }
}

async fn exchange<B: Backend>(
    alice: B,
    bob: B,
    topic: &str,
    count: u32,
    suppress_echo: bool,
) -> unibus_core::Result<()> {
    let mut alice = connect("alice", alice, topic, suppress_echo).await?;
    let mut bob = connect("bob", bob, topic, suppress_echo).await?;
    wait_ready(&alice, "alice").await;
    wait_ready(&bob, "bob").await;

    for round in 1..=count {
        alice
            .send_message(json!({"type": "ping", "round": round}))
            .await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        bob.send_message(json!({"type": "pong", "round": round}))
            .await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for (name, client) in [("alice", &mut alice), ("bob", &mut bob)] {
        let report = client.disconnect().await?;
        if report.all_closed() {
            info!("{name}: all resources closed");
        } else {
            for failure in report.failures() {
                error!("{name}: failed to close {}", failure.resource);
            }
        }
    }
    Ok(())
}

async fn connect<B: Backend>(
    name: &'static str,
    backend: B,
    topic: &str,
    suppress_echo: bool,
) -> unibus_core::Result<UniversalClient<B>> {
    let mut client = UniversalClient::new(backend);
    client
        .connect(
            Credentials::new("ws://hub.local/bus", name, "demo"),
            Topology::new(topic, topic, suppress_echo),
            move |payload| info!("{name} received: {payload:?}"),
        )
        .await?;
    Ok(client)
}

async fn wait_ready<B: Backend>(client: &UniversalClient<B>, name: &str) {
    for _ in 0..200 {
        if client.state_name().await == "Ready" {
            info!("{name} is ready");
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    error!("{name} never became ready");
    std::process::exit(1);
}
