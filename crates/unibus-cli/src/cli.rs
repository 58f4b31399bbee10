//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a two-client ping/pong exchange over the loopback broker
    Demo {
        /// Backend variant to demonstrate
        #[arg(short, long, value_enum, default_value_t = BackendKind::Amqp)]
        backend: BackendKind,

        /// Topic both clients publish and subscribe on
        #[arg(short, long, default_value = "news")]
        topic: String,

        /// Number of ping/pong rounds
        #[arg(short, long, default_value_t = 3)]
        count: u32,

        /// Deliver each client's own messages back to it
        #[arg(long)]
        allow_echo: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// AMQP 0-9-1 style backend (fanout exchange, no-local consume)
    Amqp,
    /// JMS style backend (topic, appId message selector)
    Jms,
}
