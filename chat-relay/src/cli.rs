use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DispatchPolicy, RelayConfig, DEFAULT_ENDPOINT_PATH, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_TOPIC,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting WebSocket (and optionally line-protocol) clients.
    Serve(ServeArgs),
    /// Connect to a relay's line-protocol listener and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address for the HTTP/WebSocket listener. Use port 0 for an ephemeral port.
    #[arg(long, env = "CHAT_RELAY_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Optional address for the newline-delimited JSON listener.
    #[arg(long, env = "CHAT_RELAY_TCP_LISTEN")]
    pub tcp_listen: Option<SocketAddr>,

    /// HTTP path that accepts WebSocket upgrades.
    #[arg(long, env = "CHAT_RELAY_ENDPOINT_PATH", default_value = DEFAULT_ENDPOINT_PATH)]
    pub endpoint_path: String,

    /// Broadcast topic every identified client joins.
    #[arg(long, env = "CHAT_RELAY_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Payloads queued per client before deliveries to it are dropped.
    #[arg(long, env = "CHAT_RELAY_OUTBOUND_CAPACITY", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Let add-user replace a username that is already bound.
    #[arg(long, env = "CHAT_RELAY_ALLOW_REBIND")]
    pub allow_rebind: bool,

    /// Refuse send-message until the client has added a user.
    #[arg(long, env = "CHAT_RELAY_REQUIRE_IDENTIFICATION")]
    pub require_identification: bool,

    /// Refuse send-message whose sender is not the bound username.
    #[arg(long, env = "CHAT_RELAY_ENFORCE_SENDER")]
    pub enforce_sender: bool,
}

impl ServeArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            endpoint_path: self.endpoint_path.clone(),
            topic_name: self.topic.clone(),
            outbound_capacity: self.outbound_capacity,
            policy: DispatchPolicy {
                allow_rebind: self.allow_rebind,
                require_identification: self.require_identification,
                enforce_sender: self.enforce_sender,
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Username announced when joining the chat.
    #[arg(long)]
    pub username: String,

    /// Address of the relay's line-protocol listener.
    #[arg(long, default_value = "127.0.0.1:8081")]
    pub server: SocketAddr,
}
