//! Per-connection read/write loop, independent of the wire transport.

use std::{future::Future, sync::Arc};

use anyhow::Result;
use tokio::{
    select,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

use crate::{
    dispatch::DispatchError,
    relay::{Connection, Relay},
    router::Payload,
    session::RegistryError,
};

/// One client's bidirectional channel, as seen by the relay.
pub trait Transport: Send {
    /// Next text frame, or `None` once the peer has closed.
    ///
    /// Must be cancel safe: it is raced against outbound traffic.
    fn receive(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;

    fn send(&mut self, payload: Payload) -> impl Future<Output = Result<()>> + Send;
}

/// Drives one connection until the peer leaves, a write fails or `shutdown`
/// fires. The session is torn down on every exit path.
pub async fn handle_connection<T>(
    mut transport: T,
    relay: Arc<Relay>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    T: Transport,
{
    let (connection, mut outbound) = relay.connect().await?;
    info!(connection = %connection.id(), "connection opened");

    let result = run_session(
        &mut transport,
        &relay,
        &connection,
        &mut outbound,
        &mut shutdown,
    )
    .await;

    let id = connection.id();
    relay.disconnect(connection).await;
    info!(connection = %id, "connection closed");

    result
}

async fn run_session<T>(
    transport: &mut T,
    relay: &Relay,
    connection: &Connection,
    outbound: &mut mpsc::Receiver<Payload>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()>
where
    T: Transport,
{
    if *shutdown.borrow() {
        return Ok(());
    }

    loop {
        select! {
            inbound = transport.receive() => {
                match inbound? {
                    Some(frame) => handle_inbound(relay, connection, &frame).await,
                    None => break,
                }
            }
            payload = outbound.recv() => {
                match payload {
                    Some(payload) => transport.send(payload).await?,
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                debug!(connection = %connection.id(), "shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_inbound(relay: &Relay, connection: &Connection, frame: &str) {
    let id = connection.id();
    match relay.dispatch(connection, frame).await {
        Ok(dispatched) => debug!(
            connection = %id,
            kind = ?dispatched.kind,
            delivered = dispatched.report.delivered_count(),
            "event published"
        ),
        Err(DispatchError::Registry(RegistryError::UnknownSession(_))) => {
            debug!(connection = %id, "frame arrived after session teardown");
        }
        Err(err) => warn!(connection = %id, error = %err, "dropping inbound frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RelayConfig, message::ChatMessage};

    /// In-memory transport: the test plays the client through the channels.
    struct ChannelTransport {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<Payload>,
    }

    struct TestClient {
        to_relay: mpsc::UnboundedSender<String>,
        from_relay: mpsc::UnboundedReceiver<Payload>,
    }

    impl TestClient {
        fn send(&self, frame: &str) {
            self.to_relay.send(frame.to_string()).expect("relay side alive");
        }

        async fn next(&mut self) -> String {
            let payload = tokio::time::timeout(
                std::time::Duration::from_secs(1),
                self.from_relay.recv(),
            )
            .await
            .expect("timed out waiting for payload")
            .expect("relay closed the transport");
            payload.to_string()
        }
    }

    fn channel_transport() -> (ChannelTransport, TestClient) {
        let (to_relay, inbound) = mpsc::unbounded_channel();
        let (outbound, from_relay) = mpsc::unbounded_channel();
        (
            ChannelTransport { inbound, outbound },
            TestClient {
                to_relay,
                from_relay,
            },
        )
    }

    impl Transport for ChannelTransport {
        async fn receive(&mut self) -> Result<Option<String>> {
            Ok(self.inbound.recv().await)
        }

        async fn send(&mut self, payload: Payload) -> Result<()> {
            self.outbound
                .send(payload)
                .map_err(|_| anyhow::anyhow!("client went away"))
        }
    }

    #[tokio::test]
    async fn malformed_frames_do_not_close_the_connection() {
        let relay = Relay::shared(RelayConfig::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (transport, mut client) = channel_transport();
        let task = tokio::spawn(handle_connection(transport, Arc::clone(&relay), stop_rx));

        client.send("{ not json");
        client.send(r#"{"type":"unknown-kind","content":"?","sender":"alice"}"#);
        let join = ChatMessage::add_user("alice").encode().expect("encode");
        client.send(&join);

        assert_eq!(client.next().await, join);
        assert_eq!(relay.sessions().usernames().await, vec!["alice".to_string()]);

        drop(client);
        task.await.expect("task joined").expect("clean close");
        assert!(relay.sessions().is_empty().await);
        assert!(relay.router().subscribers("/topic/public").await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_signal_ends_the_loop_and_cleans_up() {
        let relay = Relay::shared(RelayConfig::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (transport, mut client) = channel_transport();
        let task = tokio::spawn(handle_connection(transport, Arc::clone(&relay), stop_rx));

        client.send(r#"{"type":"add-user","sender":"bob"}"#);
        client.next().await;

        stop_tx.send(true).expect("connection still listening");
        task.await.expect("task joined").expect("clean close");

        assert!(relay.sessions().is_empty().await);
        assert!(relay.router().subscribers("/topic/public").await.is_empty());
    }
}
