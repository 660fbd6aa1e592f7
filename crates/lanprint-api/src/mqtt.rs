// MQTT message-bus link to a printer.
//
// One `AsyncClient` + `EventLoop` pair per connection. The event loop runs
// on its own task and feeds `LinkEvent`s into the channel; a second task
// drains outbound messages onto the request topic. Neither task reconnects:
// the first transport error closes the link.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, TlsConfiguration, Transport,
};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::command::{report_topic, request_topic};
use crate::error::Error;
use crate::link::{
    Channel, ChannelPeer, Connector, Endpoint, LinkEvent, Outbound, TransportSecurity,
};
use crate::tls;

const TLS_PORT: u16 = 8883;
const PLAIN_PORT: u16 = 1883;

/// Printers push full status reports well above rumqttc's 10 KiB default.
const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// rumqttc rejects sub-second keep-alive intervals.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// How long a closing link may take to put DISCONNECT on the wire.
const DISCONNECT_GRACE: Duration = Duration::from_millis(100);

/// Opens MQTT links using rumqttc.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    keep_alive: Duration,
    capacity: usize,
    port: Option<u16>,
}

impl MqttConnector {
    pub fn new(keep_alive: Duration) -> Self {
        Self {
            keep_alive: keep_alive.max(MIN_KEEP_ALIVE),
            capacity: 64,
            port: None,
        }
    }

    /// Override the broker port (8883 with TLS, 1883 without).
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Queue depth of each channel direction.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn options(&self, endpoint: &Endpoint) -> Result<MqttOptions, Error> {
        let client_id = format!("lanprint_{}", uuid::Uuid::new_v4());
        let port = self.port.unwrap_or(if endpoint.security.is_tls() {
            TLS_PORT
        } else {
            PLAIN_PORT
        });

        let mut opts = MqttOptions::new(client_id, endpoint.address.clone(), port);
        opts.set_credentials(
            endpoint.username.clone(),
            endpoint.password.expose_secret().to_owned(),
        );
        opts.set_keep_alive(self.keep_alive);
        opts.set_clean_session(true);
        opts.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        if let TransportSecurity::Tls(mode) = &endpoint.security {
            let config = tls::client_config(mode, &endpoint.device_id)?;
            opts.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(config)));
        }

        Ok(opts)
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_ALIVE)
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Channel, Error> {
        let opts = self.options(endpoint)?;
        let (client, eventloop) = AsyncClient::new(opts, self.capacity);
        let (channel, peer) = Channel::pair(self.capacity);
        let ChannelPeer {
            outbound,
            inbound,
            shutdown,
        } = peer;

        // Tear the tasks down if this future is dropped before we hand out
        // the channel (the caller's connect timeout fired).
        let guard = shutdown.clone().drop_guard();

        debug!(
            device_id = %endpoint.device_id,
            address = %endpoint.address,
            tls = endpoint.security.is_tls(),
            "opening MQTT link"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(run_eventloop(
            eventloop,
            client.clone(),
            endpoint.address.clone(),
            inbound,
            shutdown.clone(),
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::ChannelClosed),
        }

        client
            .subscribe(report_topic(&endpoint.device_id), QoS::AtMostOnce)
            .await
            .map_err(|e| Error::Mqtt(e.to_string()))?;

        tokio::spawn(run_writer(
            client,
            request_topic(&endpoint.device_id),
            outbound,
            shutdown,
        ));

        guard.disarm();
        debug!(device_id = %endpoint.device_id, "MQTT link established");
        Ok(channel)
    }
}

async fn run_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    address: String,
    inbound: mpsc::Sender<LinkEvent>,
    shutdown: CancellationToken,
    ready_tx: oneshot::Sender<Result<(), Error>>,
) {
    let mut ready = Some(ready_tx);

    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                flush_disconnect(&mut eventloop, &client).await;
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, bytes = publish.payload.len(), "inbound message");
                let event = LinkEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if inbound.send(event).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let err = map_connection_error(&address, e);
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(err));
                    }
                    None => {
                        warn!(address = %address, error = %err, "MQTT link lost");
                        let _ = inbound
                            .send(LinkEvent::Closed {
                                reason: Some(err.to_string()),
                            })
                            .await;
                    }
                }
                break;
            }
        }
    }

    shutdown.cancel();
}

/// Queue a DISCONNECT and poll until it is written. Gives up on a link
/// error or once the grace period is over.
async fn flush_disconnect(eventloop: &mut EventLoop, client: &AsyncClient) {
    if client.try_disconnect().is_err() {
        return;
    }
    let written = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    trace!(written, "MQTT disconnect");
}

async fn run_writer(
    client: AsyncClient,
    topic: String,
    mut outbound: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            msg = outbound.recv() => msg,
        };

        // Core dropped its half: the session is gone.
        let Some(msg) = msg else { break };

        trace!(topic = %topic, bytes = msg.payload.len(), "outbound message");
        if let Err(e) = client
            .publish_bytes(topic.as_str(), msg.qos.into(), false, msg.payload)
            .await
        {
            warn!(topic = %topic, error = %e, "publish failed");
            break;
        }
    }

    shutdown.cancel();
}

fn map_connection_error(address: &str, err: ConnectionError) -> Error {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => Error::Authentication {
            message: format!("broker refused credentials ({code:?})"),
        },
        ConnectionError::Tls(e) => Error::Tls(e.to_string()),
        other => Error::Connect {
            address: address.to_owned(),
            reason: other.to_string(),
        },
    }
}
