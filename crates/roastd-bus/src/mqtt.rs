//! MQTT event bus over `rumqttc`.
//!
//! One connection per [`MqttBus`]. A background task drives the rumqttc
//! event loop: incoming publishes are routed to subscribers by topic filter
//! and delivered through bounded channels (an enqueue, nothing more — a slow
//! subscriber loses messages, the broker connection never stalls).
//! Connection errors are logged and the loop keeps polling; rumqttc
//! reconnects on the next poll.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::topic::topic_matches;
use crate::{BusError, BusMessage, EventBus, SUBSCRIBER_BUFFER};

struct Subscriber {
    filters: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;

/// The production MQTT bus.
pub struct MqttBus {
    client: AsyncClient,
    subscribers: Subscribers,
}

impl MqttBus {
    /// Connect to `url` (`mqtt://host:port`, `tcp://host:port`, or bare
    /// `host:port`; port defaults to 1883) and start the event loop task.
    pub fn connect(url: &str, client_id: &str) -> Result<Self, BusError> {
        let (host, port) = parse_broker_url(url)?;

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, SUBSCRIBER_BUFFER);
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let routing = Arc::clone(&subscribers);
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        route(&routing, &publish.topic, &publish.payload).await;
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt broker connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // rumqttc reconnects on the next poll; pace the loop
                        // so a dead broker does not spin it.
                        warn!(error = %e, "mqtt event loop error; reconnecting");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            subscribers,
        })
    }
}

#[async_trait::async_trait]
impl EventBus for MqttBus {
    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        for topic in topics {
            self.client
                .subscribe(topic.clone(), QoS::AtLeastOnce)
                .await
                .map_err(|e| BusError::Subscribe {
                    reason: e.to_string(),
                })?;
            debug!(topic = %topic, "mqtt subscription requested");
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().await.push(Subscriber {
            filters: topics.to_vec(),
            tx,
        });
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BusError::Publish {
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBus").finish_non_exhaustive()
    }
}

/// Deliver one inbound publish to every matching subscriber without
/// blocking: a full channel drops the message for that subscriber.
async fn route(subscribers: &Subscribers, topic: &str, payload: &[u8]) {
    let mut subscribers = subscribers.lock().await;
    subscribers.retain(|s| !s.tx.is_closed());

    for subscriber in subscribers.iter() {
        if !subscriber.filters.iter().any(|f| topic_matches(f, topic)) {
            continue;
        }
        let message = BusMessage {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        };
        if subscriber.tx.try_send(message).is_err() {
            warn!(topic = %topic, "mqtt subscriber lagging; message dropped");
        }
    }
}

fn parse_broker_url(url: &str) -> Result<(String, u16), BusError> {
    let bare = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    if bare.is_empty() {
        return Err(BusError::Connection {
            reason: format!("empty broker url '{url}'"),
        });
    }

    match bare.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| BusError::Connection {
                reason: format!("bad broker port in '{url}'"),
            })?;
            Ok((host.to_owned(), port))
        }
        None => Ok((bare.to_owned(), 1883)),
    }
}
