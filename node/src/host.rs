use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, Incoming, MqttOptions, QoS,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use washer_common::{
    DiscoveryPayload, IndicatorState, LinkAction, LinkSupervisor, NetworkConfig, MQTT_CLIENT_ID,
    PAYLOAD_ONLINE, RECEIVE_BUFFER_BYTES, RETRY_DELAY_MS, TOPIC_AVAILABILITY, TOPIC_DISCOVERY,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut network = NetworkConfig::default();
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
        network.mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
    }
    network.sanitize();

    info!(
        "broker configured at {}:{}",
        network.mqtt_host, network.mqtt_port
    );

    let mut mqtt_options = MqttOptions::new(
        MQTT_CLIENT_ID,
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    mqtt_options.set_max_packet_size(RECEIVE_BUFFER_BYTES, RECEIVE_BUFFER_BYTES);
    if network.has_credentials() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 32);
    let link = Arc::new(Mutex::new(LinkSupervisor::new()));

    spawn_mqtt_loop(link.clone(), mqtt.clone(), eventloop);

    info!("switch node started as `{MQTT_CLIENT_ID}`");

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let now_ms = monotonic_ms();

        let (mut actions, periodic, attempts) = {
            let mut link = link.lock().await;
            (link.poll(now_ms), link.tick(now_ms), link.attempts())
        };

        if actions.contains(&LinkAction::Connect) {
            info!("attempting mqtt connection (attempt {attempts})");
        }
        actions.extend(periodic);
        execute_link_actions(&mqtt, actions).await;
    }
}

fn spawn_mqtt_loop(
    link: Arc<Mutex<LinkSupervisor>>,
    mqtt: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("mqtt connected");
                        let actions = { link.lock().await.connect_succeeded() };
                        execute_link_actions(&mqtt, actions).await;
                    } else {
                        warn!(
                            "mqtt connection refused, rc={}, retrying in {}s",
                            ack.code as u8,
                            RETRY_DELAY_MS / 1000
                        );
                        link.lock().await.connect_failed(monotonic_ms());
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    handle_inbound(&message.topic, &message.payload);
                }
                Ok(_) => {}
                Err(err) => {
                    match &err {
                        ConnectionError::ConnectionRefused(code) => warn!(
                            "mqtt connect failed, rc={}, retrying in {}s",
                            *code as u8,
                            RETRY_DELAY_MS / 1000
                        ),
                        other => warn!(
                            "mqtt session error: {other}, retrying in {}s",
                            RETRY_DELAY_MS / 1000
                        ),
                    }
                    link.lock().await.connect_failed(monotonic_ms());
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
            }
        }
    });
}

async fn execute_link_actions(mqtt: &AsyncClient, actions: Vec<LinkAction>) {
    for action in actions {
        match action {
            LinkAction::Connect => debug!("reconnect is handled by the mqtt session"),
            LinkAction::SetReceiveBufferSize(bytes) => {
                debug!("receive buffer of {bytes} bytes applied at session setup");
            }
            LinkAction::Subscribe(topic) => {
                if let Err(err) = mqtt.subscribe(topic, QoS::AtMostOnce).await {
                    warn!("subscribe to {topic} failed: {err}");
                }
            }
            LinkAction::PublishDiscovery => publish_discovery(mqtt).await,
            LinkAction::PublishAvailability => {
                info!("publishing availability");
                if let Err(err) = mqtt
                    .publish(TOPIC_AVAILABILITY, QoS::AtMostOnce, false, PAYLOAD_ONLINE)
                    .await
                {
                    warn!("availability publish failed: {err}");
                }
            }
        }
    }
}

async fn publish_discovery(mqtt: &AsyncClient) {
    info!("sending discovery message");

    let body = match DiscoveryPayload::for_device().serialize() {
        Ok(body) => body,
        Err(err) => {
            warn!("discovery payload rejected: {err}");
            return;
        }
    };

    info!(
        "discovery payload ({} bytes): {}",
        body.len(),
        String::from_utf8_lossy(&body)
    );
    if let Err(err) = mqtt
        .publish(TOPIC_DISCOVERY, QoS::AtMostOnce, false, body)
        .await
    {
        warn!("discovery publish failed: {err}");
    }
}

fn handle_inbound(topic: &str, payload: &[u8]) {
    if payload.len() > RECEIVE_BUFFER_BYTES {
        warn!(
            "dropping oversized payload on {topic} ({} bytes)",
            payload.len()
        );
        return;
    }

    info!(
        "message arrived on {topic}: {}",
        String::from_utf8_lossy(payload)
    );

    let Some(state) = IndicatorState::from_payload(payload) else {
        warn!("ignoring empty payload on {topic}");
        return;
    };

    // The GPIO driver hooks in here on the ESP target; host builds log the level.
    info!("indicator {} (pin {:?})", state.as_str(), state.pin_level());
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
