use std::{
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{Output, PinDriver};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use washer_common::{
    DiscoveryPayload, IndicatorState, LinkAction, LinkSupervisor, NetworkConfig, PinLevel,
    MQTT_CLIENT_ID, PAYLOAD_ONLINE, RECEIVE_BUFFER_BYTES, RETRY_DELAY_MS, TOPIC_AVAILABILITY,
    TOPIC_DISCOVERY,
};

const NVS_NAMESPACE: &str = "washer";
const NVS_NETWORK_KEY: &str = "network_json";
const INDICATOR_PIN: i32 = 2;
const WIFI_RETRY_DELAY_MS: u64 = 500;
const TICK_INTERVAL_MS: u64 = 250;

struct IndicatorPin {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl IndicatorPin {
    fn init(pin: i32) -> Option<Self> {
        let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) };
        match driver {
            Ok(mut pin) => {
                // Active-low wiring; start dark.
                let _ = pin.set_high();
                Some(Self { pin })
            }
            Err(err) => {
                warn!("indicator unavailable on GPIO{pin}: {err}");
                None
            }
        }
    }

    fn apply(&mut self, state: IndicatorState) {
        let result = match state.pin_level() {
            PinLevel::Low => self.pin.set_low(),
            PinLevel::High => self.pin.set_high(),
        };
        if let Err(err) = result {
            warn!("failed to drive indicator pin: {err}");
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut network = load_network_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load network config from NVS: {err:#}");
        NetworkConfig::default()
    });
    ensure_wifi_defaults(&mut network);
    network.sanitize();

    info!(
        "network config: ssid=`{}`, broker=`{}:{}`",
        network.wifi_ssid, network.mqtt_host, network.mqtt_port
    );

    let Peripherals { modem, .. } = Peripherals::take()?;
    let indicator = IndicatorPin::init(INDICATOR_PIN);

    let wifi =
        connect_wifi(modem, sys_loop, nvs_partition, &network).context("wifi startup failed")?;

    let supervisor = Arc::new(Mutex::new(LinkSupervisor::new()));
    let (mqtt, mqtt_conn) = create_mqtt_client(&network)?;
    let mqtt = Arc::new(Mutex::new(mqtt));

    spawn_mqtt_receiver(supervisor.clone(), mqtt_conn, mqtt.clone(), indicator);

    // Keep the station alive for the program lifetime.
    let _wifi = wifi;

    loop {
        let now_ms = monotonic_ms();

        let (pending, periodic, attempts) = {
            let mut link = supervisor.lock().unwrap();
            (link.poll(now_ms), link.tick(now_ms), link.attempts())
        };

        // The client retries on its own fixed schedule; `Connect` paces the log.
        if pending.contains(&LinkAction::Connect) {
            info!("attempting mqtt connection (attempt {attempts})");
        }
        execute_link_actions(&mqtt, periodic);

        thread::sleep(Duration::from_millis(TICK_INTERVAL_MS));
    }
}

fn ensure_wifi_defaults(network: &mut NetworkConfig) {
    if network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            network.wifi_ssid = ssid.to_string();
        }
    }

    if network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            network.wifi_pass = pass.to_string();
        }
    }
}

fn load_network_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<NetworkConfig> {
    let mut nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 1024];

    match nvs.get_str(NVS_NETWORK_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<NetworkConfig>(value)?),
        None => Ok(NetworkConfig::default()),
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        let outcome = match wifi.connect() {
            Ok(()) => wifi.wait_netif_up(),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                break;
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt} failed: {err}");
                let _ = wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            }
        }
    }

    // A station that drops later stays down until reboot; only the MQTT
    // session has a retry path.
    Ok(esp_wifi)
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some(MQTT_CLIENT_ID),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        buffer_size: RECEIVE_BUFFER_BYTES,
        reconnect_timeout: Some(Duration::from_millis(RETRY_DELAY_MS)),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn spawn_mqtt_receiver(
    supervisor: Arc<Mutex<LinkSupervisor>>,
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
    mut indicator: Option<IndicatorPin>,
) {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        let actions = { supervisor.lock().unwrap().connect_succeeded() };
                        execute_link_actions(&mqtt, actions);
                    }
                    EventPayload::Disconnected => {
                        warn!("mqtt disconnected");
                        supervisor.lock().unwrap().connection_lost(monotonic_ms());
                    }
                    EventPayload::Error(err) => {
                        warn!(
                            "mqtt session error, rc={}, retrying in {}s",
                            err.code(),
                            RETRY_DELAY_MS / 1000
                        );
                        supervisor.lock().unwrap().connect_failed(monotonic_ms());
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        // Only full MQTT payloads are processed.
                        if !matches!(details, Details::Complete) {
                            continue;
                        }
                        handle_inbound(topic, data, &mut indicator);
                    }
                    _ => {}
                },
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .expect("failed to spawn mqtt receiver thread");
}

fn execute_link_actions(mqtt: &Arc<Mutex<EspMqttClient<'static>>>, actions: Vec<LinkAction>) {
    for action in actions {
        match action {
            // The client owns the reconnect schedule.
            LinkAction::Connect => {}
            LinkAction::SetReceiveBufferSize(bytes) => {
                info!("receive buffer of {bytes} bytes applied at client construction");
            }
            LinkAction::Subscribe(topic) => {
                let mut mqtt = mqtt.lock().unwrap();
                if let Err(err) = mqtt.subscribe(topic, QoS::AtMostOnce) {
                    warn!("subscribe to {topic} failed: {err}");
                }
            }
            LinkAction::PublishDiscovery => publish_discovery(mqtt),
            LinkAction::PublishAvailability => {
                info!("publishing availability");
                let mut mqtt = mqtt.lock().unwrap();
                if let Err(err) = mqtt.publish(
                    TOPIC_AVAILABILITY,
                    QoS::AtMostOnce,
                    false,
                    PAYLOAD_ONLINE.as_bytes(),
                ) {
                    warn!("availability publish failed: {err}");
                }
            }
        }
    }
}

fn publish_discovery(mqtt: &Arc<Mutex<EspMqttClient<'static>>>) {
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

    let mut mqtt = mqtt.lock().unwrap();
    if let Err(err) = mqtt.publish(TOPIC_DISCOVERY, QoS::AtMostOnce, false, &body) {
        warn!("discovery publish failed: {err}");
    }
}

fn handle_inbound(topic: &str, data: &[u8], indicator: &mut Option<IndicatorPin>) {
    if data.len() > RECEIVE_BUFFER_BYTES {
        warn!(
            "dropping oversized payload on {topic} ({} bytes)",
            data.len()
        );
        return;
    }

    info!("message arrived on {topic}: {}", String::from_utf8_lossy(data));

    let Some(state) = IndicatorState::from_payload(data) else {
        warn!("ignoring empty payload on {topic}");
        return;
    };

    if let Some(pin) = indicator.as_mut() {
        pin.apply(state);
    }
    info!("indicator {}", state.as_str());
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
