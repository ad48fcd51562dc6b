use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use climate_common::{
    room_decision_topic, EngineError, RoomConfig, RoomEngine, RuntimeConfig, TariffSnapshot,
    WeatherSnapshot, TOPIC_CONTROLLER_STATE,
};

use crate::{
    cycle::{self, CycleReport},
    platform::HomeAssistantClient,
    store::{AppStore, AwayState},
    tariff::{OctopusClient, PriceSlot},
    weather::{WeatherClient, WeatherEntity},
};

const FORECAST_OFFSETS: [i64; 10] = [0, 30, 60, 90, 120, 150, 180, 210, 240, 270];

#[derive(Clone)]
struct AppState {
    engines: Arc<Mutex<HashMap<String, RoomEngine>>>,
    sources: Arc<Mutex<Sources>>,
    last_report: Arc<Mutex<Option<CycleReport>>>,
    last_error: Arc<Mutex<Option<String>>>,
    platform: Arc<HomeAssistantClient>,
    mqtt: Option<AsyncClient>,
    store: AppStore,
    cycle_lock: Arc<Mutex<()>>,
}

struct Sources {
    weather: WeatherClient,
    octopus: OctopusClient,
    tariff: Option<TariffSnapshot>,
}

struct Refreshed {
    weather: Option<WeatherSnapshot>,
    tariff: Option<TariffSnapshot>,
    forecast: Vec<PriceSlot>,
    weather_entities: Vec<WeatherEntity>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(rename = "lastReport")]
    last_report: Option<CycleReport>,
    #[serde(rename = "lastError")]
    last_error: Option<String>,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

#[derive(Debug, Serialize)]
struct CycleSummary<'a> {
    at: DateTime<Utc>,
    sector: &'a str,
    #[serde(rename = "electricPrice")]
    electric_price: f32,
    #[serde(rename = "gasPrice")]
    gas_price: f32,
    rooms: usize,
    skipped: usize,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let runtime = load_config(&store).await;

    let platform = HomeAssistantClient::new(
        runtime.home_assistant.base_url.clone(),
        runtime.home_assistant.token.clone(),
    )
    .context("failed to create home assistant client")?;

    let away = store.load_away_state().await.unwrap_or_else(|err| {
        warn!("failed to load away state from store: {err:#}");
        AwayState::new()
    });
    if !away.is_empty() {
        info!("restored away state for {} rooms", away.len());
    }

    let sources = Sources {
        weather: WeatherClient::new().context("failed to create weather client")?,
        octopus: OctopusClient::new().context("failed to create octopus client")?,
        tariff: None,
    };

    let mqtt = if runtime.mqtt.enabled() {
        let mut options = MqttOptions::new(
            "climate-controller",
            runtime.mqtt.host.clone(),
            runtime.mqtt.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if !runtime.mqtt.user.is_empty() {
            options.set_credentials(runtime.mqtt.user.clone(), runtime.mqtt.pass.clone());
        }
        let (client, eventloop) = AsyncClient::new(options, 64);
        spawn_mqtt_loop(eventloop);
        Some(client)
    } else {
        info!("mqtt host not configured, decision telemetry disabled");
        None
    };

    let app_state = AppState {
        engines: Arc::new(Mutex::new(cycle::restore_engines(&away))),
        sources: Arc::new(Mutex::new(sources)),
        last_report: Arc::new(Mutex::new(None)),
        last_error: Arc::new(Mutex::new(None)),
        platform: Arc::new(platform),
        mqtt,
        store,
        cycle_lock: Arc::new(Mutex::new(())),
    };

    spawn_control_loop(app_state.clone(), runtime.cycle_interval_secs);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/rooms", get(handle_get_rooms).put(handle_put_rooms))
        .route("/api/cycle", post(handle_post_cycle))
        .route("/api/away", get(handle_get_away))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn load_config(store: &AppStore) -> RuntimeConfig {
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();
    runtime
}

fn apply_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(token) = non_empty("SUPERVISOR_TOKEN").or_else(|| non_empty("HA_TOKEN")) {
        runtime.home_assistant.token = token;
    }
    if let Some(url) = non_empty("HA_BASE_URL") {
        runtime.home_assistant.base_url = url;
    }
    if let Some(key) = non_empty("OPEN_WEATHER_API_KEY") {
        runtime.weather.api_key = key;
    }
    if let Some(key) = non_empty("OCTOPUS_API_KEY") {
        runtime.octopus.api_key = key;
    }
    if let Some(account) = non_empty("OCTOPUS_ACCOUNT") {
        runtime.octopus.account = account;
    }
    if let Some(host) = non_empty("MQTT_HOST") {
        runtime.mqtt.host = host;
    }
    if let Some(port) = non_empty("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.mqtt.port = port;
    }
    if let Some(user) = non_empty("MQTT_USER") {
        runtime.mqtt.user = user;
    }
    if let Some(pass) = non_empty("MQTT_PASS") {
        runtime.mqtt.pass = pass;
    }
}

fn spawn_mqtt_loop(mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(app_state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;
            if let Err(err) = execute_cycle(&app_state).await {
                warn!("cycle failed: {err:#}");
            }
        }
    });
}

async fn execute_cycle(app_state: &AppState) -> anyhow::Result<CycleReport> {
    let _guard = app_state.cycle_lock.lock().await;
    let config = load_config(&app_state.store).await;
    let tz = config.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone '{}', using Europe/London", config.timezone);
        chrono_tz::Europe::London
    });
    let now = Utc::now();

    let Refreshed {
        weather,
        tariff,
        forecast,
        weather_entities,
    } = refresh_sources(app_state, &config, tz, now).await;
    if !weather_entities.is_empty() {
        publish_weather_entities(&app_state.platform, &weather_entities).await;
    }
    if !forecast.is_empty() {
        publish_price_forecast(&app_state.platform, &forecast).await;
    }

    let result = {
        let mut engines = app_state.engines.lock().await;
        let result = cycle::run_cycle(
            app_state.platform.as_ref(),
            &config,
            tz,
            weather.as_ref(),
            tariff.as_ref(),
            &mut engines,
            now,
        )
        .await;
        if let Err(err) = app_state
            .store
            .save_away_state(&cycle::away_state(&engines))
            .await
        {
            warn!("failed to persist away state: {err:#}");
        }
        result
    };

    match result {
        Ok(report) => {
            publish_report(app_state, &report).await;
            *app_state.last_report.lock().await = Some(report.clone());
            *app_state.last_error.lock().await = None;
            Ok(report)
        }
        Err(err) => {
            if matches!(err, EngineError::StaleSnapshot(_)) {
                warn!("cycle deferred: {err}");
            }
            *app_state.last_error.lock().await = Some(err.to_string());
            Err(err).context("cycle not run")
        }
    }
}

async fn refresh_sources(
    app_state: &AppState,
    config: &RuntimeConfig,
    tz: Tz,
    now: DateTime<Utc>,
) -> Refreshed {
    let mut sources = app_state.sources.lock().await;

    let weather = match sources
        .weather
        .refresh(&config.weather, &config.location, tz, now)
        .await
    {
        Ok(snapshot) => Some(snapshot.clone()),
        Err(err) => {
            warn!("weather refresh failed: {err}");
            sources.weather.cached().cloned()
        }
    };

    match sources.octopus.snapshot(&config.octopus, now).await {
        Ok(snapshot) => sources.tariff = Some(snapshot),
        Err(err) => warn!("tariff refresh failed: {err}"),
    }
    let forecast = sources.octopus.price_forecast(now, &FORECAST_OFFSETS);

    Refreshed {
        weather,
        tariff: sources.tariff.clone(),
        forecast,
        weather_entities: sources.weather.take_entities(),
    }
}

async fn publish_weather_entities(platform: &HomeAssistantClient, entities: &[WeatherEntity]) {
    let mut failed = 0;
    for entity in entities {
        if let Err(err) = platform.update_entity(&entity.entity_id, entity.payload.clone()).await {
            warn!("failed to update {}: {err}", entity.entity_id);
            failed += 1;
        }
    }
    info!(
        "weather entities updated: {} of {}",
        entities.len() - failed,
        entities.len()
    );
}

async fn publish_price_forecast(platform: &HomeAssistantClient, slots: &[PriceSlot]) {
    for slot in slots {
        let until = slot
            .valid_to
            .map(|to| to.format("%H:%M").to_string())
            .unwrap_or_default();
        let payload = json!({
            "state": slot.price,
            "attributes": {
                "unit_of_measurement": "p",
                "friendly_name": format!("{} - {}", slot.valid_from.format("%H:%M"), until),
                "icon": "mdi:currency-gbp",
            }
        });
        let entity = format!("sensor.agile_electricity_price_{}", slot.offset_minutes);
        if let Err(err) = platform.update_entity(&entity, payload).await {
            warn!("failed to update {entity}: {err}");
        }
    }
}

async fn publish_report(app_state: &AppState, report: &CycleReport) {
    let Some(mqtt) = &app_state.mqtt else {
        return;
    };

    for outcome in &report.rooms {
        match serde_json::to_vec(&outcome.decision) {
            Ok(body) => {
                if let Err(err) = mqtt
                    .publish(
                        room_decision_topic(&outcome.decision.room),
                        QoS::AtLeastOnce,
                        true,
                        body,
                    )
                    .await
                {
                    warn!("decision publish failed: {err}");
                }
            }
            Err(err) => warn!("decision serialization failed: {err}"),
        }
    }

    let summary = CycleSummary {
        at: report.at,
        sector: report.sector.as_str(),
        electric_price: report.electric_price,
        gas_price: report.gas_price,
        rooms: report.rooms.len(),
        skipped: report.skipped.len(),
    };
    match serde_json::to_vec(&summary) {
        Ok(body) => {
            if let Err(err) = mqtt
                .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                .await
            {
                warn!("controller state publish failed: {err}");
            }
        }
        Err(err) => warn!("controller state serialization failed: {err}"),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusView {
        last_report: state.last_report.lock().await.clone(),
        last_error: state.last_error.lock().await.clone(),
        now_epoch: Utc::now().timestamp(),
    })
}

async fn handle_get_rooms(State(state): State<AppState>) -> impl IntoResponse {
    Json(load_config(&state.store).await.rooms)
}

async fn handle_put_rooms(
    State(state): State<AppState>,
    Json(rooms): Json<Vec<RoomConfig>>,
) -> impl IntoResponse {
    if let Err(message) = validate_rooms_update(&rooms) {
        return error_response(StatusCode::BAD_REQUEST, &message);
    }

    let mut runtime = match state.store.load_runtime_config().await {
        Ok(runtime) => runtime,
        Err(err) => {
            warn!("failed to load existing runtime config for rooms update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load runtime settings",
            );
        }
    };
    runtime.rooms = rooms;

    if let Err(err) = state.store.save_runtime_config(&runtime).await {
        warn!("failed to persist rooms update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    Json(runtime.rooms).into_response()
}

async fn handle_post_cycle(State(state): State<AppState>) -> impl IntoResponse {
    match execute_cycle(&state).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &format!("{err:#}")),
    }
}

async fn handle_get_away(State(state): State<AppState>) -> impl IntoResponse {
    let engines = state.engines.lock().await;
    Json(cycle::away_state(&engines))
}

fn validate_rooms_update(rooms: &[RoomConfig]) -> Result<(), String> {
    for (index, room) in rooms.iter().enumerate() {
        room.validate().map_err(|err| err.to_string())?;
        if rooms[..index].iter().any(|other| other.id == room.id) {
            return Err(format!("duplicate room id '{}'", room.id));
        }
    }
    Ok(())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_common::{GasHeatKind, GasHeatSource};
    use mockito::{Matcher, Server};

    fn room(id: &str) -> RoomConfig {
        RoomConfig {
            id: id.to_string(),
            day: 18.0,
            evening: 20.0,
            night: 16.0,
            sun_correction: None,
            gas: GasHeatSource {
                climate_entity: format!("climate.{id}"),
                power_w: 2_000.0,
                kind: GasHeatKind::Valve,
            },
            electric: None,
            temperature_sensor: None,
            presence_sensor: None,
        }
    }

    #[test]
    fn env_overrides_replace_stored_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SUPERVISOR_TOKEN", "supervisor"),
            ("HA_TOKEN", "ignored"),
            ("OCTOPUS_ACCOUNT", "A-1"),
            ("MQTT_PORT", "1884"),
            ("MQTT_HOST", "  "),
        ]);
        let mut runtime = RuntimeConfig::default();
        runtime.mqtt.host = "broker".into();

        apply_overrides(&mut runtime, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(runtime.home_assistant.token, "supervisor");
        assert_eq!(runtime.octopus.account, "A-1");
        assert_eq!(runtime.mqtt.port, 1884);
        assert_eq!(runtime.mqtt.host, "broker");
    }

    #[test]
    fn ha_token_used_without_supervisor() {
        let mut runtime = RuntimeConfig::default();
        apply_overrides(&mut runtime, |key| {
            (key == "HA_TOKEN").then(|| "long-lived".to_string())
        });
        assert_eq!(runtime.home_assistant.token, "long-lived");
    }

    #[test]
    fn rooms_update_rejects_duplicates_and_invalid_rooms() {
        assert!(validate_rooms_update(&[room("lounge"), room("kitchen")]).is_ok());

        let duplicate = validate_rooms_update(&[room("lounge"), room("lounge")]);
        assert_eq!(duplicate, Err("duplicate room id 'lounge'".to_string()));

        let mut bad = room("hall");
        bad.day = 40.0;
        assert!(validate_rooms_update(&[bad]).is_err());
    }

    #[tokio::test]
    async fn weather_entities_are_posted_past_failures() {
        let mut server = Server::new_async().await;
        let current = server
            .mock("POST", "/api/states/sensor.tado_optimiser_current")
            .match_header("authorization", "Bearer token")
            .match_body(Matcher::PartialJson(json!({
                "state": 7.3,
                "attributes": { "unit_of_measurement": "°C", "humidity": 81 }
            })))
            .with_status(500)
            .create_async()
            .await;
        let hour = server
            .mock("POST", "/api/states/sensor.tado_optimiser_hour_0")
            .match_body(Matcher::PartialJson(json!({ "state": 8.1 })))
            .with_status(201)
            .create_async()
            .await;

        let platform = HomeAssistantClient::new(server.url(), "token").unwrap();
        let entities = vec![
            WeatherEntity {
                entity_id: "sensor.tado_optimiser_current".into(),
                payload: json!({
                    "state": 7.3,
                    "attributes": { "unit_of_measurement": "°C", "humidity": 81 }
                }),
            },
            WeatherEntity {
                entity_id: "sensor.tado_optimiser_hour_0".into(),
                payload: json!({ "state": 8.1, "attributes": {} }),
            },
        ];

        publish_weather_entities(&platform, &entities).await;

        current.assert_async().await;
        hour.assert_async().await;
    }
}
