use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use climate_common::{
    config::{Location, WeatherConfig},
    WeatherSnapshot,
};

use crate::error::FetchError;

const HOURLY_ENTITIES: usize = 12;
const DAILY_ENTITIES: usize = 8;

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    current: CurrentConditions,
    #[serde(default)]
    hourly: Vec<HourlyForecast>,
    #[serde(default)]
    daily: Vec<DailyForecast>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    #[serde(default)]
    dt: i64,
    temp: f32,
    sunrise: i64,
    sunset: i64,
    #[serde(default)]
    feels_like: Option<f32>,
    #[serde(default)]
    humidity: Option<u8>,
    #[serde(default)]
    wind_speed: Option<f32>,
    #[serde(default)]
    wind_deg: Option<u16>,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Deserialize)]
struct HourlyForecast {
    #[serde(default)]
    dt: i64,
    temp: f32,
    #[serde(default)]
    feels_like: Option<f32>,
    #[serde(default)]
    humidity: Option<u8>,
    #[serde(default)]
    wind_speed: Option<f32>,
    #[serde(default)]
    pop: Option<f32>,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Deserialize)]
struct DailyForecast {
    #[serde(default)]
    dt: i64,
    temp: DailyTemperature,
    #[serde(default)]
    feels_like: Option<DailyFeelsLike>,
    #[serde(default)]
    humidity: Option<u8>,
    #[serde(default)]
    wind_speed: Option<f32>,
    #[serde(default)]
    pop: Option<f32>,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Deserialize)]
struct DailyTemperature {
    day: f32,
    #[serde(default)]
    min: Option<f32>,
    #[serde(default)]
    max: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct DailyFeelsLike {
    day: f32,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    id: u16,
    #[serde(default)]
    description: String,
}

/// A forecast sensor ready to be written to Home Assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherEntity {
    pub entity_id: String,
    pub payload: Value,
}

/// OpenWeather One Call client with a cached last snapshot.
pub struct WeatherClient {
    client: Client,
    cached: Option<WeatherSnapshot>,
    entities: Vec<WeatherEntity>,
}

impl WeatherClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            cached: None,
            entities: Vec::new(),
        })
    }

    pub fn cached(&self) -> Option<&WeatherSnapshot> {
        self.cached.as_ref()
    }

    /// Entities built by the last successful fetch. Empty until the next
    /// fetch once taken.
    pub fn take_entities(&mut self) -> Vec<WeatherEntity> {
        std::mem::take(&mut self.entities)
    }

    /// Fetches a new snapshot when the cached one is older than the refresh
    /// interval. The cached snapshot is kept on failure.
    pub async fn refresh(
        &mut self,
        config: &WeatherConfig,
        location: &Location,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> Result<&WeatherSnapshot, FetchError> {
        let due = match &self.cached {
            Some(snapshot) => (now - snapshot.fetched_at).num_seconds() >= config.refresh_secs as i64,
            None => true,
        };
        if due {
            let body = self.fetch_forecast(config, location).await?;
            let snapshot = snapshot_from(&body, now)?;
            info!(
                "weather updated: {:.1}°C, {} ({}), next hours {:?}",
                snapshot.current_temp, snapshot.condition, snapshot.weather_code, snapshot.hour_temps
            );
            self.entities = entities_from(&body, tz);
            self.cached = Some(snapshot);
        }
        self.cached
            .as_ref()
            .ok_or_else(|| FetchError::Missing("weather snapshot".to_string()))
    }

    pub async fn fetch(
        &self,
        config: &WeatherConfig,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<WeatherSnapshot, FetchError> {
        let body = self.fetch_forecast(config, location).await?;
        snapshot_from(&body, now)
    }

    async fn fetch_forecast(
        &self,
        config: &WeatherConfig,
        location: &Location,
    ) -> Result<OneCallResponse, FetchError> {
        if config.api_key.is_empty() {
            return Err(FetchError::NotConfigured("weather api key"));
        }

        let url = format!(
            "{}/data/3.0/onecall?lat={}&lon={}&appid={}&units=metric",
            config.base_url.trim_end_matches('/'),
            location.latitude,
            location.longitude,
            config.api_key
        );
        debug!(
            "fetching weather for {},{}",
            location.latitude, location.longitude
        );

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json::<OneCallResponse>().await?),
            status => Err(FetchError::Status {
                source_name: "openweather",
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn snapshot_from(body: &OneCallResponse, now: DateTime<Utc>) -> Result<WeatherSnapshot, FetchError> {
    let [hour0, hour1, hour2] = match body.hourly.as_slice() {
        [first, second, third, ..] => [first.temp, second.temp, third.temp],
        _ => {
            return Err(FetchError::Missing(format!(
                "hourly forecast has {} entries, need 3",
                body.hourly.len()
            )))
        }
    };
    let condition = body
        .current
        .weather
        .first()
        .ok_or_else(|| FetchError::Missing("current weather condition".to_string()))?;
    let sunrise = DateTime::from_timestamp(body.current.sunrise, 0)
        .ok_or_else(|| FetchError::Missing("valid sunrise".to_string()))?;
    let sunset = DateTime::from_timestamp(body.current.sunset, 0)
        .ok_or_else(|| FetchError::Missing("valid sunset".to_string()))?;

    Ok(WeatherSnapshot {
        current_temp: body.current.temp,
        hour_temps: [hour0, hour1, hour2],
        sunrise,
        sunset,
        weather_code: condition.id,
        condition: condition.description.clone(),
        fetched_at: now,
    })
}

/// Current conditions, the next 12 hours and the next 8 days as sensors.
/// Fields missing from the response are left out of the attributes.
fn entities_from(body: &OneCallResponse, tz: Tz) -> Vec<WeatherEntity> {
    let current = &body.current;
    let mut entities = vec![sensor(
        "sensor.tado_optimiser_current".to_string(),
        current.temp,
        local_time(current.dt, tz, "%H:%M - %-d %B %Y"),
        vec![
            ("temp", Some(rounded(current.temp))),
            ("feels_like", current.feels_like.map(rounded)),
            ("humidity", current.humidity.map(Value::from)),
            ("wind_speed", current.wind_speed.map(rounded)),
            ("wind_deg", current.wind_deg.map(Value::from)),
        ],
        &current.weather,
    )];

    entities.extend(body.hourly.iter().take(HOURLY_ENTITIES).enumerate().map(|(hour, forecast)| {
        sensor(
            format!("sensor.tado_optimiser_hour_{hour}"),
            forecast.temp,
            local_time(forecast.dt, tz, "%H:%M - %-d %B %Y"),
            vec![
                ("temp", Some(rounded(forecast.temp))),
                ("feels_like", forecast.feels_like.map(rounded)),
                ("humidity", forecast.humidity.map(Value::from)),
                ("wind_speed", forecast.wind_speed.map(rounded)),
                ("pop", forecast.pop.map(rounded)),
            ],
            &forecast.weather,
        )
    }));

    entities.extend(body.daily.iter().take(DAILY_ENTITIES).enumerate().map(|(day, forecast)| {
        sensor(
            format!("sensor.tado_optimiser_day_{day}"),
            forecast.temp.day,
            local_time(forecast.dt, tz, "%A %-d %B %Y"),
            vec![
                ("temp", Some(rounded(forecast.temp.day))),
                ("temp_min", forecast.temp.min.map(rounded)),
                ("temp_max", forecast.temp.max.map(rounded)),
                ("feels_like", forecast.feels_like.as_ref().map(|f| rounded(f.day))),
                ("humidity", forecast.humidity.map(Value::from)),
                ("wind_speed", forecast.wind_speed.map(rounded)),
                ("pop", forecast.pop.map(rounded)),
            ],
            &forecast.weather,
        )
    }));

    entities
}

fn sensor(
    entity_id: String,
    state: f32,
    friendly_name: String,
    fields: Vec<(&str, Option<Value>)>,
    weather: &[WeatherCondition],
) -> WeatherEntity {
    let mut attributes = Map::new();
    attributes.insert("unit_of_measurement".into(), json!("°C"));
    attributes.insert("friendly_name".into(), json!(friendly_name));
    attributes.insert("icon".into(), json!("mdi:thermometer"));
    for (key, value) in fields {
        if let Some(value) = value {
            attributes.insert(key.to_string(), value);
        }
    }
    if let Some(condition) = weather.first() {
        attributes.insert("weather_id".into(), json!(condition.id));
        attributes.insert("description".into(), json!(capitalize(&condition.description)));
    }

    WeatherEntity {
        entity_id,
        payload: json!({ "state": rounded(state), "attributes": attributes }),
    }
}

// Two decimals, so f32 noise stays out of the published JSON.
fn rounded(value: f32) -> Value {
    json!((f64::from(value) * 100.0).round() / 100.0)
}

fn local_time(timestamp: i64, tz: Tz, format: &str) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|at| at.with_timezone(&tz).format(format).to_string())
        .unwrap_or_default()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
