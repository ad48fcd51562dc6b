use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use climate_common::{GridContext, HvacMode, Presence, RoomConfig, RoomState};

use crate::error::PlatformError;

/// The smart-home side of a cycle: sensor reads and actuator commands.
#[async_trait]
pub trait ClimatePlatform: Send + Sync {
    async fn room_state(&self, room: &RoomConfig) -> Result<RoomState, PlatformError>;

    async fn grid_context(&self, sensor: &str) -> Result<GridContext, PlatformError>;

    async fn set_hvac_mode(&self, entity: &str, mode: HvacMode) -> Result<(), PlatformError>;

    async fn set_temperature(&self, entity: &str, target: f32) -> Result<(), PlatformError>;

    async fn publish_target(&self, room: &RoomConfig, target: f32) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
}

impl EntityState {
    fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unavailable" | "unknown" | "")
    }
}

/// Home Assistant REST client.
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: Client,
}

impl HomeAssistantClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, PlatformError> {
        let token = token.into();
        if token.is_empty() {
            return Err(PlatformError::Config(
                "home assistant token is empty (set SUPERVISOR_TOKEN or HA_TOKEN)".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| PlatformError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub async fn get_state(&self, entity_id: &str) -> Result<EntityState, PlatformError> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;

        match response.status() {
            StatusCode::OK => {
                let state = response.json::<EntityState>().await?;
                debug!("entity {} = '{}'", entity_id, state.state);
                Ok(state)
            }
            StatusCode::NOT_FOUND => Err(PlatformError::EntityNotFound(entity_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PlatformError::AuthenticationFailed)
            }
            status => Err(PlatformError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn get_available_state(&self, entity_id: &str) -> Result<EntityState, PlatformError> {
        let state = self.get_state(entity_id).await?;
        if state.is_unavailable() {
            return Err(PlatformError::EntityNotFound(entity_id.to_string()));
        }
        Ok(state)
    }

    async fn read_number(&self, entity_id: &str) -> Result<f32, PlatformError> {
        let state = self.get_available_state(entity_id).await?;
        state
            .state
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or(PlatformError::InvalidState {
                entity: state.entity_id,
                state: state.state,
            })
    }

    async fn read_mode(&self, entity_id: &str) -> Result<HvacMode, PlatformError> {
        let state = self.get_available_state(entity_id).await?;
        HvacMode::parse(&state.state).ok_or(PlatformError::InvalidState {
            entity: state.entity_id,
            state: state.state,
        })
    }

    /// Only a missing sensor reads as `Unknown`; transport and API failures
    /// propagate so the room is skipped with its away clock untouched.
    async fn read_presence(&self, entity_id: &str) -> Result<Presence, PlatformError> {
        match self.get_state(entity_id).await {
            Ok(state) => Ok(Presence::parse(&state.state)),
            Err(PlatformError::EntityNotFound(_)) => {
                debug!("presence sensor {entity_id} not found");
                Ok(Presence::Unknown)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn call_service(&self, domain: &str, service: &str, data: Value) -> Result<(), PlatformError> {
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&data)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!("service {domain}.{service} ok: {data}");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PlatformError::AuthenticationFailed)
            }
            status => Err(PlatformError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn update_entity(&self, entity_id: &str, payload: Value) -> Result<(), PlatformError> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                debug!("created entity {entity_id}");
                Ok(())
            }
            StatusCode::OK => {
                debug!("updated entity {entity_id}");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PlatformError::AuthenticationFailed)
            }
            status => Err(PlatformError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl ClimatePlatform for HomeAssistantClient {
    async fn room_state(&self, room: &RoomConfig) -> Result<RoomState, PlatformError> {
        let current_temp = self.read_number(&room.temperature_entity()).await?;
        let gas_mode = self.read_mode(&room.gas.climate_entity).await?;
        let electric_mode = match &room.electric {
            Some(electric) => Some(self.read_mode(&electric.climate_entity).await?),
            None => None,
        };
        let presence = self.read_presence(&room.presence_entity()).await?;

        Ok(RoomState {
            current_temp,
            gas_mode,
            electric_mode,
            presence,
        })
    }

    async fn grid_context(&self, sensor: &str) -> Result<GridContext, PlatformError> {
        let power_w = self.read_number(sensor).await?;
        Ok(GridContext {
            importing: power_w > 0.0,
        })
    }

    async fn set_hvac_mode(&self, entity: &str, mode: HvacMode) -> Result<(), PlatformError> {
        self.call_service(
            "climate",
            "set_hvac_mode",
            json!({ "entity_id": entity, "hvac_mode": mode.as_str() }),
        )
        .await
    }

    async fn set_temperature(&self, entity: &str, target: f32) -> Result<(), PlatformError> {
        self.call_service(
            "climate",
            "set_temperature",
            json!({ "entity_id": entity, "temperature": round_tenth(target) }),
        )
        .await
    }

    async fn publish_target(&self, room: &RoomConfig, target: f32) -> Result<(), PlatformError> {
        let payload = json!({
            "state": round_tenth(target),
            "attributes": {
                "unit_of_measurement": "°C",
                "friendly_name": format!("{} Target", room.display_name()),
                "icon": "mdi:thermometer",
            }
        });
        self.update_entity(&room.target_entity(), payload).await
    }
}

fn round_tenth(value: f32) -> f64 {
    (f64::from(value) * 10.0).round() / 10.0
}
