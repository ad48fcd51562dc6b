use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info};

use climate_common::{config::OctopusConfig, TariffSnapshot};

use crate::error::FetchError;

const SOURCE: &str = "octopus";

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Property {
    #[serde(default)]
    pub electricity_meter_points: Vec<ElectricityMeterPoint>,
    #[serde(default)]
    pub gas_meter_points: Vec<GasMeterPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElectricityMeterPoint {
    #[serde(default)]
    pub is_export: bool,
    #[serde(default)]
    pub agreements: Vec<Agreement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasMeterPoint {
    #[serde(default)]
    pub agreements: Vec<Agreement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agreement {
    pub tariff_code: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Agreement {
    fn active_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= now)
            && self.valid_to.map_or(true, |to| now < to)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitRate {
    pub value_inc_vat: f32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl UnitRate {
    fn covers(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |to| at < to)
    }
}

#[derive(Debug, Deserialize)]
struct RatesPage {
    #[serde(default)]
    results: Vec<UnitRate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FuelKind {
    Electricity,
    Gas,
}

impl FuelKind {
    fn tariffs_path(self) -> &'static str {
        match self {
            Self::Electricity => "electricity-tariffs",
            Self::Gas => "gas-tariffs",
        }
    }
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    fn older_than(&self, now: DateTime<Utc>, secs: u64) -> bool {
        (now - self.fetched_at).num_seconds() >= secs as i64
    }
}

/// One half-hour slot of the electricity price forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSlot {
    pub offset_minutes: i64,
    pub price: f32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Octopus Energy REST client. Account data and unit rates are cached and
/// refreshed on their own intervals.
pub struct OctopusClient {
    client: Client,
    account: Option<Cached<Account>>,
    electricity: Option<Cached<Vec<UnitRate>>>,
    gas: Option<Cached<Vec<UnitRate>>>,
}

/// Product code embedded in a tariff code, e.g. `E-1R-AGILE-24-10-01-C`
/// becomes `AGILE-24-10-01`.
pub fn product_code(tariff_code: &str) -> Option<&str> {
    if tariff_code.len() <= 7 {
        return None;
    }
    tariff_code.get(5..tariff_code.len() - 2)
}

/// Tariff code of the import electricity agreement active at `now`.
pub fn active_electricity_tariff(account: &Account, now: DateTime<Utc>) -> Option<&str> {
    account
        .properties
        .first()?
        .electricity_meter_points
        .iter()
        .filter(|meter| !meter.is_export)
        .flat_map(|meter| meter.agreements.iter())
        .find(|agreement| agreement.active_at(now))
        .map(|agreement| agreement.tariff_code.as_str())
}

/// Tariff code of the open-ended gas agreement that has started by `now`.
pub fn active_gas_tariff(account: &Account, now: DateTime<Utc>) -> Option<&str> {
    account
        .properties
        .first()?
        .gas_meter_points
        .first()?
        .agreements
        .iter()
        .find(|agreement| agreement.valid_to.is_none() && agreement.active_at(now))
        .map(|agreement| agreement.tariff_code.as_str())
}

pub fn electricity_price_at(rates: &[UnitRate], at: DateTime<Utc>) -> Option<&UnitRate> {
    rates.iter().find(|rate| rate.covers(at))
}

/// Direct-debit gas rate covering `now`. Rates without a payment method apply
/// to every method.
pub fn gas_price_at(rates: &[UnitRate], now: DateTime<Utc>) -> Option<f32> {
    rates
        .iter()
        .filter(|rate| {
            rate.payment_method
                .as_deref()
                .map_or(true, |method| method == "DIRECT_DEBIT")
        })
        .find(|rate| rate.covers(now))
        .map(|rate| rate.value_inc_vat)
}

fn rates_due(
    cached: &Option<Cached<Vec<UnitRate>>>,
    refresh_secs: u64,
    now: DateTime<Utc>,
    covers_now: impl Fn(&[UnitRate]) -> bool,
) -> bool {
    match cached {
        Some(cached) => cached.older_than(now, refresh_secs) || !covers_now(&cached.value),
        None => true,
    }
}

impl OctopusClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            account: None,
            electricity: None,
            gas: None,
        })
    }

    /// Current prices, refreshing account data and unit rates when due.
    pub async fn snapshot(
        &mut self,
        config: &OctopusConfig,
        now: DateTime<Utc>,
    ) -> Result<TariffSnapshot, FetchError> {
        if config.api_key.is_empty() || config.account.is_empty() {
            return Err(FetchError::NotConfigured("octopus api key and account"));
        }

        let account_due = self
            .account
            .as_ref()
            .map_or(true, |cached| cached.older_than(now, config.account_refresh_secs));
        if account_due {
            let account = self
                .get::<Account>(config, &format!("/v1/accounts/{}/", config.account))
                .await?;
            info!("octopus account data updated");
            self.account = Some(Cached {
                value: account,
                fetched_at: now,
            });
        }

        if rates_due(&self.electricity, config.rates_refresh_secs, now, |rates| {
            electricity_price_at(rates, now).is_some()
        }) {
            let rates = self.fetch_rates(config, FuelKind::Electricity, now).await?;
            self.electricity = Some(Cached {
                value: rates,
                fetched_at: now,
            });
        }
        if rates_due(&self.gas, config.rates_refresh_secs, now, |rates| {
            gas_price_at(rates, now).is_some()
        }) {
            let rates = self.fetch_rates(config, FuelKind::Gas, now).await?;
            self.gas = Some(Cached {
                value: rates,
                fetched_at: now,
            });
        }

        let (Some(electricity), Some(gas)) = (&self.electricity, &self.gas) else {
            return Err(FetchError::Missing("unit rates".to_string()));
        };
        let electric_price = electricity_price_at(&electricity.value, now)
            .map(|rate| rate.value_inc_vat)
            .ok_or_else(|| FetchError::Missing(format!("electricity rate for {now}")))?;
        let gas_price = gas_price_at(&gas.value, now)
            .ok_or_else(|| FetchError::Missing(format!("gas rate for {now}")))?;

        Ok(TariffSnapshot {
            electric_price,
            gas_price,
            fetched_at: electricity.fetched_at.min(gas.fetched_at),
        })
    }

    /// Electricity prices for the slots starting at each offset from `now`.
    pub fn price_forecast(&self, now: DateTime<Utc>, offsets: &[i64]) -> Vec<PriceSlot> {
        let Some(electricity) = &self.electricity else {
            return Vec::new();
        };
        offsets
            .iter()
            .filter_map(|&offset| {
                let at = now + chrono::Duration::minutes(offset);
                electricity_price_at(&electricity.value, at).map(|rate| PriceSlot {
                    offset_minutes: offset,
                    price: rate.value_inc_vat,
                    valid_from: rate.valid_from,
                    valid_to: rate.valid_to,
                })
            })
            .collect()
    }

    async fn fetch_rates(
        &self,
        config: &OctopusConfig,
        fuel: FuelKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnitRate>, FetchError> {
        let account = self
            .account
            .as_ref()
            .map(|cached| &cached.value)
            .ok_or_else(|| FetchError::Missing("octopus account data".to_string()))?;
        let tariff_code = match fuel {
            FuelKind::Electricity => active_electricity_tariff(account, now),
            FuelKind::Gas => active_gas_tariff(account, now),
        }
        .ok_or_else(|| FetchError::Missing(format!("active {} agreement", fuel.tariffs_path())))?;
        let product = product_code(tariff_code)
            .ok_or_else(|| FetchError::Missing(format!("product code in {tariff_code}")))?;

        let path = format!(
            "/v1/products/{}/{}/{}/standard-unit-rates/",
            product,
            fuel.tariffs_path(),
            tariff_code
        );
        let page = self.get::<RatesPage>(config, &path).await?;
        info!(
            "{} rates updated for {tariff_code}: {} entries",
            fuel.tariffs_path(),
            page.results.len()
        );
        Ok(page.results)
    }

    async fn get<T: DeserializeOwned>(&self, config: &OctopusConfig, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", config.base_url.trim_end_matches('/'), path);
        debug!("octopus GET {path}");
        let response = self
            .client
            .get(&url)
            .basic_auth(&config.api_key, Some(""))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<T>().await?),
            status => Err(FetchError::Status {
                source_name: SOURCE,
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
