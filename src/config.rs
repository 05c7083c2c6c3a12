use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ConfigError;

/// Per-shift context: which calendar day's detail column gets written and how
/// voucher face values convert to fuel volume.
///
/// Constructed once per shift session and edited in place when the operator
/// changes the date/time/price controls; extractors borrow it read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftConfig {
    pub date: NaiveDate,
    pub work_start_time: NaiveDateTime,
    pub shift_time: NaiveDateTime,
    gas_price: f64,
}

impl ShiftConfig {
    pub fn new(
        date: NaiveDate,
        work_start_time: NaiveDateTime,
        shift_time: NaiveDateTime,
        gas_price: f64,
    ) -> Result<Self, ConfigError> {
        if !(gas_price > 0.0) {
            return Err(ConfigError::NonPositiveGasPrice(gas_price));
        }
        Ok(Self {
            date,
            work_start_time,
            shift_time,
            gas_price,
        })
    }

    pub fn gas_price(&self) -> f64 {
        self.gas_price
    }

    pub fn set_gas_price(&mut self, gas_price: f64) -> Result<(), ConfigError> {
        if !(gas_price > 0.0) {
            return Err(ConfigError::NonPositiveGasPrice(gas_price));
        }
        self.gas_price = gas_price;
        Ok(())
    }
}

const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Credentials and model selection for the vision-recognition service.
#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl VisionSettings {
    /// Read settings from the environment, loading `.env` first so production
    /// users can place credentials next to the executable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingEnv("GEMINI_API_KEY"))?;
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let endpoint =
            std::env::var("GEMINI_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Ok(Self {
            api_key,
            model,
            endpoint,
        })
    }
}
