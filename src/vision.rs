//! Vision-recognition collaborator: image bytes in, category-schema-shaped
//! JSON out. The model call is a black box behind [`VisionExtractor`].

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::VisionSettings;
use crate::error::VisionError;
use crate::extractors::Category;
use crate::types::RawExtractionResult;

/// Narrow seam to the image-recognition service, so the batch runner can be
/// exercised with a stub.
pub trait VisionExtractor: Send + Sync {
    fn extract(
        &self,
        image_path: &Path,
        category: Category,
    ) -> Result<RawExtractionResult, VisionError>;
}

const SYSTEM_PROMPT: &str = "You are an AI assistant specialized in analyzing gas station \
management system data and reports. You understand standard Chinese terminology used in gas \
station operations: transaction amounts (交易金额), fuel volumes (油品数量), payment methods \
(支付方式), discounts (优惠金额), service fees (服务费), and settlement amounts (结算金额). \
对于无法识别或不存在的字段，使用 null 表示。保持数据的原始格式，不要进行格式转换。\
对于金额相关数据，保留原始精度。";

/// Per-category user prompt: names the expected keys and pins strict JSON.
fn recognition_prompt(category: Category) -> String {
    let fields = category
        .expected_fields()
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join("、");
    format!(
        "Please analyze the provided {} image and return the result in strict JSON format.\n\
         The response MUST:\n\
         1. Start with a single opening curly brace and end with a single closing curly brace\n\
         2. Use double quotes for all keys\n\
         3. Contain exactly these keys: {fields}\n\
         4. Use null for missing values\n\
         5. Keep original units and precision in the values",
        category.label()
    )
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "image/jpeg",
    }
}

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Production [`VisionExtractor`] over the Gemini generateContent API.
pub struct VisionClient {
    settings: VisionSettings,
    client: Client,
}

impl VisionClient {
    pub fn new(settings: VisionSettings) -> Result<Self, VisionError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(VisionError::Transport)?;
        Ok(Self { settings, client })
    }

    fn request_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model,
            self.settings.api_key
        )
    }

    fn call_model(&self, payload: &Value) -> Result<String, VisionError> {
        let response = self
            .client
            .post(self.request_url())
            .json(payload)
            .send()
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    VisionError::Connection(e)
                } else {
                    VisionError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                message: if body.is_empty() {
                    "Invalid key or endpoint?".to_string()
                } else {
                    body
                },
            });
        }

        let body: Value = response
            .json()
            .map_err(|e| VisionError::MalformedResponse(e.to_string()))?;
        let parts = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or(VisionError::EmptyResponse)?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        if text.trim().is_empty() {
            return Err(VisionError::EmptyResponse);
        }
        Ok(text)
    }
}

fn is_rate_limited(error: &VisionError) -> bool {
    match error {
        VisionError::Api { status, message } => {
            *status == 429
                || message.contains("RESOURCE_EXHAUSTED")
                || message.to_lowercase().contains("quota exceeded")
        }
        _ => false,
    }
}

impl VisionExtractor for VisionClient {
    fn extract(
        &self,
        image_path: &Path,
        category: Category,
    ) -> Result<RawExtractionResult, VisionError> {
        let bytes = fs::read(image_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VisionError::FileNotFound
            } else {
                VisionError::Io(e)
            }
        })?;

        let payload = json!({
            "system_instruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "contents": [{
                "parts": [
                    { "text": recognition_prompt(category) },
                    { "inline_data": {
                        "mime_type": mime_type(image_path),
                        "data": BASE64.encode(&bytes),
                    }},
                ],
            }],
        });

        let mut last_error = None;
        for attempt in 1..=MAX_RETRIES {
            match self.call_model(&payload) {
                Ok(text) => {
                    debug!(category = category.label(), raw = %text, "model response");
                    let fields = recover_json_object(&text).ok_or_else(|| {
                        VisionError::MalformedResponse(
                            "no properly nested JSON object in response".to_string(),
                        )
                    })?;
                    if fields.is_empty() {
                        return Err(VisionError::MalformedResponse(
                            "expected a non-empty JSON object".to_string(),
                        ));
                    }
                    return Ok(RawExtractionResult::from_object(fields));
                }
                Err(e) if is_rate_limited(&e) && attempt < MAX_RETRIES => {
                    let wait = 5 * 2u64.pow(attempt);
                    warn!(
                        attempt,
                        wait_secs = wait,
                        "rate limit hit, backing off before retry"
                    );
                    thread::sleep(Duration::from_secs(wait));
                    last_error = Some(e);
                }
                Err(e) if is_rate_limited(&e) => {
                    return Err(VisionError::Exhausted {
                        attempts: MAX_RETRIES,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(VisionError::Exhausted {
            attempts: MAX_RETRIES,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

/// Pull a JSON object out of model text: strip markdown fences, then fall
/// back to the first balanced `{...}` region.
fn recover_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let cleaned = text.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(cleaned) {
        return Some(map);
    }

    let chars: Vec<char> = cleaned.chars().collect();
    let first = chars.iter().position(|&c| c == '{')?;
    let mut depth = 0usize;
    let mut last_close = None;
    for (i, &c) in chars.iter().enumerate().skip(first) {
        match c {
            '{' => depth += 1,
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        last_close = Some(i);
                    }
                }
            }
            _ => {}
        }
    }
    let last = last_close?;
    let candidate: String = chars[first..=last].iter().collect();
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
