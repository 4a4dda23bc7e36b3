//! Inbound sensor samples and the ingress payload shape.

use serde::{Deserialize, Deserializer, Serialize};

/// Device id used when a payload arrives without one.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Sensor readings carried by one sample. Missing fields are zero, unknown
/// fields are dropped during deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorFields {
    /// Vibration level.
    pub vib: f64,
    /// Gas sensor reading.
    pub gas: f64,
    /// Passive-infrared motion flag (0 or 1).
    #[serde(deserialize_with = "flag")]
    pub pir: f64,
    /// Temperature in degrees Celsius.
    pub temp: f64,
    /// People counted in view.
    pub people: f64,
}

/// One reading from one device. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub device: String,
    /// Epoch seconds.
    pub ts: i64,
    pub fields: SensorFields,
}

impl Sample {
    pub fn new(device: impl Into<String>, ts: i64, fields: SensorFields) -> Self {
        Self {
            device: device.into(),
            ts,
            fields,
        }
    }
}

/// JSON body accepted by `POST /ingest`.
///
/// ```json
/// {"device": "cell-7", "ts": 1717000000, "vib": 104.2, "gas": 351, "pir": true}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct IngestPayload {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(flatten)]
    pub fields: SensorFields,
}

impl IngestPayload {
    /// Resolve defaults: the sentinel device id and the receipt time.
    pub fn into_sample(self, received_at: i64) -> Sample {
        Sample {
            device: self
                .device
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
            ts: self.ts.unwrap_or(received_at),
            fields: self.fields,
        }
    }
}

/// Accept `true`/`false` as well as any number for flag fields.
fn flag<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => f64::from(u8::from(b)),
        Flag::Number(n) => n,
    })
}
