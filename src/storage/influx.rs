//! InfluxDB v2 sink using the HTTP write API and line protocol.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use super::{FieldValue, Point, SinkError, TimeSeriesSink};
use crate::config::InfluxConfig;

pub struct InfluxSink {
    client: Client,
    write_url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxSink {
    fn name(&self) -> &'static str {
        "influx"
    }

    async fn write_record(&self, point: &Point) -> Result<(), SinkError> {
        let body = to_line_protocol(point)?;

        let resp = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "s"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Render one point as a line-protocol row with a second-precision timestamp.
pub fn to_line_protocol(point: &Point) -> Result<String, SinkError> {
    if point.measurement.is_empty() {
        return Err(SinkError::Encode("empty measurement".to_string()));
    }
    if point.fields.is_empty() {
        return Err(SinkError::Encode(format!(
            "{} has no fields",
            point.measurement
        )));
    }

    single_line("measurement", &point.measurement)?;
    let mut line = escape(&point.measurement, &[',', ' ', '\\']);
    for (k, v) in &point.tags {
        // Empty tag values are not representable
        if v.is_empty() {
            continue;
        }
        single_line("tag key", k)?;
        single_line("tag value", v)?;
        let _ = write!(
            line,
            ",{}={}",
            escape(k, TAG_SPECIAL),
            escape(v, TAG_SPECIAL)
        );
    }

    let mut sep = ' ';
    for (k, v) in &point.fields {
        let value = match v {
            FieldValue::Float(f) if !f.is_finite() => {
                return Err(SinkError::Encode(format!("field {k} is not finite")));
            }
            FieldValue::Float(f) => format!("{f}"),
            FieldValue::Int(i) => format!("{i}i"),
            FieldValue::Str(s) => {
                single_line("field value", s)?;
                format!("\"{}\"", escape(s, &['"', '\\']))
            }
        };
        single_line("field key", k)?;
        let _ = write!(line, "{sep}{}={value}", escape(k, TAG_SPECIAL));
        sep = ',';
    }

    let _ = write!(line, " {}", point.timestamp);
    Ok(line)
}

const TAG_SPECIAL: &[char] = &[',', '=', ' ', '\\'];

/// Line protocol has no escape for line breaks.
fn single_line(what: &str, s: &str) -> Result<(), SinkError> {
    if s.contains(['\n', '\r']) {
        return Err(SinkError::Encode(format!("{what} {s:?} contains a line break")));
    }
    Ok(())
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
