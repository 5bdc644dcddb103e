//! Reading and batch types for the NanoClaw gateway
//!
//! Defines the sensor reading accepted from edge nodes and the immutable
//! batch record forwarded to the coordinator.

use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reading as submitted by an edge node, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingInput {
    /// Unique identifier for the reporting node
    pub node_id: String,

    /// Type of sensor (temperature, humidity, ...)
    pub sensor_type: String,

    /// Sensor reading value
    pub value: f64,

    /// Unit of measurement (C, %, ...)
    pub unit: String,

    /// Reading timestamp; arrival time is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ReadingInput {
    pub fn new(
        node_id: impl Into<String>,
        sensor_type: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            sensor_type: sensor_type.into(),
            value,
            unit: unit.into(),
            timestamp: None,
        }
    }

    /// Builder: set an explicit timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validate and freeze into a [`Reading`]
    ///
    /// `arrived_at` fills in the timestamp when the node did not send one.
    pub fn validate(self, arrived_at: DateTime<Utc>) -> Result<Reading> {
        if self.node_id.trim().is_empty() {
            return Err(GatewayError::validation("node_id must not be empty"));
        }
        if self.sensor_type.trim().is_empty() {
            return Err(GatewayError::validation("sensor_type must not be empty"));
        }
        if !self.value.is_finite() {
            return Err(GatewayError::validation(format!(
                "value must be a finite number, got {}",
                self.value
            )));
        }

        Ok(Reading {
            node_id: self.node_id,
            sensor_type: self.sensor_type,
            value: self.value,
            unit: self.unit,
            timestamp: self.timestamp.unwrap_or(arrived_at),
        })
    }
}

/// Validated sensor reading. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    node_id: String,
    sensor_type: String,
    value: f64,
    unit: String,
    timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn sensor_type(&self) -> &str {
        &self.sensor_type
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Batch of readings uploaded to the coordinator as one request
///
/// Readings keep insertion order. A batch is never empty and is never
/// modified after [`Batch::form`] returns it; the offline queue shares it
/// through an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    /// Time-ordered id so the coordinator can drop redelivered batches
    batch_id: Uuid,
    gateway_id: String,
    readings: Vec<Reading>,
    batch_timestamp: DateTime<Utc>,
}

impl Batch {
    /// Form a batch stamped with the current time
    pub fn form(gateway_id: impl Into<String>, readings: Vec<Reading>) -> Result<Self> {
        Self::form_at(gateway_id, readings, Utc::now())
    }

    /// Form a batch with an explicit creation time
    pub fn form_at(
        gateway_id: impl Into<String>,
        readings: Vec<Reading>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if readings.is_empty() {
            return Err(GatewayError::EmptyBatch);
        }

        Ok(Self {
            batch_id: Uuid::now_v7(),
            gateway_id: gateway_id.into(),
            readings,
            batch_timestamp: created_at,
        })
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Always false for a formed batch
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.batch_timestamp
    }

    /// Serialize to the JSON body sent to the coordinator
    pub fn to_json(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
