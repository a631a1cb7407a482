// src/sink/mod.rs
//! Publish targets for decoded fixes

pub mod influx;
pub mod mqtt;

use crate::{
    error::{GpsError, Result},
    gps::data::{FieldValue, Fix, FixField, FixKind},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use influx::InfluxSink;
pub use mqtt::MqttSink;

/// One fix, reduced to the mapped fields, ready to hand to every sink.
///
/// `values` follows the order of the [`FieldMapping`]; a field the fix does
/// not carry (e.g. speed on a GGA fix) is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub kind: FixKind,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<(FixField, Option<FieldValue>)>,
}

impl Reading {
    /// Mapped fields that have a value
    pub fn present(&self) -> impl Iterator<Item = (FixField, FieldValue)> + '_ {
        self.values
            .iter()
            .filter_map(|(field, value)| value.map(|v| (*field, v)))
    }
}

/// Ordered list of fix fields a deployment publishes
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    fields: Vec<FixField>,
}

impl FieldMapping {
    pub fn new(fields: Vec<FixField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(GpsError::Config("field mapping is empty".to_string()));
        }
        if let Some(duplicate) = fields
            .iter()
            .enumerate()
            .find_map(|(i, f)| fields[..i].contains(f).then_some(f))
        {
            return Err(GpsError::Config(format!(
                "field {} is mapped more than once",
                duplicate
            )));
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FixField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn reading(&self, fix: &Fix) -> Reading {
        Reading {
            kind: fix.kind,
            timestamp: fix.timestamp,
            values: self
                .fields
                .iter()
                .map(|field| (*field, fix.field(*field)))
                .collect(),
        }
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            fields: vec![
                FixField::Latitude,
                FixField::Longitude,
                FixField::Speed,
                FixField::Course,
            ],
        }
    }
}

/// A time-series store or message bus that receives readings
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs and dispatch reports
    fn name(&self) -> &str;

    /// Publish one reading. Called at most once per fix; never retried.
    async fn publish(&self, reading: &Reading) -> Result<()>;

    /// Release the connection. Publishing after close fails.
    async fn close(&self) -> Result<()>;
}
