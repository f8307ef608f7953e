//! In-memory stand-in for the data collector service.
//!
//! Each flushed batch becomes the JSON body the rig would `POST` to
//! `/data/<test_id>`; the request is kept so the session can print it.

use std::fmt;

use rig_core::buffer::SensorSnapshot;
use rig_core::ports::Uploader;
use serde::{Deserialize, Serialize};

use crate::sim::SimInstant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBody {
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: u64,
    pub ina260: PowerReading,
    pub load_cell: LoadCellReading,
    pub set_speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub voltage_v: f32,
    pub current_ma: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadCellReading {
    pub raw_value: f32,
    pub is_ready: bool,
}

impl From<&SensorSnapshot<SimInstant>> for DataPoint {
    fn from(snapshot: &SensorSnapshot<SimInstant>) -> Self {
        Self {
            timestamp: snapshot.timestamp.as_millis(),
            ina260: PowerReading {
                voltage_v: snapshot.bus_voltage_v,
                current_ma: snapshot.bus_current_ma,
            },
            load_cell: LoadCellReading {
                raw_value: snapshot.load_cell,
                is_ready: snapshot.load_cell_valid,
            },
            set_speed: snapshot.commanded,
        }
    }
}

/// One request the rig sent to the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorRequest {
    pub path: String,
    pub samples: usize,
    pub body: String,
    pub delivered: bool,
}

impl fmt::Display for CollectorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.delivered { "200" } else { "failed" };
        write!(
            f,
            "POST {} samples={} bytes={} -> {status}",
            self.path,
            self.samples,
            self.body.len()
        )
    }
}

#[derive(Debug)]
pub enum CollectorError {
    /// Failure injected by the session.
    Unreachable,
    Encode(serde_json::Error),
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::Unreachable => f.write_str("collector unreachable"),
            CollectorError::Encode(err) => write!(f, "encode failed: {err}"),
        }
    }
}

impl std::error::Error for CollectorError {}

#[derive(Debug, Default)]
pub struct CollectorUploader {
    requests: Vec<CollectorRequest>,
    fail_uploads: bool,
}

impl CollectorUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_uploads(&mut self, fail: bool) {
        self.fail_uploads = fail;
    }

    pub fn fail_uploads(&self) -> bool {
        self.fail_uploads
    }

    pub fn requests(&self) -> &[CollectorRequest] {
        &self.requests
    }

    pub fn last_body(&self) -> Option<DataBody> {
        self.requests
            .last()
            .and_then(|request| serde_json::from_str(&request.body).ok())
    }
}

impl Uploader<SimInstant> for CollectorUploader {
    type Error = CollectorError;

    fn upload(
        &mut self,
        test_id: &str,
        batch: &[SensorSnapshot<SimInstant>],
    ) -> Result<(), Self::Error> {
        let body = DataBody {
            data: batch.iter().map(DataPoint::from).collect(),
        };
        let body = serde_json::to_string(&body).map_err(CollectorError::Encode)?;

        let delivered = !self.fail_uploads;
        self.requests.push(CollectorRequest {
            path: format!("/data/{test_id}"),
            samples: batch.len(),
            body,
            delivered,
        });

        if delivered {
            Ok(())
        } else {
            Err(CollectorError::Unreachable)
        }
    }
}
