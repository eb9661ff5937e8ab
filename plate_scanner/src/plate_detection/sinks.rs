//! Where accepted detections go: evidence snapshots on disk and a JSON event
//! per detection to the plate registry API. Failures are logged and counted,
//! never propagated.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{info, warn};
use reqwest::blocking::Client;
use serde::Serialize;

use super::frame_processor::DetectionEvent;
use super::remote_ocr::encode_jpeg;
use crate::error::{Result, ScannerError};
use crate::metrics::SINK_FAILURES;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A stored evidence image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvidence {
    pub path: PathBuf,
    pub jpeg: Vec<u8>,
}

/// Writes evidence images as `<PLATE>_<YYYYmmdd_HHMMSS>.jpg`.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn file_name(plate_text: &str, timestamp: DateTime<Utc>) -> String {
        format!("{}_{}.jpg", plate_text, timestamp.format("%Y%m%d_%H%M%S"))
    }

    fn write(&self, event: &DetectionEvent) -> Result<StoredEvidence> {
        let jpeg = encode_jpeg(event.evidence())?;
        let path = self
            .dir
            .join(Self::file_name(event.plate_text(), event.timestamp()));
        fs::write(&path, &jpeg)?;
        Ok(StoredEvidence { path, jpeg })
    }

    pub fn store(&self, event: &DetectionEvent) -> Option<StoredEvidence> {
        match self.write(event) {
            Ok(stored) => {
                info!("Saved evidence {:?}", stored.path);
                Some(stored)
            }
            Err(e) => {
                warn!("Cannot save evidence for {}: {}", event.plate_text(), e);
                SINK_FAILURES.with_label_values(&["evidence"]).inc();
                None
            }
        }
    }
}

/// JSON body accepted by the plate registry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatePayload<'a> {
    pub plate_number: &'a str,
    pub gate_id: &'a str,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl<'a> PlatePayload<'a> {
    pub fn new(
        event: &'a DetectionEvent,
        gate_id: &'a str,
        evidence: Option<&StoredEvidence>,
    ) -> Self {
        Self {
            plate_number: event.plate_text(),
            gate_id,
            confidence: event.confidence(),
            timestamp: event.timestamp(),
            image: evidence.map(|stored| STANDARD.encode(&stored.jpeg)),
        }
    }
}

pub struct EventDispatcher {
    client: Client,
    api_url: String,
    gate_id: String,
}

impl EventDispatcher {
    pub fn new(api_url: &str, gate_id: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(DISPATCH_TIMEOUT).build()?,
            api_url: api_url.to_string(),
            gate_id: gate_id.to_string(),
        })
    }

    fn post(&self, payload: &PlatePayload) -> Result<()> {
        let response = self.client.post(&self.api_url).json(payload).send()?;
        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            return Err(ScannerError::Status {
                service: "plate api",
                status,
            });
        }
        Ok(())
    }

    /// POSTs the event; returns whether the API accepted it.
    pub fn dispatch(&self, event: &DetectionEvent, evidence: Option<&StoredEvidence>) -> bool {
        let payload = PlatePayload::new(event, &self.gate_id, evidence);
        match self.post(&payload) {
            Ok(()) => {
                info!("Sent to API: {}", event.plate_text());
                true
            }
            Err(e) => {
                warn!("Cannot send {} to API: {}", event.plate_text(), e);
                SINK_FAILURES.with_label_values(&["event"]).inc();
                false
            }
        }
    }
}
