//! HTTP recognition backends.
//!
//! Both services are black boxes: the region goes out as a JPEG and the
//! response is reduced to the first piece of text it contains. Any transport
//! error, non-success status or unexpected payload becomes an empty answer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use opencv::core::Vector;
use opencv::imgcodecs::imencode;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::Value;

use super::cascade::{RecognitionBackend, RecognitionSource};
use crate::config::RemoteOcrConfig;
use crate::error::{Result, ScannerError};
use crate::metrics::BACKEND_FAILURES;

pub fn encode_jpeg(image: &Mat) -> Result<Vec<u8>> {
    let mut buffer = Vector::<u8>::new();
    imencode(".jpg", image, &mut buffer, &Vector::new())?;
    Ok(buffer.to_vec())
}

fn build_client(config: &RemoteOcrConfig) -> Result<Client> {
    Ok(Client::builder().timeout(config.timeout()).build()?)
}

fn failed(source: RecognitionSource, error: ScannerError) -> String {
    warn!("{} recognition failed: {}", source.label(), error);
    BACKEND_FAILURES.with_label_values(&[source.label()]).inc();
    String::new()
}

/// Plate text from a plate-reader response: the first result's `plate`,
/// uppercased. `None` when there are no results.
pub fn parse_plate_reader_response(body: &Value) -> Option<String> {
    body["results"]
        .as_array()?
        .first()?
        .get("plate")?
        .as_str()
        .map(|plate| plate.to_uppercase())
}

/// Text of the first parsed page of a general OCR response.
pub fn parse_ocr_space_response(body: &Value) -> Option<String> {
    body["ParsedResults"]
        .as_array()?
        .first()?
        .get("ParsedText")?
        .as_str()
        .map(|text| text.to_string())
}

/// Commercial plate-reading service, authenticated with an API token.
pub struct PlateRecognizerClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl PlateRecognizerClient {
    pub fn new(config: &RemoteOcrConfig, token: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: config.endpoint.clone(),
            token: token.to_string(),
        })
    }

    fn read(&self, region: &Mat) -> Result<String> {
        let upload = Part::bytes(encode_jpeg(region)?)
            .file_name("plate.jpg")
            .mime_str("image/jpeg")?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .multipart(Form::new().part("upload", upload))
            .send()?;

        // The service answers a successful read with 201 Created.
        if response.status() != StatusCode::CREATED {
            return Err(ScannerError::Status {
                service: "plate recognizer",
                status: response.status().as_u16(),
            });
        }
        let body: Value = response.json()?;
        Ok(parse_plate_reader_response(&body).unwrap_or_default())
    }
}

impl RecognitionBackend for PlateRecognizerClient {
    fn source(&self) -> RecognitionSource {
        RecognitionSource::RemotePrimary
    }

    fn extract_text(&mut self, region: &Mat) -> String {
        if region.empty() {
            return String::new();
        }
        match self.read(region) {
            Ok(text) => {
                debug!("Plate recognizer read {:?}", text);
                text
            }
            Err(e) => failed(self.source(), e),
        }
    }
}

/// General-purpose OCR service fed with a base64 data URL.
pub struct OcrSpaceClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OcrSpaceClient {
    pub fn new(config: &RemoteOcrConfig, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: config.endpoint.clone(),
            api_key: api_key.to_string(),
        })
    }

    fn read(&self, region: &Mat) -> Result<String> {
        let image = format!(
            "data:image/jpeg;base64,{}",
            STANDARD.encode(encode_jpeg(region)?)
        );
        let form = [
            ("apikey", self.api_key.as_str()),
            ("base64Image", image.as_str()),
            ("isOverlayRequired", "false"),
            ("OCREngine", "2"),
            ("scale", "true"),
            ("isTable", "false"),
        ];
        let response = self.client.post(&self.endpoint).form(&form).send()?;

        if response.status() != StatusCode::OK {
            return Err(ScannerError::Status {
                service: "ocr.space",
                status: response.status().as_u16(),
            });
        }
        let body: Value = response.json()?;
        Ok(parse_ocr_space_response(&body).unwrap_or_default())
    }
}

impl RecognitionBackend for OcrSpaceClient {
    fn source(&self) -> RecognitionSource {
        RecognitionSource::RemoteFallback
    }

    fn extract_text(&mut self, region: &Mat) -> String {
        if region.empty() {
            return String::new();
        }
        match self.read(region) {
            Ok(text) => {
                debug!("OCR.space read {:?}", text.trim());
                text
            }
            Err(e) => failed(self.source(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};
    use serde_json::json;

    #[test]
    fn plate_reader_takes_first_result_uppercased() {
        let body = json!({
            "processing_time": 88.2,
            "results": [
                {"plate": "nbc1234", "score": 0.91, "box": {"xmin": 1}},
                {"plate": "zzz999", "score": 0.40}
            ]
        });
        assert_eq!(parse_plate_reader_response(&body), Some("NBC1234".to_string()));
    }

    #[test]
    fn plate_reader_without_results() {
        assert_eq!(parse_plate_reader_response(&json!({"results": []})), None);
        assert_eq!(parse_plate_reader_response(&json!({"detail": "bad token"})), None);
        assert_eq!(
            parse_plate_reader_response(&json!({"results": [{"score": 0.5}]})),
            None
        );
    }

    #[test]
    fn ocr_space_takes_first_parsed_text() {
        let body = json!({
            "ParsedResults": [
                {"ParsedText": "AB 123\r\n", "FileParseExitCode": 1}
            ],
            "OCRExitCode": 1,
            "IsErroredOnProcessing": false
        });
        assert_eq!(parse_ocr_space_response(&body), Some("AB 123\r\n".to_string()));
    }

    #[test]
    fn ocr_space_error_payload() {
        let body = json!({
            "OCRExitCode": 99,
            "IsErroredOnProcessing": true,
            "ErrorMessage": ["Invalid API key"]
        });
        assert_eq!(parse_ocr_space_response(&body), None);
        assert_eq!(parse_ocr_space_response(&json!({"ParsedResults": []})), None);
    }

    #[test]
    fn jpeg_encoding_produces_jfif_bytes() {
        let image = Mat::new_rows_cols_with_default(20, 80, CV_8UC3, Scalar::all(90.0)).unwrap();
        let bytes = encode_jpeg(&image).unwrap();
        assert!(bytes.len() > 4);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn unreachable_fallback_reads_nothing() {
        let config = RemoteOcrConfig {
            enabled: true,
            credential: Some("key".to_string()),
            endpoint: "http://127.0.0.1:9/parse/image".to_string(),
            timeout_secs: 1,
        };
        let mut client = OcrSpaceClient::new(&config, "key").unwrap();
        let region = Mat::new_rows_cols_with_default(20, 80, CV_8UC3, Scalar::all(90.0)).unwrap();

        assert_eq!(client.extract_text(&region), "");
    }
}
