// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Label service client.
//
// Every operation is a JSON message envelope POSTed to `{base}request`; the
// topic selects the operation. The base address is passed per call so the
// caller can route each request to the backend that is currently best.
// Readiness is reported inside the response body:
//   200 rendered, `data` holds the image location
//   102 still generating
//   404 unknown label

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use waybill_core::config::SdkConfig;
use waybill_core::error::{Result, WaybillError};
use waybill_core::types::{LabelRecord, Package, PrintLog, SplitRequest, WIRE_TIME_FORMAT};

use crate::router::HealthProbe;

const SOURCE: &str = "label_print";
const TARGET: &str = "api";
const TOPIC_FIND_BY_BATCH: &str = "logistics_label_address/find_by_sale_order";
const TOPIC_IMAGE_STATUS: &str = "logistics_label_address/get_label_image_by_uuid";
const TOPIC_FIND_BY_CODE: &str = "logistics_label_address/find_by_uuid";
const TOPIC_SPLIT: &str = "relabel";
const TOPIC_PRINT_LOG: &str = "print_log/save";

const STATUS_READY: i32 = 200;
const STATUS_NOT_READY: i32 = 102;
const STATUS_NOT_FOUND: i32 = 404;

/// Expected body of the liveness endpoint.
pub const LIVENESS_PAYLOAD: &str = "ok";

/// Readiness of a label's rendered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelStatus {
    Ready { location: String, page_count: u32 },
    NotReady,
    NotFound,
}

/// Remote label service operations.
///
/// Lookups are read-only. `split_package` makes the service generate new
/// labels and must not be retried blindly.
#[async_trait]
pub trait LabelService: Send + Sync {
    /// Every label of a batch, in batch order.
    async fn lookup_by_batch(&self, base: &Url, batch_id: &str) -> Result<Vec<LabelRecord>>;

    /// Label info for one unique code.
    async fn find_label(&self, base: &Url, identifier: &str) -> Result<LabelRecord>;

    async fn get_status(&self, base: &Url, identifier: &str) -> Result<LabelStatus>;

    async fn split_package(&self, base: &Url, request: &SplitRequest) -> Result<Vec<LabelRecord>>;

    /// Fetch the rendered image; `location` may be relative to `base`.
    async fn download(&self, base: &Url, location: &str) -> Result<Vec<u8>>;

    async fn log_print_result(&self, base: &Url, log: &PrintLog) -> Result<()>;
}

// -- Wire format ---------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    #[serde(rename = "async")]
    is_async: u8,
    topic: &'a str,
    source: &'a str,
    target: &'a str,
    timestamp: String,
    sign: &'a str,
    payload: String,
}

impl<'a> Envelope<'a> {
    fn new(topic: &'a str, payload: String) -> Self {
        Self {
            is_async: 0,
            topic,
            source: SOURCE,
            target: TARGET,
            timestamp: chrono::Utc::now().format(WIRE_TIME_FORMAT).to_string(),
            sign: "",
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireLabel {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    total_count: Option<u32>,
    #[serde(default)]
    sale_order: Option<String>,
    uuid_code: String,
}

impl From<WireLabel> for LabelRecord {
    fn from(wire: WireLabel) -> Self {
        Self {
            identifier: wire.uuid_code,
            sequence_index: wire.index.unwrap_or(0),
            total_in_batch: wire.total_count.unwrap_or(1).max(1),
            batch_id: wire.sale_order,
            // Readiness is only ever confirmed by the poller after download.
            ready: false,
            page_count: 1,
            source_location: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LabelListResponse {
    #[serde(default)]
    data: Vec<WireLabel>,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    #[serde(default)]
    data: Option<WireLabel>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    code: i32,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    page_count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WirePackage {
    seq_no: u32,
    weight: f64,
    volume_long: f64,
    volume_width: f64,
    volume_height: f64,
    volume: f64,
}

impl From<&Package> for WirePackage {
    fn from(p: &Package) -> Self {
        Self {
            seq_no: p.seq_no,
            weight: p.weight_kg,
            volume_long: p.length_cm,
            volume_width: p.width_cm,
            volume_height: p.height_cm,
            volume: p.volume_cm3,
        }
    }
}

#[derive(Debug, Serialize)]
struct SplitPayload<'a> {
    sale_order: &'a str,
    carrier_code: &'a str,
    package_count: u32,
    package_list: Vec<WirePackage>,
}

#[derive(Debug, Serialize)]
struct PrintLogPayload<'a> {
    uuid_code: &'a str,
    log_time: String,
    time_out: u64,
    target: &'a str,
    count_limit: u32,
    code: i32,
    success: bool,
}

/// Decode a batch lookup; an empty list means the batch does not exist.
pub(crate) fn decode_label_list(body: &str, batch_id: &str) -> Result<Vec<LabelRecord>> {
    let response: LabelListResponse = serde_json::from_str(body)
        .map_err(|e| WaybillError::MalformedResponse(format!("label list: {e}")))?;
    if response.data.is_empty() {
        return Err(WaybillError::BatchNotFound(batch_id.to_string()));
    }
    Ok(response.data.into_iter().map(LabelRecord::from).collect())
}

pub(crate) fn decode_label(body: &str, identifier: &str) -> Result<LabelRecord> {
    let response: LabelResponse = serde_json::from_str(body)
        .map_err(|e| WaybillError::MalformedResponse(format!("label info: {e}")))?;
    response
        .data
        .map(LabelRecord::from)
        .ok_or_else(|| WaybillError::LabelNotExist(identifier.to_string()))
}

pub(crate) fn decode_status(body: &str) -> Result<LabelStatus> {
    let response: ImageResponse = serde_json::from_str(body)
        .map_err(|e| WaybillError::MalformedResponse(format!("image status: {e}")))?;
    match response.code {
        STATUS_READY => match response.data.filter(|d| !d.trim().is_empty()) {
            Some(location) => Ok(LabelStatus::Ready {
                location,
                page_count: response.page_count.unwrap_or(1).max(1),
            }),
            None => Err(WaybillError::MalformedResponse(
                "ready status without image location".into(),
            )),
        },
        STATUS_NOT_READY => Ok(LabelStatus::NotReady),
        STATUS_NOT_FOUND => Ok(LabelStatus::NotFound),
        other => Err(WaybillError::MalformedResponse(format!(
            "unknown image status code {other}"
        ))),
    }
}

/// Map a non-success HTTP status to an error.
///
/// Server-side and throttling statuses count as transport failures so the
/// poller retries them.
fn http_failure(status: StatusCode, what: &str) -> WaybillError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        WaybillError::Network(format!("{what} returned HTTP {status}"))
    } else {
        WaybillError::MalformedResponse(format!("{what} returned HTTP {status}"))
    }
}

fn transport(err: reqwest::Error, what: &str) -> WaybillError {
    WaybillError::Network(format!("{what}: {err}"))
}

fn build_client(connect: Duration, read: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect)
        .timeout(read)
        .build()
        .map_err(|e| WaybillError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

fn endpoint(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| WaybillError::InvalidConfig(format!("invalid endpoint {base}{path}: {e}")))
}

// -- HTTP implementation ---------------------------------------------------------

/// `LabelService` over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpLabelService {
    /// Lookups, split, and print log.
    lookup: Client,
    /// Image status requests (the service may render before answering).
    status: Client,
    download: Client,
}

impl HttpLabelService {
    pub fn from_config(config: &SdkConfig) -> Result<Self> {
        let connect = config.connect_timeout();
        Ok(Self {
            lookup: build_client(connect, config.read_timeout())?,
            status: build_client(connect, config.status_timeout())?,
            download: build_client(connect, config.download_timeout())?,
        })
    }

    async fn post(&self, client: &Client, base: &Url, topic: &str, payload: String) -> Result<(StatusCode, String)> {
        let url = endpoint(base, "request")?;
        let envelope = Envelope::new(topic, payload);
        debug!(%url, topic, "posting label service request");

        let response = client
            .post(url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| transport(e, topic))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| transport(e, topic))?;
        Ok((status, body))
    }
}

#[async_trait]
impl LabelService for HttpLabelService {
    #[instrument(skip(self, base), fields(base = %base))]
    async fn lookup_by_batch(&self, base: &Url, batch_id: &str) -> Result<Vec<LabelRecord>> {
        let (status, body) = self
            .post(&self.lookup, base, TOPIC_FIND_BY_BATCH, batch_id.to_string())
            .await?;
        if !status.is_success() {
            return Err(http_failure(status, TOPIC_FIND_BY_BATCH));
        }
        decode_label_list(&body, batch_id)
    }

    #[instrument(skip(self, base), fields(base = %base))]
    async fn find_label(&self, base: &Url, identifier: &str) -> Result<LabelRecord> {
        let (status, body) = self
            .post(&self.lookup, base, TOPIC_FIND_BY_CODE, identifier.to_string())
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(WaybillError::LabelNotExist(identifier.to_string()));
        }
        if !status.is_success() {
            return Err(http_failure(status, TOPIC_FIND_BY_CODE));
        }
        decode_label(&body, identifier)
    }

    #[instrument(skip(self, base), fields(base = %base))]
    async fn get_status(&self, base: &Url, identifier: &str) -> Result<LabelStatus> {
        let (status, body) = self
            .post(&self.status, base, TOPIC_IMAGE_STATUS, identifier.to_string())
            .await?;
        if !status.is_success() {
            return Err(http_failure(status, TOPIC_IMAGE_STATUS));
        }
        decode_status(&body)
    }

    #[instrument(skip(self, base, request), fields(base = %base, batch = %request.batch_id))]
    async fn split_package(&self, base: &Url, request: &SplitRequest) -> Result<Vec<LabelRecord>> {
        let payload = serde_json::to_string(&SplitPayload {
            sale_order: &request.batch_id,
            carrier_code: &request.carrier_code,
            package_count: request.package_count,
            package_list: request.packages.iter().map(WirePackage::from).collect(),
        })?;
        let (status, body) = self.post(&self.lookup, base, TOPIC_SPLIT, payload).await?;
        if !status.is_success() {
            return Err(http_failure(status, TOPIC_SPLIT));
        }
        decode_label_list(&body, &request.batch_id)
    }

    #[instrument(skip(self, base), fields(base = %base))]
    async fn download(&self, base: &Url, location: &str) -> Result<Vec<u8>> {
        let url = base.join(location).map_err(|e| {
            WaybillError::MalformedResponse(format!("invalid image location {location}: {e}"))
        })?;
        let response = self
            .download
            .get(url)
            .send()
            .await
            .map_err(|e| transport(e, "image download"))?;
        let status = response.status();
        if !status.is_success() {
            // The status endpoint said the image exists; treat a miss as transient.
            return Err(WaybillError::Network(format!(
                "image download returned HTTP {status}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport(e, "image download"))?;
        debug!(len = bytes.len(), "image downloaded");
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self, base, log), fields(base = %base, label = %log.label_identifier))]
    async fn log_print_result(&self, base: &Url, log: &PrintLog) -> Result<()> {
        let payload = serde_json::to_string(&PrintLogPayload {
            uuid_code: &log.label_identifier,
            log_time: log.wire_time(),
            time_out: log.duration_ms,
            target: "print",
            count_limit: 0,
            code: log.code,
            success: log.success,
        })?;
        let (status, _) = self.post(&self.lookup, base, TOPIC_PRINT_LOG, payload).await?;
        if !status.is_success() {
            warn!(%status, "print log rejected");
            return Err(http_failure(status, TOPIC_PRINT_LOG));
        }
        Ok(())
    }
}

/// Liveness probe against `GET {base}health`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn from_config(config: &SdkConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.connect_timeout().min(config.probe_timeout()), config.probe_timeout())?,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, base: &Url) -> Result<()> {
        let url = endpoint(base, "health")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(e, "liveness probe"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(WaybillError::Network(format!("liveness probe returned HTTP {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| transport(e, "liveness probe"))?;
        if body.trim() != LIVENESS_PAYLOAD {
            return Err(WaybillError::Network(format!(
                "unexpected liveness payload {:?}",
                body.chars().take(32).collect::<String>()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn batch_list_maps_to_records() {
        let body = r#"{"data":[
            {"index":0,"total_count":2,"sale_order":"B1","uuid_code":"u1","is_ready":true},
            {"index":1,"total_count":2,"sale_order":"B1","uuid_code":"u2","is_ready":false}
        ]}"#;
        let records = decode_label_list(body, "B1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].identifier, "u2");
        assert_eq!(records[1].sequence_index, 1);
        assert_eq!(records[0].batch_id.as_deref(), Some("B1"));
        // the poller, not the lookup, confirms readiness
        assert!(records.iter().all(|r| !r.ready));
    }

    #[test]
    fn empty_batch_is_not_found() {
        let err = decode_label_list(r#"{"data":[]}"#, "B404").unwrap_err();
        assert!(matches!(err, WaybillError::BatchNotFound(ref b) if b == "B404"));
    }

    #[test]
    fn status_codes_are_classified() {
        assert_eq!(
            decode_status(r#"{"code":200,"data":"http://img/u1.png","page_count":2}"#).unwrap(),
            LabelStatus::Ready {
                location: "http://img/u1.png".into(),
                page_count: 2
            }
        );
        assert_eq!(decode_status(r#"{"code":102}"#).unwrap(), LabelStatus::NotReady);
        assert_eq!(decode_status(r#"{"code":404}"#).unwrap(), LabelStatus::NotFound);
    }

    #[test]
    fn ready_without_location_is_malformed() {
        let err = decode_status(r#"{"code":200,"data":""}"#).unwrap_err();
        assert!(matches!(err, WaybillError::MalformedResponse(_)));
        assert!(decode_status("<html>").is_err());
        assert!(decode_status(r#"{"code":500}"#).is_err());
    }

    #[test]
    fn missing_label_info_is_not_exist() {
        let err = decode_label(r#"{"data":null}"#, "u7").unwrap_err();
        assert!(matches!(err, WaybillError::LabelNotExist(_)));
    }

    #[test]
    fn server_errors_are_transport_failures() {
        assert!(matches!(
            http_failure(StatusCode::BAD_GATEWAY, "x"),
            WaybillError::Network(_)
        ));
        assert!(matches!(
            http_failure(StatusCode::BAD_REQUEST, "x"),
            WaybillError::MalformedResponse(_)
        ));
    }

    #[test]
    fn envelope_serialises_async_flag() {
        let json = serde_json::to_value(Envelope::new(TOPIC_SPLIT, "{}".into())).unwrap();
        assert_eq!(json["async"], 0);
        assert_eq!(json["topic"], "relabel");
        assert_eq!(json["source"], "label_print");
    }

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        Url::parse(&format!("http://{addr}/label-print/")).unwrap()
    }

    #[tokio::test]
    async fn liveness_probe_accepts_ok() {
        let base = serve_once("ok\n").await;
        let probe = HttpHealthProbe::from_config(&SdkConfig::with_cloud("http://cloud/")).unwrap();
        probe.probe(&base).await.unwrap();
    }

    #[tokio::test]
    async fn liveness_probe_rejects_other_payloads() {
        let base = serve_once("{\"status\":\"UP\"}").await;
        let probe = HttpHealthProbe::from_config(&SdkConfig::with_cloud("http://cloud/")).unwrap();
        assert!(probe.probe(&base).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        let service = HttpLabelService::from_config(&SdkConfig::with_cloud("http://cloud/")).unwrap();
        let err = service.get_status(&base, "u1").await.unwrap_err();
        assert!(matches!(err, WaybillError::Network(_)));
    }
}
