//! AWS SQS gateway using the SQS Query HTTP API.
//!
//! Requests go straight to the SQS endpoint over `reqwest` and are signed
//! with AWS Signature Version 4, so the gateway has no dependency on the AWS
//! SDK and can be pointed at LocalStack through
//! [`SqsConnection::endpoint`](crate::options::SqsConnection).
//!
//! ## Wire conventions
//!
//! - Every call is a `POST /` with `Action`, `Version` and the action
//!   parameters in the query string
//! - Message bodies are base64 encoded
//! - Durations are sent as whole seconds; a non-zero duration below one
//!   second is rounded up to one second
//! - Responses are XML and parsed with `quick-xml`

use crate::error::{ConfigurationError, QueueError, SerializationError, ValidationError};
use crate::gateway::QueueGateway;
use crate::message::{
    LeaseHandle, MessageId, QueueHandle, QueueName, ReceiveRequest, ReceivedMessage,
};
use crate::options::SqsConnection;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";
const PROVIDER: &str = "AwsSqs";

/// Longer than the maximum long-poll wait so receives are never cut short
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_WAIT_SECONDS: u64 = 20;
const MAX_VISIBILITY_SECONDS: u64 = 43_200;
const MAX_MESSAGES_PER_RECEIVE: u32 = 10;
const MAX_BODY_BYTES: usize = 256 * 1024;

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("SQS service error: {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue already exists: {0}")]
    QueueAlreadyExists(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Message body is not valid base64: {0}")]
    InvalidBody(String),
}

impl AwsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::Timeout(_) | Self::ServiceError { .. }
        )
    }

    /// Map AWS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: PROVIDER.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::QueueAlreadyExists(queue_name) => QueueError::QueueAlreadyExists { queue_name },
            Self::InvalidReceipt(lease) => QueueError::MessageNotFound { lease },
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::MalformedResponse(message) => QueueError::ProviderError {
                provider: PROVIDER.to_string(),
                code: "MalformedResponse".to_string(),
                message,
            },
            Self::InvalidBody(message) => {
                QueueError::SerializationError(SerializationError::InvalidEncoding(message))
            }
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// Implements the AWS Signature V4 signing process:
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a request and return the headers to attach to it
    ///
    /// `canonical_query` must already be in canonical form, see [`canonical_query`].
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        canonical_query: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, AwsError> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";
        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{:x}",
            algorithm,
            amz_date,
            credential_scope,
            Sha256::digest(canonical_request.as_bytes())
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp)?;

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        Ok(vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-date".to_string(), amz_date),
            ("host".to_string(), host.to_string()),
        ])
    }

    /// HMAC chain: secret -> date -> region -> service -> "aws4_request" -> string to sign
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> Result<String, AwsError> {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes())?;

        Ok(hex::encode(signature))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, AwsError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AwsError::Authentication(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode and sort parameters by key, then value
fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();

    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Whole seconds for the wire; sub-second non-zero durations round up to 1
fn wire_seconds(duration: Duration, max: u64) -> u64 {
    let seconds = duration.as_secs();
    let seconds = if seconds == 0 && !duration.is_zero() {
        1
    } else {
        seconds
    };
    seconds.min(max)
}

// ============================================================================
// XML Responses
// ============================================================================

/// Element-level view of a response document; the slice is the path from
/// the root down to and including the current element
enum XmlEvent<'a> {
    Start(&'a [String]),
    Text(&'a [String], String),
    End(&'a [String]),
}

fn walk_xml<F>(xml: &str, mut visit: F) -> Result<(), AwsError>
where
    F: FnMut(XmlEvent<'_>) -> Result<(), AwsError>,
{
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                visit(XmlEvent::Start(&path))?;
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| AwsError::MalformedResponse(format!("Failed to parse XML: {}", e)))?
                    .into_owned();
                visit(XmlEvent::Text(&path, text))?;
            }
            Ok(Event::End(_)) => {
                visit(XmlEvent::End(&path))?;
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AwsError::MalformedResponse(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn ends_with(path: &[String], tail: &[&str]) -> bool {
    path.len() >= tail.len()
        && path[path.len() - tail.len()..]
            .iter()
            .zip(tail)
            .all(|(a, b)| a == b)
}

/// Text of the first element named `element`
fn parse_text(xml: &str, element: &str) -> Result<String, AwsError> {
    let mut found = None;
    walk_xml(xml, |event| {
        if let XmlEvent::Text(path, text) = event {
            if found.is_none() && ends_with(path, &[element]) {
                found = Some(text);
            }
        }
        Ok(())
    })?;

    found.ok_or_else(|| AwsError::MalformedResponse(format!("{} not found in response", element)))
}

/// Name/value pairs of a GetQueueAttributes response
fn parse_queue_attributes(xml: &str) -> Result<HashMap<String, String>, AwsError> {
    let mut result = HashMap::new();
    let mut name: Option<String> = None;
    let mut value: Option<String> = None;

    walk_xml(xml, |event| {
        match event {
            XmlEvent::Start(path) if ends_with(path, &["Attribute"]) => {
                name = None;
                value = None;
            }
            XmlEvent::Text(path, text) if ends_with(path, &["Attribute", "Name"]) => {
                name = Some(text);
            }
            XmlEvent::Text(path, text) if ends_with(path, &["Attribute", "Value"]) => {
                value = Some(text);
            }
            XmlEvent::End(path) if ends_with(path, &["Attribute"]) => {
                if let Some(name) = name.take() {
                    result.insert(name, value.take().unwrap_or_default());
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(result)
}

#[derive(Default)]
struct PartialMessage {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    attributes: HashMap<String, String>,
    attribute_name: Option<String>,
    attribute_value: Option<String>,
}

impl PartialMessage {
    fn build(self) -> Result<Option<ReceivedMessage>, AwsError> {
        let (Some(receipt_handle), Some(message_id)) = (self.receipt_handle, self.message_id)
        else {
            return Ok(None);
        };

        let body = STANDARD
            .decode(self.body.unwrap_or_default())
            .map_err(|e| AwsError::InvalidBody(e.to_string()))?;

        let message_id = MessageId::from_str(&message_id)
            .map_err(|e| AwsError::MalformedResponse(e.to_string()))?;

        Ok(Some(ReceivedMessage {
            message_id,
            body: Bytes::from(body),
            lease_handle: LeaseHandle::new(receipt_handle),
            attributes: self.attributes,
        }))
    }
}

/// Messages of a ReceiveMessage response
fn parse_received_messages(xml: &str) -> Result<Vec<ReceivedMessage>, AwsError> {
    let mut messages = Vec::new();
    let mut current = PartialMessage::default();

    walk_xml(xml, |event| {
        match event {
            XmlEvent::Start(path) if ends_with(path, &["Message"]) => {
                current = PartialMessage::default();
            }
            XmlEvent::Text(path, text) => {
                if ends_with(path, &["Message", "MessageId"]) {
                    current.message_id = Some(text);
                } else if ends_with(path, &["Message", "ReceiptHandle"]) {
                    current.receipt_handle = Some(text);
                } else if ends_with(path, &["Message", "Body"]) {
                    current.body = Some(text);
                } else if ends_with(path, &["Message", "Attribute", "Name"]) {
                    current.attribute_name = Some(text);
                } else if ends_with(path, &["Message", "Attribute", "Value"]) {
                    current.attribute_value = Some(text);
                }
            }
            XmlEvent::End(path) if ends_with(path, &["Message", "Attribute"]) => {
                if let Some(name) = current.attribute_name.take() {
                    let value = current.attribute_value.take().unwrap_or_default();
                    current.attributes.insert(name, value);
                }
            }
            XmlEvent::End(path) if ends_with(path, &["Message"]) => {
                if let Some(message) = std::mem::take(&mut current).build()? {
                    messages.push(message);
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(messages)
}

/// Map an error response to an [`AwsError`] by its code, then its HTTP status
fn parse_error_response(xml: &str, status_code: u16) -> AwsError {
    let mut code = None;
    let mut message = None;

    // Best effort: a malformed error body still maps by status code
    let _ = walk_xml(xml, |event| {
        match event {
            XmlEvent::Text(path, text) if ends_with(path, &["Error", "Code"]) => code = Some(text),
            XmlEvent::Text(path, text) if ends_with(path, &["Error", "Message"]) => {
                message = Some(text)
            }
            _ => {}
        }
        Ok(())
    });

    let code = code.unwrap_or_else(|| "Unknown".to_string());
    let message = message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            AwsError::QueueNotFound(message)
        }
        "QueueAlreadyExists" | "AWS.SimpleQueueService.QueueNameExists" => {
            AwsError::QueueAlreadyExists(message)
        }
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch" => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => AwsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        _ => AwsError::ServiceError { code, message },
    }
}

// ============================================================================
// SqsGateway
// ============================================================================

/// [`QueueGateway`] for AWS SQS (or an SQS-compatible endpoint)
///
/// Cheap to share behind an `Arc`; the underlying HTTP client pools connections.
pub struct SqsGateway {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: Url,
    host: String,
}

impl SqsGateway {
    /// Build a gateway for the given connection settings
    ///
    /// Without an explicit endpoint the regional AWS endpoint is used.
    /// Credentials are optional at construction; calls made without them
    /// fail with an authentication error.
    pub fn new(connection: &SqsConnection) -> Result<Self, AwsError> {
        if connection.region.is_empty() {
            return Err(AwsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        let endpoint = match &connection.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://sqs.{}.amazonaws.com", connection.region),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| AwsError::ConfigurationError(format!("Invalid endpoint: {}", e)))?;

        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(AwsError::ConfigurationError(format!(
                    "Endpoint has no host: {}",
                    endpoint
                )))
            }
        };

        let signer = match (&connection.access_key_id, &connection.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                connection.region.clone(),
            )),
            _ => None,
        };

        let http_client = HttpClient::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AwsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
            host,
        })
    }

    /// Sign and send one Query API action, returning the response body
    async fn call(
        &self,
        action: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<String, AwsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| AwsError::Authentication("No credentials configured".to_string()))?;

        params.push(("Action".to_string(), action.to_string()));
        params.push(("Version".to_string(), API_VERSION.to_string()));
        let query = canonical_query(&params);

        let headers = signer.sign_request(
            "POST",
            &self.host,
            self.endpoint.path(),
            &query,
            "",
            &Utc::now(),
        )?;

        let mut url = self.endpoint.clone();
        url.set_query(Some(&query));

        let mut request = self.http_client.post(url);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        debug!(action, "Sending SQS request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(HTTP_TIMEOUT)
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AwsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            let error = parse_error_response(&body, status.as_u16());
            debug!(action, status = status.as_u16(), error = %error, "SQS request failed");
            return Err(error);
        }

        Ok(body)
    }
}

impl fmt::Debug for SqsGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsGateway")
            .field("endpoint", &self.endpoint.as_str())
            .field("has_credentials", &self.signer.is_some())
            .finish()
    }
}

fn param(key: impl Into<String>, value: impl Into<String>) -> (String, String) {
    (key.into(), value.into())
}

#[async_trait]
impl QueueGateway for SqsGateway {
    #[instrument(skip_all, fields(queue = %name))]
    async fn resolve_queue(&self, name: &QueueName) -> Result<QueueHandle, QueueError> {
        let response = self
            .call("GetQueueUrl", vec![param("QueueName", name.as_str())])
            .await
            .map_err(|e| match e {
                AwsError::QueueNotFound(_) => QueueError::QueueNotFound {
                    queue_name: name.to_string(),
                },
                other => other.to_queue_error(),
            })?;

        let url = parse_text(&response, "QueueUrl").map_err(AwsError::to_queue_error)?;
        Ok(QueueHandle::new(url))
    }

    #[instrument(skip_all, fields(queue = %name))]
    async fn create_queue(&self, name: &QueueName) -> Result<QueueHandle, QueueError> {
        let response = self
            .call("CreateQueue", vec![param("QueueName", name.as_str())])
            .await
            .map_err(|e| match e {
                AwsError::QueueAlreadyExists(_) => QueueError::QueueAlreadyExists {
                    queue_name: name.to_string(),
                },
                other => other.to_queue_error(),
            })?;

        let url = parse_text(&response, "QueueUrl").map_err(AwsError::to_queue_error)?;
        Ok(QueueHandle::new(url))
    }

    #[instrument(skip_all, fields(queue = %queue, size = body.len()))]
    async fn send_message(
        &self,
        queue: &QueueHandle,
        body: Bytes,
    ) -> Result<MessageId, QueueError> {
        let encoded = STANDARD.encode(&body);
        if encoded.len() > MAX_BODY_BYTES {
            return Err(QueueError::ValidationError(ValidationError::OutOfRange {
                field: "message_body".to_string(),
                message: format!(
                    "{} bytes encoded exceeds the {} byte limit",
                    encoded.len(),
                    MAX_BODY_BYTES
                ),
            }));
        }

        let response = self
            .call(
                "SendMessage",
                vec![
                    param("QueueUrl", queue.as_str()),
                    param("MessageBody", encoded),
                ],
            )
            .await
            .map_err(AwsError::to_queue_error)?;

        let id = parse_text(&response, "MessageId").map_err(AwsError::to_queue_error)?;
        Ok(MessageId::from_str(&id)?)
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn receive_messages(
        &self,
        queue: &QueueHandle,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut params = vec![
            param("QueueUrl", queue.as_str()),
            param(
                "MaxNumberOfMessages",
                request
                    .max_messages
                    .clamp(1, MAX_MESSAGES_PER_RECEIVE)
                    .to_string(),
            ),
            param(
                "VisibilityTimeout",
                wire_seconds(request.visibility_timeout, MAX_VISIBILITY_SECONDS).to_string(),
            ),
            param(
                "WaitTimeSeconds",
                wire_seconds(request.wait_time, MAX_WAIT_SECONDS).to_string(),
            ),
        ];
        for (index, name) in request.attribute_names.iter().enumerate() {
            params.push(param(format!("AttributeName.{}", index + 1), name.as_str()));
        }

        let response = self
            .call("ReceiveMessage", params)
            .await
            .map_err(AwsError::to_queue_error)?;

        parse_received_messages(&response).map_err(AwsError::to_queue_error)
    }

    #[instrument(skip_all, fields(queue = %queue, lease = %lease))]
    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        lease: &LeaseHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.call(
            "ChangeMessageVisibility",
            vec![
                param("QueueUrl", queue.as_str()),
                param("ReceiptHandle", lease.as_str()),
                param(
                    "VisibilityTimeout",
                    wire_seconds(timeout, MAX_VISIBILITY_SECONDS).to_string(),
                ),
            ],
        )
        .await
        .map_err(|e| lease_error(e, lease))?;

        Ok(())
    }

    #[instrument(skip_all, fields(queue = %queue, lease = %lease))]
    async fn delete_message(
        &self,
        queue: &QueueHandle,
        lease: &LeaseHandle,
    ) -> Result<(), QueueError> {
        self.call(
            "DeleteMessage",
            vec![
                param("QueueUrl", queue.as_str()),
                param("ReceiptHandle", lease.as_str()),
            ],
        )
        .await
        .map_err(|e| lease_error(e, lease))?;

        Ok(())
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn delete_queue(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        self.call("DeleteQueue", vec![param("QueueUrl", queue.as_str())])
            .await
            .map_err(AwsError::to_queue_error)?;

        Ok(())
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn get_attributes(
        &self,
        queue: &QueueHandle,
        names: &[&str],
    ) -> Result<HashMap<String, String>, QueueError> {
        let mut params = vec![param("QueueUrl", queue.as_str())];
        for (index, name) in names.iter().enumerate() {
            params.push(param(format!("AttributeName.{}", index + 1), *name));
        }

        let response = self
            .call("GetQueueAttributes", params)
            .await
            .map_err(AwsError::to_queue_error)?;

        parse_queue_attributes(&response).map_err(AwsError::to_queue_error)
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn set_attributes(
        &self,
        queue: &QueueHandle,
        values: HashMap<String, String>,
    ) -> Result<(), QueueError> {
        let mut entries: Vec<_> = values.into_iter().collect();
        entries.sort();

        let mut params = vec![param("QueueUrl", queue.as_str())];
        for (index, (name, value)) in entries.into_iter().enumerate() {
            params.push(param(format!("Attribute.{}.Name", index + 1), name));
            params.push(param(format!("Attribute.{}.Value", index + 1), value));
        }

        self.call("SetQueueAttributes", params)
            .await
            .map_err(AwsError::to_queue_error)?;

        Ok(())
    }
}

fn lease_error(error: AwsError, lease: &LeaseHandle) -> QueueError {
    match error {
        AwsError::InvalidReceipt(_) => QueueError::MessageNotFound {
            lease: lease.to_string(),
        },
        other => other.to_queue_error(),
    }
}
