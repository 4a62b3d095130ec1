// Wire protocol - length-framed JSON envelopes signed with HMAC-SHA256

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::analyzer::{Assessment, Parameter};
use crate::error::{Result as ShadowdResult, ShadowdError};

type HmacSha256 = Hmac<Sha256>;

/// Signed envelope as received from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub profile_id: i64,
    /// Hex encoded HMAC-SHA256 of `data` under the profile's secret.
    pub signature: String,
    /// JSON document carrying a [`RequestData`], signed byte for byte.
    pub data: String,
}

/// Decoded body of an authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestData {
    pub caller: String,
    pub client_address: String,
    #[serde(default)]
    pub learning: bool,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Attack,
    BadRequest,
    BadSignature,
    BadFrame,
    NotFound,
    InternalError,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Attack => "attack",
            Status::BadRequest => "bad_request",
            Status::BadSignature => "bad_signature",
            Status::BadFrame => "bad_frame",
            Status::NotFound => "not_found",
            Status::InternalError => "internal_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub path: String,
    pub whitelisted: bool,
    pub critical_impact: bool,
    pub threat: bool,
    pub impact: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    /// Whether the monitored application should let the request through.
    pub allow: bool,
    #[serde(default)]
    pub verdicts: Vec<Verdict>,
}

impl Response {
    pub fn from_assessment(assessment: &Assessment) -> Self {
        let status = if assessment.attack { Status::Attack } else { Status::Ok };

        Self {
            status,
            allow: !assessment.attack,
            verdicts: assessment
                .verdicts
                .iter()
                .map(|v| Verdict {
                    path: v.path.clone(),
                    whitelisted: v.whitelisted,
                    critical_impact: v.critical_impact,
                    threat: v.threat,
                    impact: v.impact,
                })
                .collect(),
        }
    }

    pub fn error(status: Status) -> Self {
        Self {
            status,
            allow: false,
            verdicts: Vec::new(),
        }
    }
}

/// Read one frame. `Ok(None)` means the peer closed the connection
/// cleanly before a new frame started.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> ShadowdResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ShadowdError::Frame("connection closed inside frame header".to_string()));
        }
        filled += n;
    }

    let length = u32::from_be_bytes(header) as usize;
    if length == 0 {
        return Err(ShadowdError::Frame("empty frame".to_string()));
    }
    if length > max_size {
        return Err(ShadowdError::Frame(format!(
            "frame of {} bytes exceeds limit of {}",
            length, max_size
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ShadowdError::Frame("truncated frame".to_string()),
        _ => ShadowdError::Io(e),
    })?;

    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> ShadowdResult<()>
where
    W: AsyncWrite + Unpin,
{
    let length = u32::try_from(payload.len())
        .map_err(|_| ShadowdError::Internal("response frame too large".to_string()))?;
    writer.write_all(&length.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> ShadowdResult<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(response)?;
    write_frame(writer, &payload).await
}

pub fn decode_envelope(frame: &[u8]) -> ShadowdResult<Envelope> {
    serde_json::from_slice(frame).map_err(|e| ShadowdError::Frame(format!("invalid envelope: {}", describe(&e))))
}

pub fn decode_request(envelope: &Envelope) -> ShadowdResult<RequestData> {
    serde_json::from_str(&envelope.data)
        .map_err(|e| ShadowdError::BadRequest(format!("invalid request data: {}", describe(&e))))
}

// serde_json messages quote the offending input, which may be an attack
// payload. Only the category and position are reported.
fn describe(error: &serde_json::Error) -> String {
    let category = match error.classify() {
        serde_json::error::Category::Io => "io",
        serde_json::error::Category::Syntax => "syntax",
        serde_json::error::Category::Data => "data",
        serde_json::error::Category::Eof => "eof",
    };
    format!("{} error at line {} column {}", category, error.line(), error.column())
}

/// Hex encoded HMAC-SHA256 of `data`, as a connector computes it.
#[cfg(test)]
pub fn sign(secret: &str, data: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature over `envelope.data`.
pub fn verify(secret: &str, envelope: &Envelope) -> ShadowdResult<()> {
    let expected = hex::decode(envelope.signature.trim())
        .map_err(|_| ShadowdError::BadSignature(envelope.profile_id))?;

    let mut mac = new_mac(secret);
    mac.update(envelope.data.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| ShadowdError::BadSignature(envelope.profile_id))
}

fn new_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(secret: &str) -> Envelope {
        let data = r#"{"caller":"login.php","client_address":"198.51.100.4","parameters":[{"path":"id","value":"1"}]}"#;
        Envelope {
            profile_id: 1,
            signature: sign(secret, data.as_bytes()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_signature_accepts_registered_secret() {
        let envelope = envelope("k");
        assert!(verify("k", &envelope).is_ok());
    }

    #[test]
    fn test_signature_rejects_wrong_secret() {
        let envelope = envelope("k");
        assert!(matches!(verify("other", &envelope), Err(ShadowdError::BadSignature(1))));
    }

    #[test]
    fn test_signature_rejects_tampered_payload() {
        let mut envelope = envelope("k");
        envelope.data = envelope.data.replace("\"1\"", "\"2\"");
        assert!(verify("k", &envelope).is_err());
    }

    #[test]
    fn test_signature_rejects_non_hex() {
        let mut envelope = envelope("k");
        envelope.signature = "not-hex".to_string();
        assert!(verify("k", &envelope).is_err());
    }

    #[test]
    fn test_request_defaults() {
        let envelope = Envelope {
            profile_id: 2,
            signature: String::new(),
            data: r#"{"caller":"index.php","client_address":"::1"}"#.to_string(),
        };
        let request = decode_request(&envelope).unwrap();
        assert!(!request.learning);
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn test_decode_errors_do_not_echo_values() {
        let envelope = Envelope {
            profile_id: 1,
            signature: String::new(),
            data: r#"{"caller":"login.php","client_address":"::1","learning":"' OR 1=1"}"#.to_string(),
        };
        let message = decode_request(&envelope).unwrap_err().to_string();
        assert!(message.contains("data error at line 1"));
        assert!(!message.contains("OR 1=1"));

        let message = decode_envelope(b"{\"profile_id\":\"<script>\"}").unwrap_err().to_string();
        assert!(!message.contains("<script>"));
    }

    #[tokio::test]
    async fn test_frame_limits() {
        let mut oversized: &[u8] = &[0, 0, 0, 200, b'x'];
        assert!(matches!(read_frame(&mut oversized, 100).await, Err(ShadowdError::Frame(_))));

        let mut truncated: &[u8] = &[0, 0, 0, 5, b'a', b'b'];
        assert!(matches!(read_frame(&mut truncated, 100).await, Err(ShadowdError::Frame(_))));

        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty, 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_exchange() {
        let response = Response::error(Status::NotFound);
        let mut buffer = Vec::new();
        write_response(&mut buffer, &response).await.unwrap();

        let mut reader: &[u8] = &buffer;
        let frame = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        let decoded: Response = serde_json::from_slice(&frame).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(&frame[..], br#"{"status":"not_found","allow":false,"verdicts":[]}"#);
    }
}
