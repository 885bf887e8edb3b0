//! Messages exchanged between master and workers.
//!
//! One request per connection. Every message is a frame: a 4-byte
//! big-endian length followed by a JSON document.
//!
//! | request                        | reply                                   |
//! |--------------------------------|-----------------------------------------|
//! | `{"type":"recv","body":null}`  | `{"kind":"work","index":..,"input":..,"config":..}` or `{"kind":"exhausted"}` |
//! | `{"type":"send","body":{"index":..,"output":..,"error":..}}` | `{"kind":"ack"}` |

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame either side will read or write.
pub const MAX_FRAME_LEN: usize = 64 << 20;

pub const RECV_TYPE: &str = "recv";
pub const SEND_TYPE: &str = "send";

/// A request as it appears on the wire, before its kind is checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ask the master for the next unclaimed index.
    ReceiveInput,
    /// Report the outcome for an index.
    SendOutput(OutputReport),
}

/// Body of a [`Request::SendOutput`].
///
/// `error` is `None` on success, in which case `output` holds the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputReport {
    pub index: usize,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OutputReport {
    pub fn success(index: usize, output: Value) -> Self {
        Self {
            index,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            output: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// One unit of work. The index is chosen by the master.
    Work { index: usize, input: Value, config: Value },
    /// Every index has already been handed out.
    Exhausted,
    Ack,
}

impl Request {
    pub fn into_raw(self) -> Result<RawRequest, ProtocolError> {
        Ok(match self {
            Request::ReceiveInput => RawRequest {
                kind: RECV_TYPE.to_string(),
                body: Value::Null,
            },
            Request::SendOutput(report) => RawRequest {
                kind: SEND_TYPE.to_string(),
                body: serde_json::to_value(report)?,
            },
        })
    }

    pub fn from_raw(raw: RawRequest) -> Result<Self, ProtocolError> {
        match raw.kind.as_str() {
            RECV_TYPE => Ok(Request::ReceiveInput),
            SEND_TYPE => Ok(Request::SendOutput(serde_json::from_value(raw.body)?)),
            _ => Err(ProtocolError::UnknownRequest(raw.kind)),
        }
    }
}

/// Writes one length-prefixed JSON frame.
pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one length-prefixed JSON frame.
pub async fn read_frame<R, T>(r: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = r.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut buf = BytesMut::zeroed(len);
    r.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

pub async fn write_request<W>(w: &mut W, req: Request) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(w, &req.into_raw()?).await
}

pub async fn read_request<R>(r: &mut R) -> Result<Request, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let raw: RawRequest = read_frame(r).await?;
    Request::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_output_survives_framing() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let report = OutputReport::success(4, json!({"x": [1.5, 2.5]}));
        write_request(&mut client, Request::SendOutput(report.clone()))
            .await
            .unwrap();
        let got = read_request(&mut server).await.unwrap();
        assert_eq!(got, Request::SendOutput(report));
    }

    #[tokio::test]
    async fn failure_report_has_no_output() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_request(&mut client, Request::SendOutput(OutputReport::failure(2, "boom")))
            .await
            .unwrap();
        let raw: RawRequest = read_frame(&mut server).await.unwrap();
        assert_eq!(raw.kind, SEND_TYPE);
        assert_eq!(raw.body, json!({"index": 2, "output": null, "error": "boom"}));
    }

    #[tokio::test]
    async fn reply_is_tagged_by_kind() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &Reply::Exhausted).await.unwrap();
        let v: Value = read_frame(&mut b).await.unwrap();
        assert_eq!(v, json!({"kind": "exhausted"}));
    }

    #[tokio::test]
    async fn unknown_request_type_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &json!({"type": "stats", "body": null}))
            .await
            .unwrap();
        let err = read_request(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownRequest(kind) if kind == "stats"));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_reading() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(MAX_FRAME_LEN as u32 + 1).await.unwrap();
        let err = read_frame::<_, Value>(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(10).await.unwrap();
        client.write_all(b"{\"ki").await.unwrap();
        drop(client);
        let err = read_frame::<_, Value>(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
