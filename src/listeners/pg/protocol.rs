//! PostgreSQL v3 wire messages used during startup and authentication.

use crate::config::PG_MAX_MESSAGE;
use crate::listeners::HandlerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const PROTOCOL_VERSION_3: i32 = 196_608;
pub const SSL_REQUEST_CODE: i32 = 80_877_103;
pub const GSSENC_REQUEST_CODE: i32 = 80_877_104;
pub const CANCEL_REQUEST_CODE: i32 = 80_877_102;

/// The first message a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRequest {
    Ssl,
    GssEnc,
    Cancel,
    Startup {
        version: i32,
        parameters: Vec<(String, String)>,
    },
}

/// A tagged message from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMessage {
    pub tag: u8,
    pub body: Bytes,
}

impl BackendMessage {
    pub fn encode(&self) -> BytesMut {
        encode_message(self.tag, &self.body)
    }
}

/// Backend `R` message payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Ok,
    CleartextPassword,
    Md5Password,
    Sasl(Vec<String>),
    SaslContinue(Bytes),
    SaslFinal(Bytes),
    Other(i32),
}

fn check_length(len: i32, header: i32) -> Result<usize, HandlerError> {
    if len < header || len as usize > PG_MAX_MESSAGE {
        return Err(HandlerError::protocol(format!("invalid message length {len}")));
    }
    Ok((len - header) as usize)
}

fn read_cstr(buf: &mut Bytes) -> Result<String, HandlerError> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| HandlerError::protocol("unterminated string"))?;
    let value = buf.split_to(end);
    buf.advance(1);
    String::from_utf8(value.to_vec()).map_err(|_| HandlerError::protocol("string is not UTF-8"))
}

fn put_cstr(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Read the untagged startup-phase message.
pub async fn read_startup<R>(reader: &mut R) -> Result<StartupRequest, HandlerError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_i32().await?;
    let remaining = check_length(len, 8)?;
    let code = reader.read_i32().await?;
    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await?;

    match code {
        SSL_REQUEST_CODE => Ok(StartupRequest::Ssl),
        GSSENC_REQUEST_CODE => Ok(StartupRequest::GssEnc),
        CANCEL_REQUEST_CODE => Ok(StartupRequest::Cancel),
        version => {
            let mut body = Bytes::from(body);
            let mut parameters = Vec::new();
            while body.first().is_some_and(|b| *b != 0) {
                let key = read_cstr(&mut body)?;
                let value = read_cstr(&mut body)?;
                parameters.push((key, value));
            }
            Ok(StartupRequest::Startup {
                version,
                parameters,
            })
        }
    }
}

/// Encode a v3 StartupMessage.
pub fn encode_startup(parameters: &[(String, String)]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i32(PROTOCOL_VERSION_3);
    for (key, value) in parameters {
        put_cstr(&mut body, key);
        put_cstr(&mut body, value);
    }
    body.put_u8(0);

    let mut out = BytesMut::with_capacity(body.len() + 4);
    out.put_i32(body.len() as i32 + 4);
    out.extend_from_slice(&body);
    out
}

/// Read one tagged message.
pub async fn read_message<R>(reader: &mut R) -> Result<BackendMessage, HandlerError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let tag = reader.read_u8().await?;
    let len = reader.read_i32().await?;
    let remaining = check_length(len, 4)?;
    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await?;
    Ok(BackendMessage {
        tag,
        body: Bytes::from(body),
    })
}

pub fn encode_message(tag: u8, body: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(body.len() + 5);
    out.put_u8(tag);
    out.put_i32(body.len() as i32 + 4);
    out.put_slice(body);
    out
}

pub fn password_message(password: &str) -> BytesMut {
    let mut body = BytesMut::new();
    put_cstr(&mut body, password);
    encode_message(b'p', &body)
}

pub fn sasl_initial_response(mechanism: &str, data: &[u8]) -> BytesMut {
    let mut body = BytesMut::new();
    put_cstr(&mut body, mechanism);
    body.put_i32(data.len() as i32);
    body.put_slice(data);
    encode_message(b'p', &body)
}

pub fn sasl_response(data: &[u8]) -> BytesMut {
    encode_message(b'p', data)
}

/// A FATAL ErrorResponse carrying `code` (SQLSTATE) and `message`.
pub fn error_response(code: &str, message: &str) -> BytesMut {
    let mut body = BytesMut::new();
    for (field, value) in [(b'S', "FATAL"), (b'V', "FATAL"), (b'C', code), (b'M', message)] {
        body.put_u8(field);
        put_cstr(&mut body, value);
    }
    body.put_u8(0);
    encode_message(b'E', &body)
}

/// The `M` field of an ErrorResponse body.
pub fn error_message(body: &[u8]) -> String {
    let mut fields = Bytes::copy_from_slice(body);
    while let Some(&field) = fields.first() {
        if field == 0 {
            break;
        }
        fields.advance(1);
        let Ok(value) = read_cstr(&mut fields) else {
            break;
        };
        if field == b'M' {
            return value;
        }
    }
    "unknown error".to_string()
}

pub fn parse_authentication(body: &[u8]) -> Result<Authentication, HandlerError> {
    let mut body = Bytes::copy_from_slice(body);
    if body.remaining() < 4 {
        return Err(HandlerError::protocol("short authentication message"));
    }
    let auth = match body.get_i32() {
        0 => Authentication::Ok,
        3 => Authentication::CleartextPassword,
        5 => Authentication::Md5Password,
        10 => {
            let mut mechanisms = Vec::new();
            while body.first().is_some_and(|b| *b != 0) {
                mechanisms.push(read_cstr(&mut body)?);
            }
            Authentication::Sasl(mechanisms)
        }
        11 => Authentication::SaslContinue(body),
        12 => Authentication::SaslFinal(body),
        other => Authentication::Other(other),
    };
    Ok(auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_message_parameters() {
        let params = vec![
            ("user".to_string(), "alice".to_string()),
            ("database".to_string(), "orders".to_string()),
        ];
        let encoded = encode_startup(&params);
        let request = read_startup(&mut encoded.as_ref()).await.unwrap();
        assert_eq!(
            request,
            StartupRequest::Startup {
                version: PROTOCOL_VERSION_3,
                parameters: params,
            }
        );
    }

    #[tokio::test]
    async fn ssl_request_is_recognised() {
        let mut raw = BytesMut::new();
        raw.put_i32(8);
        raw.put_i32(SSL_REQUEST_CODE);
        assert_eq!(
            read_startup(&mut raw.as_ref()).await.unwrap(),
            StartupRequest::Ssl
        );
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut raw = BytesMut::new();
        raw.put_i32(i32::MAX);
        raw.put_i32(PROTOCOL_VERSION_3);
        assert!(read_startup(&mut raw.as_ref()).await.is_err());
    }

    #[test]
    fn sasl_mechanisms() {
        let mut body = BytesMut::new();
        body.put_i32(10);
        put_cstr(&mut body, "SCRAM-SHA-256-PLUS");
        put_cstr(&mut body, "SCRAM-SHA-256");
        body.put_u8(0);
        assert_eq!(
            parse_authentication(&body).unwrap(),
            Authentication::Sasl(vec!["SCRAM-SHA-256-PLUS".into(), "SCRAM-SHA-256".into()])
        );
    }

    #[tokio::test]
    async fn error_response_carries_message() {
        let encoded = error_response("28P01", "password authentication failed");
        let message = read_message(&mut encoded.as_ref()).await.unwrap();
        assert_eq!(message.tag, b'E');
        assert_eq!(error_message(&message.body), "password authentication failed");
    }
}
