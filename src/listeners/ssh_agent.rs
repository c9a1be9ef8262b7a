//! ssh-agent listener.
//!
//! Serves the agent protocol (draft-miller-ssh-agent) over the listener
//! socket, holding the Ed25519 keys named by the listener's handlers. Keys
//! are resolved per connection and never written anywhere.

use super::{ConnectionHandler, HandlerError, ListenerContext};
use crate::config::SSH_AGENT_MAX_FRAME;
use crate::proxy::Connection;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signer, SigningKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const SSH_AGENT_FAILURE: u8 = 5;
pub const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub const SSH_AGENT_SIGN_RESPONSE: u8 = 14;

const KEY_TYPE: &str = "ssh-ed25519";

/// One key the agent can sign with.
pub struct AgentKey {
    signing_key: SigningKey,
    comment: String,
}

impl AgentKey {
    pub fn new(signing_key: SigningKey, comment: impl Into<String>) -> Self {
        Self {
            signing_key,
            comment: comment.into(),
        }
    }

    pub fn from_pem(pem: &str, comment: impl Into<String>) -> Result<Self, HandlerError> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| HandlerError::invalid_credential("private_key", e))?;
        Ok(Self::new(signing_key, comment))
    }

    /// The public key in SSH wire format.
    pub fn public_blob(&self) -> Bytes {
        let mut blob = BytesMut::new();
        put_string(&mut blob, KEY_TYPE.as_bytes());
        put_string(&mut blob, self.signing_key.verifying_key().as_bytes());
        blob.freeze()
    }

    fn sign(&self, data: &[u8]) -> Bytes {
        let signature = self.signing_key.sign(data);
        let mut blob = BytesMut::new();
        put_string(&mut blob, KEY_TYPE.as_bytes());
        put_string(&mut blob, &signature.to_bytes());
        blob.freeze()
    }
}

fn put_string(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn get_string(buf: &mut Bytes) -> Option<Bytes> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return None;
    }
    Some(buf.split_to(len))
}

/// Answer one request. Anything unsupported or malformed gets `FAILURE`.
pub fn respond(keys: &[AgentKey], request: Bytes) -> BytesMut {
    let mut request = request;
    let mut response = BytesMut::new();
    if !request.has_remaining() {
        response.put_u8(SSH_AGENT_FAILURE);
        return response;
    }

    match request.get_u8() {
        SSH_AGENTC_REQUEST_IDENTITIES => {
            response.put_u8(SSH_AGENT_IDENTITIES_ANSWER);
            response.put_u32(keys.len() as u32);
            for key in keys {
                put_string(&mut response, &key.public_blob());
                put_string(&mut response, key.comment.as_bytes());
            }
        }
        SSH_AGENTC_SIGN_REQUEST => {
            let signed = get_string(&mut request).zip(get_string(&mut request)).and_then(
                |(blob, data)| {
                    keys.iter()
                        .find(|k| k.public_blob() == blob)
                        .map(|k| k.sign(&data))
                },
            );
            match signed {
                Some(signature) => {
                    response.put_u8(SSH_AGENT_SIGN_RESPONSE);
                    put_string(&mut response, &signature);
                }
                None => response.put_u8(SSH_AGENT_FAILURE),
            }
        }
        other => {
            debug!("ssh-agent: unsupported request type {}", other);
            response.put_u8(SSH_AGENT_FAILURE);
        }
    }
    response
}

/// Read one length-prefixed frame. `None` on a clean close.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, HandlerError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > SSH_AGENT_MAX_FRAME {
        return Err(HandlerError::protocol(format!(
            "frame of {len} bytes exceeds the {SSH_AGENT_MAX_FRAME} byte limit"
        )));
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(Bytes::from(frame)))
}

/// Serve requests until the client closes the connection.
pub async fn serve<S>(stream: &mut S, keys: &[AgentKey]) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    while let Some(request) = read_frame(stream).await? {
        let response = respond(keys, request);
        let mut frame = BytesMut::with_capacity(response.len() + 4);
        put_string(&mut frame, &response);
        stream.write_all(&frame).await?;
    }
    Ok(())
}

pub struct SshAgentHandler {
    context: ListenerContext,
}

impl SshAgentHandler {
    pub fn new(context: ListenerContext) -> Self {
        Self { context }
    }

    /// One key per handler attached to this listener.
    async fn keys(&self) -> Result<Vec<AgentKey>, HandlerError> {
        let mut keys = Vec::new();
        for handler in self.context.handlers() {
            let credentials = self.context.credentials(handler).await?;
            let pem = credentials.require_str("private_key")?;
            let comment = credentials.optional_str("comment")?.unwrap_or(&handler.name);
            keys.push(AgentKey::from_pem(pem, comment)?);
        }
        if keys.is_empty() {
            return Err(HandlerError::NoHandler(self.context.name().to_string()));
        }
        Ok(keys)
    }
}

#[async_trait]
impl ConnectionHandler for SshAgentHandler {
    async fn handle(&self, mut client: Connection, peer: &str) -> Result<(), HandlerError> {
        let keys = self.keys().await?;
        debug!("ssh-agent: serving {} key(s) to {}", keys.len(), peer);
        serve(&mut client, &keys).await
    }
}
