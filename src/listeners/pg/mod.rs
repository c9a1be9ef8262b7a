//! PostgreSQL listener.
//!
//! The client connects without credentials. The listener completes the
//! startup handshake with the backend on the client's behalf, using the
//! handler's `address`, `username`, `password` and optional `database`,
//! then forwards `AuthenticationOk` and relays the session.

pub mod protocol;
pub mod scram;

use self::protocol::{
    encode_startup, error_message, error_response, parse_authentication, password_message,
    read_message, read_startup, sasl_initial_response, sasl_response, Authentication,
    BackendMessage, StartupRequest, PROTOCOL_VERSION_3,
};
use self::scram::ScramClient;
use super::{relay, ConnectionHandler, HandlerError, ListenerContext};
use crate::proxy::Connection;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// SQLSTATE `invalid_authorization_specification`.
const SQLSTATE_AUTH: &str = "28000";
/// SQLSTATE `protocol_violation`.
const SQLSTATE_PROTOCOL: &str = "08P01";

pub struct PgHandler {
    context: ListenerContext,
}

/// Backend connection settings taken from a handler's credentials.
struct BackendSettings {
    address: String,
    username: String,
    password: String,
    database: Option<String>,
}

impl PgHandler {
    pub fn new(context: ListenerContext) -> Self {
        Self { context }
    }

    async fn settings(&self) -> Result<BackendSettings, HandlerError> {
        let handler = self.context.handler()?;
        let credentials = self.context.credentials(handler).await?;
        Ok(BackendSettings {
            address: credentials.require_str("address")?.to_string(),
            username: credentials.require_str("username")?.to_string(),
            password: credentials.require_str("password")?.to_string(),
            database: credentials.optional_str("database")?.map(str::to_string),
        })
    }
}

#[async_trait]
impl ConnectionHandler for PgHandler {
    async fn handle(&self, mut client: Connection, peer: &str) -> Result<(), HandlerError> {
        let parameters = match negotiate_startup(&mut client).await {
            Ok(Some(parameters)) => parameters,
            Ok(None) => return Ok(()),
            Err(e) => {
                let _ = client
                    .write_all(&error_response(SQLSTATE_PROTOCOL, &e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let connected = match self.settings().await {
            Ok(settings) => connect_backend(&settings, parameters).await,
            Err(e) => Err(e),
        };
        let (mut backend, ready) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                let _ = client
                    .write_all(&error_response(SQLSTATE_AUTH, &e.to_string()))
                    .await;
                return Err(e);
            }
        };

        debug!("pg: authenticated backend session for {}", peer);
        client.write_all(&ready.encode()).await?;
        relay(&mut client, &mut backend).await
    }
}

/// Run the client side of startup. Returns `None` for a cancel request,
/// which carries no session.
pub async fn negotiate_startup<S>(
    client: &mut S,
) -> Result<Option<Vec<(String, String)>>, HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    // At most one SSLRequest and one GSSENCRequest precede the startup message.
    for _ in 0..3 {
        match read_startup(client).await? {
            StartupRequest::Ssl | StartupRequest::GssEnc => client.write_all(b"N").await?,
            StartupRequest::Cancel => {
                debug!("pg: ignoring cancel request");
                return Ok(None);
            }
            StartupRequest::Startup {
                version,
                parameters,
            } => {
                if version != PROTOCOL_VERSION_3 {
                    return Err(HandlerError::protocol(format!(
                        "unsupported protocol version {}.{}",
                        version >> 16,
                        version & 0xffff
                    )));
                }
                return Ok(Some(parameters));
            }
        }
    }
    Err(HandlerError::protocol("too many negotiation requests"))
}

/// Replace the identity parameters the client sent with the configured ones.
fn backend_parameters(
    mut parameters: Vec<(String, String)>,
    settings: &BackendSettings,
) -> Vec<(String, String)> {
    parameters.retain(|(key, _)| {
        key != "user" && !(key == "database" && settings.database.is_some())
    });
    parameters.insert(0, ("user".to_string(), settings.username.clone()));
    if let Some(database) = &settings.database {
        parameters.insert(1, ("database".to_string(), database.clone()));
    }
    parameters
}

async fn connect_backend(
    settings: &BackendSettings,
    parameters: Vec<(String, String)>,
) -> Result<(TcpStream, BackendMessage), HandlerError> {
    let mut backend = TcpStream::connect(&settings.address).await.map_err(|e| {
        HandlerError::backend(format!("unable to connect to {}: {e}", settings.address))
    })?;
    backend
        .write_all(&encode_startup(&backend_parameters(parameters, settings)))
        .await?;
    let ready = authenticate(&mut backend, &settings.password).await?;
    Ok((backend, ready))
}

/// Answer the backend's authentication requests until `AuthenticationOk`,
/// which is returned for forwarding to the client.
pub async fn authenticate<S>(backend: &mut S, password: &str) -> Result<BackendMessage, HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut scram: Option<ScramClient> = None;

    loop {
        let message = read_message(backend).await?;
        match message.tag {
            b'R' => match parse_authentication(&message.body)? {
                Authentication::Ok => return Ok(message),
                Authentication::CleartextPassword => {
                    backend.write_all(&password_message(password)).await?;
                }
                Authentication::Md5Password => {
                    return Err(HandlerError::backend(
                        "MD5 password authentication is not supported; use scram-sha-256",
                    ))
                }
                Authentication::Sasl(mechanisms) => {
                    if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
                        return Err(HandlerError::backend(format!(
                            "no supported SASL mechanism in [{}]",
                            mechanisms.join(", ")
                        )));
                    }
                    let client = ScramClient::new(password);
                    backend
                        .write_all(&sasl_initial_response(
                            scram::MECHANISM,
                            client.client_first().as_bytes(),
                        ))
                        .await?;
                    scram = Some(client);
                }
                Authentication::SaslContinue(data) => {
                    let mut client = scram
                        .take()
                        .ok_or_else(|| HandlerError::protocol("SASL continue before start"))?;
                    let server_first = String::from_utf8(data.to_vec())
                        .map_err(|_| HandlerError::protocol("SASL message is not UTF-8"))?;
                    // Key derivation is CPU-bound and the iteration count is
                    // chosen by the backend.
                    let (client, client_final) = tokio::task::spawn_blocking(move || {
                        let client_final = client.handle_server_first(&server_first);
                        (client, client_final)
                    })
                    .await
                    .map_err(|e| HandlerError::backend(format!("SCRAM key derivation: {e}")))?;
                    let client_final =
                        client_final.map_err(|e| HandlerError::backend(e.to_string()))?;
                    backend.write_all(&sasl_response(client_final.as_bytes())).await?;
                    scram = Some(client);
                }
                Authentication::SaslFinal(data) => {
                    let client = scram
                        .as_ref()
                        .ok_or_else(|| HandlerError::protocol("SASL final before start"))?;
                    let server_final = std::str::from_utf8(&data)
                        .map_err(|_| HandlerError::protocol("SASL message is not UTF-8"))?;
                    client
                        .verify_server_final(server_final)
                        .map_err(|e| HandlerError::backend(e.to_string()))?;
                }
                Authentication::Other(code) => {
                    return Err(HandlerError::backend(format!(
                        "unsupported authentication request {code}"
                    )))
                }
            },
            b'E' => {
                return Err(HandlerError::backend(format!(
                    "backend rejected the connection: {}",
                    error_message(&message.body)
                )))
            }
            b'N' => continue,
            tag => {
                return Err(HandlerError::protocol(format!(
                    "unexpected message '{}' during authentication",
                    tag as char
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::protocol::{encode_message, PROTOCOL_VERSION_3, SSL_REQUEST_CODE};
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tokio::io::{duplex, AsyncReadExt};

    fn settings(database: Option<&str>) -> BackendSettings {
        BackendSettings {
            address: "db:5432".into(),
            username: "app".into(),
            password: "pw".into(),
            database: database.map(String::from),
        }
    }

    fn auth(code: i32, extra: &[u8]) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_i32(code);
        body.put_slice(extra);
        encode_message(b'R', &body)
    }

    #[test]
    fn user_is_always_replaced() {
        let client = vec![
            ("user".to_string(), "someone".to_string()),
            ("database".to_string(), "orders".to_string()),
            ("application_name".to_string(), "psql".to_string()),
        ];
        let params = backend_parameters(client.clone(), &settings(None));
        assert_eq!(params[0], ("user".to_string(), "app".to_string()));
        assert!(params.contains(&("database".to_string(), "orders".to_string())));

        let params = backend_parameters(client, &settings(Some("billing")));
        assert!(params.contains(&("database".to_string(), "billing".to_string())));
        assert!(!params.iter().any(|(_, v)| v == "orders" || v == "someone"));
    }

    #[tokio::test]
    async fn ssl_request_is_declined_then_startup_read() {
        let (mut client, mut proxy) = duplex(1024);
        let task = tokio::spawn(async move { negotiate_startup(&mut proxy).await });

        let mut ssl = BytesMut::new();
        ssl.put_i32(8);
        ssl.put_i32(SSL_REQUEST_CODE);
        client.write_all(&ssl).await.unwrap();
        let mut answer = [0u8; 1];
        client.read_exact(&mut answer).await.unwrap();
        assert_eq!(&answer, b"N");

        client
            .write_all(&encode_startup(&[("user".into(), "x".into())]))
            .await
            .unwrap();
        let params = task.await.unwrap().unwrap().unwrap();
        assert_eq!(params, vec![("user".to_string(), "x".to_string())]);
    }

    #[tokio::test]
    async fn cleartext_password_exchange() {
        let (mut backend, mut proxy) = duplex(1024);
        let task = tokio::spawn(async move { authenticate(&mut proxy, "s3cr3t").await });

        backend.write_all(&auth(3, &[])).await.unwrap();
        let message = read_message(&mut backend).await.unwrap();
        assert_eq!(message.tag, b'p');
        assert_eq!(&message.body[..], b"s3cr3t\0");

        backend.write_all(&auth(0, &[])).await.unwrap();
        let ok = task.await.unwrap().unwrap();
        assert_eq!(ok.tag, b'R');
        assert_eq!(ok.encode(), auth(0, &[]));
    }

    #[tokio::test]
    async fn md5_is_refused() {
        let (mut backend, mut proxy) = duplex(1024);
        let task = tokio::spawn(async move { authenticate(&mut proxy, "pw").await });
        backend.write_all(&auth(5, b"salt")).await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("MD5"));
    }

    #[tokio::test]
    async fn scram_exchange_checks_server_signature() {
        let (mut backend, mut proxy) = duplex(4096);
        let task = tokio::spawn(async move { authenticate(&mut proxy, "pencil").await });

        backend
            .write_all(&auth(10, b"SCRAM-SHA-256\0\0"))
            .await
            .unwrap();
        let initial = read_message(&mut backend).await.unwrap();
        assert_eq!(initial.tag, b'p');
        let mechanism_end = initial.body.iter().position(|b| *b == 0).unwrap();
        assert_eq!(&initial.body[..mechanism_end], b"SCRAM-SHA-256");
        let client_first = std::str::from_utf8(&initial.body[mechanism_end + 5..]).unwrap();
        let nonce = client_first.split_once(",r=").unwrap().1;

        let server_first = format!("r={nonce}srv,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096");
        backend
            .write_all(&auth(11, server_first.as_bytes()))
            .await
            .unwrap();
        let response = read_message(&mut backend).await.unwrap();
        assert_eq!(response.tag, b'p');
        let client_final = std::str::from_utf8(&response.body).unwrap();
        assert!(client_final.starts_with(&format!("c=biws,r={nonce}srv,p=")));

        backend
            .write_all(&auth(12, b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="))
            .await
            .unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("server signature did not verify"));
    }

    #[tokio::test]
    async fn backend_error_is_reported() {
        let (mut backend, mut proxy) = duplex(1024);
        let task = tokio::spawn(async move { authenticate(&mut proxy, "pw").await });
        backend
            .write_all(&error_response("28P01", "password authentication failed"))
            .await
            .unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("password authentication failed"));
    }

    #[tokio::test]
    async fn startup_version_must_be_3() {
        let (mut client, mut proxy) = duplex(1024);
        let mut raw = BytesMut::new();
        raw.put_i32(9);
        raw.put_i32(PROTOCOL_VERSION_3 - 1);
        raw.put_u8(0);
        client.write_all(&raw).await.unwrap();
        assert!(negotiate_startup(&mut proxy).await.is_err());
    }
}
