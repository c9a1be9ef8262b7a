//! Client side of SCRAM-SHA-256 (RFC 5802, RFC 7677) without channel binding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// GS2 header for "no channel binding, no authzid".
const GS2_HEADER: &str = "n,,";

/// Upper bound on the server-chosen iteration count.
const MAX_ITERATIONS: u32 = 10_000_000;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScramError {
    #[error("malformed SCRAM message: {0}")]
    Malformed(String),

    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,

    #[error("server reported an error: {0}")]
    Server(String),

    #[error("server signature did not verify")]
    BadServerSignature,

    #[error("SCRAM exchange out of order")]
    OutOfOrder,
}

/// One SCRAM exchange.
pub struct ScramClient {
    password: String,
    client_first_bare: String,
    client_nonce: String,
    server_signature: Option<[u8; 32]>,
}

impl ScramClient {
    /// Start an exchange with a fresh random nonce. PostgreSQL ignores the
    /// SCRAM user name in favour of the startup `user`, so it is left empty.
    pub fn new(password: &str) -> Self {
        let mut raw = [0u8; 18];
        rand::thread_rng().fill(&mut raw);
        Self::with_nonce("", password, &STANDARD.encode(raw))
    }

    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_string(),
            client_first_bare: format!("n={},r={}", escape_name(username), nonce),
            client_nonce: nonce.to_string(),
            server_signature: None,
        }
    }

    /// The `client-first-message`.
    pub fn client_first(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Consume the `server-first-message` and produce the
    /// `client-final-message`.
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String, ScramError> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attribute in server_first.split(',') {
            match attribute.split_once('=') {
                Some(("r", value)) => nonce = Some(value),
                Some(("s", value)) => salt = Some(value),
                Some(("i", value)) => iterations = Some(value),
                Some(("m", _)) => {
                    return Err(ScramError::Malformed("mandatory extension requested".into()))
                }
                _ => {}
            }
        }

        let nonce = nonce.ok_or_else(|| ScramError::Malformed("missing nonce".into()))?;
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(ScramError::NonceMismatch);
        }
        let salt = STANDARD
            .decode(salt.ok_or_else(|| ScramError::Malformed("missing salt".into()))?)
            .map_err(|e| ScramError::Malformed(format!("salt: {e}")))?;
        let iterations: u32 = iterations
            .ok_or_else(|| ScramError::Malformed("missing iteration count".into()))?
            .parse()
            .map_err(|_| ScramError::Malformed("iteration count".into()))?;
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(ScramError::Malformed(format!(
                "iteration count {iterations} out of range"
            )));
        }

        let without_proof = format!("c={},r={}", STANDARD.encode(GS2_HEADER), nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

        let salted = hi(self.password.as_bytes(), &salt, iterations)?;
        let client_key = hmac(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;

        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        let server_key = hmac(&salted, b"Server Key")?;
        self.server_signature = Some(hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)))
    }

    /// Check the `server-final-message`.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), ScramError> {
        let expected = self.server_signature.ok_or(ScramError::OutOfOrder)?;
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(ScramError::Server(error.to_string()));
        }
        let verifier = server_final
            .split(',')
            .find_map(|a| a.strip_prefix("v="))
            .ok_or_else(|| ScramError::Malformed("missing verifier".into()))?;
        let received = STANDARD
            .decode(verifier)
            .map_err(|e| ScramError::Malformed(format!("verifier: {e}")))?;

        if bool::from(expected.as_slice().ct_eq(received.as_slice())) {
            Ok(())
        } else {
            Err(ScramError::BadServerSignature)
        }
    }
}

fn escape_name(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], ScramError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| ScramError::Malformed("unusable HMAC key".into()))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// PBKDF2-HMAC-SHA-256 with a single output block.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32], ScramError> {
    let mut first = salt.to_vec();
    first.extend_from_slice(&1u32.to_be_bytes());
    let mut u = hmac(password, &first)?;
    let mut result = u;
    for _ in 1..iterations {
        u = hmac(password, &u)?;
        for (r, b) in result.iter_mut().zip(u.iter()) {
            *r ^= b;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    fn rfc7677_client() -> ScramClient {
        ScramClient::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO")
    }

    #[test]
    fn rfc7677_exchange() {
        let mut client = rfc7677_client();
        assert_eq!(client.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let client_final = client.handle_server_first(SERVER_FIRST).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );
        client
            .verify_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn wrong_server_signature_is_rejected() {
        let mut client = rfc7677_client();
        client.handle_server_first(SERVER_FIRST).unwrap();
        assert_eq!(
            client.verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
            Err(ScramError::BadServerSignature)
        );
        assert_eq!(
            client.verify_server_final("e=invalid-proof"),
            Err(ScramError::Server("invalid-proof".into()))
        );
    }

    #[test]
    fn server_nonce_must_extend_client_nonce() {
        let mut client = rfc7677_client();
        let err = client
            .handle_server_first("r=somethingelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert_eq!(err, ScramError::NonceMismatch);
    }

    #[test]
    fn final_before_first_is_out_of_order() {
        assert_eq!(
            rfc7677_client().verify_server_final("v=abc="),
            Err(ScramError::OutOfOrder)
        );
    }

    #[test]
    fn fresh_nonces_differ() {
        assert_ne!(
            ScramClient::new("pw").client_first(),
            ScramClient::new("pw").client_first()
        );
    }
}
