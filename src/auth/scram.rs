//! RFC 5802 SCRAM-SHA-256, no channel binding (`n,,` GS2 header).
//!
//! Driven as an explicit state machine (`ClientFirst` -> `ClientFinal` ->
//! `Done`) so `conn.rs` just feeds it server messages instead of
//! interleaving crypto with wire I/O.

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::digest::FixedOutput;
use sha2::Sha256;

use crate::error::{Error, Result};

const GS2_HEADER: &str = "n,,";

pub struct ScramClient {
  client_nonce: String,
  password: Vec<u8>,
  client_first_bare: String,
  state: State,
}

enum State {
  Start,
  ClientFirstSent,
  ClientFinalSent { salted_password: [u8; 32], auth_message: String },
  Done,
}

impl ScramClient {
  pub fn new(password: &str) -> Self {
    let client_nonce = thread_rng().sample_iter(&Alphanumeric).take(24).map(char::from).collect::<String>();
    ScramClient {
      client_nonce,
      password: normalize_password(password),
      client_first_bare: String::new(),
      state: State::Start,
    }
  }

  /// `SASLInitialResponse` payload: `n,,n=,r=<client nonce>`.
  pub fn client_first(&mut self) -> String {
    self.client_first_bare = format!("n=,r={}", self.client_nonce);
    self.state = State::ClientFirstSent;
    format!("{GS2_HEADER}{}", self.client_first_bare)
  }

  /// Consumes the server-first message (`r=...,s=...,i=...`) and produces
  /// the `SASLResponse` payload (`c=biws,r=...,p=...`).
  pub fn client_final(&mut self, server_first: &str) -> Result<String> {
    if !matches!(self.state, State::ClientFirstSent) {
      return Err(Error::auth("scram: client_final called out of order"));
    }

    let mut parts = server_first.splitn(3, ',');
    let server_nonce = parts
      .next()
      .and_then(|v| v.strip_prefix("r="))
      .ok_or_else(|| Error::auth("scram: server-first message missing nonce"))?;
    let salt = parts
      .next()
      .and_then(|v| v.strip_prefix("s="))
      .ok_or_else(|| Error::auth("scram: server-first message missing salt"))
      .and_then(|s| base64::decode(s).map_err(|e| Error::auth(format!("scram: invalid salt base64: {e}"))))?;
    let iterations: usize = parts
      .next()
      .and_then(|v| v.strip_prefix("i="))
      .ok_or_else(|| Error::auth("scram: server-first message missing iteration count"))
      .and_then(|s| s.parse().map_err(|_| Error::auth("scram: invalid iteration count")))?;

    if !server_nonce.starts_with(&self.client_nonce) || server_nonce.len() <= self.client_nonce.len() {
      return Err(Error::auth("scram: server nonce does not extend the client nonce"));
    }

    let salted_password = pbkdf2_hmac_sha256(&self.password, &salt, iterations);

    let channel_binding = base64::encode(GS2_HEADER.as_bytes());
    let client_final_without_proof = format!("c={channel_binding},r={server_nonce}");
    let auth_message = format!("{},{},{}", self.client_first_bare, server_first, client_final_without_proof);

    let client_key = hmac_sha256(&salted_password, b"Client Key");
    let stored_key = Sha256::default();
    let stored_key = {
      use sha2::Digest;
      let mut h = stored_key;
      h.update(client_key);
      h.finalize_fixed()
    };
    let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());

    let mut client_proof = client_key;
    for (p, s) in client_proof.iter_mut().zip(client_signature) {
      *p ^= s;
    }

    self.state = State::ClientFinalSent {
      salted_password,
      auth_message,
    };

    Ok(format!("{client_final_without_proof},p={}", base64::encode(client_proof)))
  }

  /// Verifies the server-final message (`v=...`) against the independently
  /// recomputed `ServerSignature`. Rejects `e=...` (server-reported error)
  /// outright.
  pub fn verify_server_final(&mut self, server_final: &str) -> Result<()> {
    let (salted_password, auth_message) = match &self.state {
      State::ClientFinalSent {
        salted_password,
        auth_message,
      } => (*salted_password, auth_message.clone()),
      _ => return Err(Error::auth("scram: verify_server_final called out of order")),
    };

    if let Some(err) = server_final.strip_prefix("e=") {
      return Err(Error::auth(format!("scram: server reported error: {err}")));
    }
    let verifier = server_final
      .strip_prefix("v=")
      .ok_or_else(|| Error::auth("scram: server-final message has unexpected format"))
      .and_then(|v| base64::decode(v).map_err(|e| Error::auth(format!("scram: invalid verifier base64: {e}"))))?;

    let server_key = hmac_sha256(&salted_password, b"Server Key");
    let mac = Hmac::<Sha256>::new_from_slice(&server_key).expect("hmac accepts any key length");
    mac
      .chain_update(auth_message.as_bytes())
      .verify_slice(&verifier)
      .map_err(|_| Error::auth("scram: server signature verification failed"))?;

    self.state = State::Done;
    Ok(())
  }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
  let mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
  mac.chain_update(data).finalize().into_bytes().into()
}

/// `Hi()` from RFC 5802: PBKDF2-HMAC-SHA256 with a 32-byte output,
/// implemented as iterative HMAC chaining with an XOR accumulator rather
/// than pulling in a PBKDF2 crate.
fn pbkdf2_hmac_sha256(password: &[u8], salt: &[u8], iterations: usize) -> [u8; 32] {
  let mut prev: [u8; 32] = Hmac::<Sha256>::new_from_slice(password)
    .expect("hmac accepts any key length")
    .chain_update(salt)
    .chain_update([0, 0, 0, 1])
    .finalize()
    .into_bytes()
    .into();
  let mut acc = prev;

  for _ in 1..iterations.max(1) {
    prev = Hmac::<Sha256>::new_from_slice(password)
      .expect("hmac accepts any key length")
      .chain_update(prev)
      .finalize()
      .into_bytes()
      .into();
    for (a, p) in acc.iter_mut().zip(prev) {
      *a ^= p;
    }
  }

  acc
}

/// SASLprep (RFC 4013) normalization, tolerating failure by falling back to
/// the raw password bytes — PostgreSQL itself does this, and clients must
/// match it for interop.
pub fn normalize_password(password: &str) -> Vec<u8> {
  match stringprep::saslprep(password) {
    Ok(normalized) => normalized.into_owned().into_bytes(),
    Err(_) => password.as_bytes().to_vec(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn full_exchange_against_known_vectors() {
    // RFC 5802 §5 worked example, password "pencil".
    let mut client = ScramClient::new("pencil");
    client.client_nonce = "fyko+d2lbbFgONRv9qkxdawL".to_string();
    let first = client.client_first();
    assert_eq!(first, "n,,n=,r=fyko+d2lbbFgONRv9qkxdawL");

    let server_first = "r=fyko+d2lbbFgONRv9qkxdawLHo+Vgk7qvUOKUwuWLIWg4l/9SraGMHEE,s=rQ9ZY3MntBeuP3E1TDVC4w==,i=4096";
    let final_msg = client.client_final(server_first).unwrap();
    assert!(final_msg.starts_with("c=biws,r=fyko+d2lbbFgONRv9qkxdawLHo+Vgk7qvUOKUwuWLIWg4l/9SraGMHEE,p="));
  }

  #[test]
  fn rejects_short_server_nonce() {
    let mut client = ScramClient::new("pencil");
    client.client_first();
    let err = client.client_final("r=short,s=rQ9ZY3MntBeuP3E1TDVC4w==,i=4096").unwrap_err();
    assert!(err.to_string().contains("nonce"));
  }

  #[test]
  fn sasl_prep_falls_back_on_invalid_input() {
    // A lone surrogate-ish control character SASLprep would normally
    // reject; the crate must still produce usable bytes rather than fail
    // the connection outright.
    let bytes = normalize_password("se%r-*tp\u{3a3}\u{3b2}");
    assert!(!bytes.is_empty());
  }
}
