use std::io::Write;
use std::time::Duration;

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use log::debug;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair};

use crate::error::{Error, ErrorCode, Result, fmt_error, socket_error};
use crate::net::Socket;

const CHALLENGE_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Signs the server's authentication challenge.
pub trait ChallengeSigner: Send + Sync {
    fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// ECDSA P-256 / SHA-256 signer.
pub struct EcdsaSigner {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl EcdsaSigner {
    /// Builds a signer from the base64url private scalar `d` and public
    /// point coordinates `x` and `y`.
    pub fn from_tokens(private_key: &str, public_x: &str, public_y: &str) -> Result<Self> {
        let private_key = b64_decode("private authentication key", private_key)?;
        let public_key = encode_public_key(public_x, public_y)?;
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_private_key_and_public_key(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &private_key,
            &public_key,
            &rng,
        )
        .map_err(|rejected| fmt_error!(AuthError, "Bad private key: {rejected}"))?;
        Ok(Self { key_pair, rng })
    }

    /// Builds a signer from a PKCS#8 v1 or v2 document.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
            .map_err(|rejected| fmt_error!(AuthError, "Bad private key: {rejected}"))?;
        Ok(Self { key_pair, rng })
    }
}

impl ChallengeSigner for EcdsaSigner {
    fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .key_pair
            .sign(&self.rng, challenge)
            .map_err(|err| fmt_error!(AuthError, "Failed to sign challenge: {err}"))?;
        Ok(signature.as_ref().to_vec())
    }
}

/// Accepts base64url or standard base64, padded or not.
fn b64_decode(descr: &str, value: &str) -> Result<Vec<u8>> {
    let normalized: String = value
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    Base64UrlUnpadded::decode_vec(&normalized)
        .map_err(|err| fmt_error!(AuthError, "Could not decode {descr}: {err}"))
}

/// SEC 1 uncompressed point: `0x04 || x || y`, coordinates left-padded to
/// 32 bytes.
fn encode_public_key(public_x: &str, public_y: &str) -> Result<Vec<u8>> {
    let x = b64_decode("public key x", public_x)?;
    let y = b64_decode("public key y", public_y)?;
    if x.len() > 32 || y.len() > 32 {
        return Err(Error::new(
            ErrorCode::AuthError,
            "public key coordinates must be at most 32 bytes",
        ));
    }
    let mut encoded = vec![0u8; 65];
    encoded[0] = 4;
    encoded[33 - x.len()..33].copy_from_slice(&x);
    encoded[65 - y.len()..].copy_from_slice(&y);
    Ok(encoded)
}

/// Runs the challenge-response handshake on a freshly connected socket.
pub(crate) fn authenticate(
    socket: &mut Socket,
    key_id: &str,
    signer: &dyn ChallengeSigner,
    max_challenge_len: usize,
) -> Result<()> {
    if key_id.contains('\n') {
        return Err(fmt_error!(
            AuthError,
            "Bad key id {key_id:?}: Should not contain new-line char."
        ));
    }

    socket
        .write_all(format!("{key_id}\n").as_bytes())
        .map_err(|err| socket_error("Failed to send key_id", err))?;

    socket
        .set_read_timeout(Some(CHALLENGE_READ_TIMEOUT))
        .map_err(|err| socket_error("Failed to set read timeout", err))?;
    let challenge = read_challenge(socket, max_challenge_len);
    socket
        .set_read_timeout(None)
        .map_err(|err| socket_error("Failed to clear read timeout", err))?;
    let challenge = challenge?;

    let signature = signer.sign(&challenge)?;
    let mut encoded = Base64::encode_string(&signature);
    encoded.push('\n');
    socket
        .write_all(encoded.as_bytes())
        .map_err(|err| socket_error("Could not send signed challenge", err))?;
    debug!("sent signed challenge for key id {key_id}");
    Ok(())
}

fn read_challenge(socket: &mut Socket, max_len: usize) -> Result<Vec<u8>> {
    let mut challenge = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = socket.recv(&mut chunk).map_err(|err| {
            socket_error("Failed to read authentication challenge (timed out?)", err)
        })?;
        if n == 0 {
            return Err(if challenge.is_empty() {
                Error::new(
                    ErrorCode::AuthError,
                    "Did not receive auth challenge. \
                     Is the database configured to require authentication?",
                )
            } else {
                fmt_error!(AuthError, "Received incomplete auth challenge: {challenge:?}")
            });
        }
        let newline = chunk[..n].iter().position(|&b| b == b'\n');
        let take = newline.unwrap_or(n);
        if challenge.len() + take > max_len {
            return Err(fmt_error!(
                AuthError,
                "challenge did not fit into buffer [max={max_len}]"
            ));
        }
        challenge.extend_from_slice(&chunk[..take]);
        if newline.is_some() {
            return Ok(challenge);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use ring::rand::SystemRandom;
    use ring::signature::{ECDSA_P256_SHA256_FIXED, EcdsaKeyPair, KeyPair, UnparsedPublicKey};

    use super::*;
    use crate::net::SocketOptions;

    fn test_key() -> (Vec<u8>, Vec<u8>) {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng).unwrap();
        (pkcs8.as_ref().to_vec(), key_pair.public_key().as_ref().to_vec())
    }

    #[test]
    fn signature_verifies_against_public_key() {
        let (pkcs8, public_key) = test_key();
        let signer = EcdsaSigner::from_pkcs8(&pkcs8).unwrap();
        let signature = signer.sign(b"challenge").unwrap();
        assert_eq!(signature.len(), 64);
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &public_key)
            .verify(b"challenge", &signature)
            .unwrap();
    }

    #[test]
    fn rejects_bad_tokens() {
        let err = EcdsaSigner::from_tokens("!!!", "AAAA", "AAAA").err().unwrap();
        assert_eq!(err.code(), ErrorCode::AuthError);
        assert!(err.msg().starts_with("Could not decode private authentication key"));

        let long = Base64UrlUnpadded::encode_string(&[1u8; 33]);
        let err = EcdsaSigner::from_tokens("AAAA", &long, "AAAA").err().unwrap();
        assert_eq!(err.code(), ErrorCode::AuthError);

        let err = EcdsaSigner::from_tokens("AAAA", "AAAA", "AAAA").err().unwrap();
        assert!(err.msg().starts_with("Bad private key"));
    }

    #[test]
    fn public_key_is_left_padded() {
        let x = Base64UrlUnpadded::encode_string(&[7u8; 31]);
        let y = Base64UrlUnpadded::encode_string(&[9u8; 32]);
        let encoded = encode_public_key(&x, &y).unwrap();
        assert_eq!(encoded.len(), 65);
        assert_eq!(encoded[0], 4);
        assert_eq!(encoded[1], 0);
        assert_eq!(&encoded[2..33], &[7u8; 31]);
        assert_eq!(&encoded[33..], &[9u8; 32]);
    }

    #[test]
    fn decodes_standard_and_url_alphabets() {
        assert_eq!(b64_decode("k", "+/8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(b64_decode("k", "-_8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn handshake_sends_key_id_and_verifiable_signature() {
        let (pkcs8, public_key) = test_key();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (conn, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(conn.try_clone().unwrap());
            let mut key_id = String::new();
            reader.read_line(&mut key_id).unwrap();
            (&conn).write_all(b"abcdefgh\n").unwrap();
            let mut signature = String::new();
            reader.read_line(&mut signature).unwrap();
            (key_id, signature)
        });

        let mut socket = Socket::connect(addr, &SocketOptions::default()).unwrap();
        let signer = EcdsaSigner::from_pkcs8(&pkcs8).unwrap();
        authenticate(&mut socket, "testUser1", &signer, 1024).unwrap();

        let (key_id, signature) = server.join().unwrap();
        assert_eq!(key_id, "testUser1\n");
        let signature = Base64::decode_vec(signature.trim_end()).unwrap();
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &public_key)
            .verify(b"abcdefgh", &signature)
            .unwrap();
    }

    #[test]
    fn oversized_challenge_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 10];
            let _ = conn.read(&mut buf);
            let _ = conn.write_all(&[b'a'; 100]);
            let _ = conn.write_all(b"\n");
        });

        let (pkcs8, _) = test_key();
        let signer = EcdsaSigner::from_pkcs8(&pkcs8).unwrap();
        let mut socket = Socket::connect(addr, &SocketOptions::default()).unwrap();
        let err = authenticate(&mut socket, "user", &signer, 16).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthError);
        assert!(err.msg().contains("challenge did not fit into buffer"));
        server.join().unwrap();
    }

    #[test]
    fn missing_challenge_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 10];
            let _ = conn.read(&mut buf);
        });

        let (pkcs8, _) = test_key();
        let signer = EcdsaSigner::from_pkcs8(&pkcs8).unwrap();
        let mut socket = Socket::connect(addr, &SocketOptions::default()).unwrap();
        let err = authenticate(&mut socket, "user", &signer, 16).unwrap_err();
        assert!(err.msg().starts_with("Did not receive auth challenge"), "{err}");
        server.join().unwrap();
    }

    #[test]
    fn key_id_with_newline_is_rejected() {
        let (pkcs8, _) = test_key();
        let signer = EcdsaSigner::from_pkcs8(&pkcs8).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut socket =
            Socket::connect(listener.local_addr().unwrap(), &SocketOptions::default()).unwrap();
        let err = authenticate(&mut socket, "a\nb", &signer, 16).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthError);
    }
}
