//! Long-lived key material and the envelope/request crypto operations.
//!
//! Holds four keys loaded once at startup: the server box (X25519) keypair,
//! the server signing (ed25519) keypair derived from a seed, and the
//! broker's box and signing public keys. Immutable after construction —
//! there is no key rotation path.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use crypto_box::{
    aead::{Aead, AeadCore, OsRng},
    PublicKey, SalsaBox, SecretKey,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;

use crate::{
    canonical,
    error::BridgeError,
    wire::{BrokerEnvelope, Routing, PROTOCOL_VERSION},
};

/// Encrypted, signed body fields for an outbound send request.
#[derive(Debug, Clone)]
pub struct SealedBody {
    pub encrypted_body: String,
    pub nonce: String,
    pub signature: String,
}

pub struct CryptoContext {
    box_secret: SecretKey,
    signing: SigningKey,
    broker_box_public: PublicKey,
    broker_signing_public: VerifyingKey,
}

impl CryptoContext {
    pub fn new(
        box_secret: [u8; 32],
        signing_seed: [u8; 32],
        broker_box_public: [u8; 32],
        broker_signing_public: [u8; 32],
    ) -> Result<Self, BridgeError> {
        let broker_signing_public = VerifyingKey::from_bytes(&broker_signing_public)
            .map_err(|_| BridgeError::FatalConfig("invalid broker signing public key".into()))?;
        Ok(Self {
            box_secret: SecretKey::from(box_secret),
            signing: SigningKey::from_bytes(&signing_seed),
            broker_box_public: PublicKey::from(broker_box_public),
            broker_signing_public,
        })
    }

    /// The server's box public key (the one the broker seals inbound
    /// payloads to).
    pub fn box_public(&self) -> PublicKey {
        self.box_secret.public_key()
    }

    /// The server's signing public key (registered with the broker).
    pub fn signing_public(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Verify `broker_signature` over the canonical envelope encoding with
    /// the broker's signing public key. Any malformed field fails closed.
    pub fn verify_envelope(&self, envelope: &BrokerEnvelope) -> bool {
        let Ok(sig_bytes) = BASE64.decode(&envelope.broker_signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        let bytes = canonical::envelope_bytes(
            &envelope.workspace_id,
            envelope.broker_timestamp,
            &envelope.encrypted,
        );
        self.broker_signing_public.verify(&bytes, &signature).is_ok()
    }

    /// Open the anonymous-sender sealed box with the server's box keypair.
    pub fn decrypt_envelope(&self, envelope: &BrokerEnvelope) -> Result<Vec<u8>, BridgeError> {
        let ciphertext = BASE64
            .decode(&envelope.encrypted)
            .map_err(|_| BridgeError::Decrypt)?;
        self.box_secret
            .unseal(&ciphertext)
            .map_err(|_| BridgeError::Decrypt)
    }

    /// Sign an `inbox.pull` / `inbox.ack` request over the canonical
    /// protocol-request encoding. Returns the signature base64-encoded.
    pub fn sign_protocol_request(
        &self,
        action: &str,
        workspace_id: &str,
        timestamp: i64,
        params: &Value,
    ) -> String {
        let bytes = canonical::protocol_request_bytes(
            workspace_id,
            PROTOCOL_VERSION,
            action,
            timestamp,
            params,
        );
        BASE64.encode(self.signing.sign(&bytes).to_bytes())
    }

    /// Serialize and encrypt an action body to the broker's box public key
    /// with a fresh random nonce, then sign the canonical send encoding over
    /// ciphertext + nonce + routing.
    pub fn encrypt_and_sign(
        &self,
        action: &str,
        workspace_id: &str,
        timestamp: i64,
        body: &Value,
        routing: &Routing,
    ) -> Result<SealedBody, BridgeError> {
        let plaintext = serde_json::to_vec(body)?;
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let sbox = SalsaBox::new(&self.broker_box_public, &self.box_secret);
        let ciphertext = sbox
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| BridgeError::Encrypt)?;

        let encrypted_body = BASE64.encode(&ciphertext);
        let nonce_b64 = BASE64.encode(nonce);
        let routing_value = serde_json::to_value(routing)?;
        let bytes = canonical::send_request_bytes(
            workspace_id,
            action,
            timestamp,
            &encrypted_body,
            &nonce_b64,
            &routing_value,
        );
        Ok(SealedBody {
            encrypted_body,
            nonce: nonce_b64,
            signature: BASE64.encode(self.signing.sign(&bytes).to_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Broker-side keys, as the real broker would hold them.
    struct FakeBroker {
        box_secret: SecretKey,
        signing: SigningKey,
    }

    impl FakeBroker {
        fn generate() -> Self {
            Self {
                box_secret: SecretKey::generate(&mut OsRng),
                signing: SigningKey::generate(&mut OsRng),
            }
        }

        fn envelope_for(&self, ctx: &CryptoContext, message_id: &str, payload: &[u8]) -> BrokerEnvelope {
            let ciphertext = ctx.box_public().seal(&mut OsRng, payload).unwrap();
            let encrypted = BASE64.encode(ciphertext);
            let broker_timestamp = 1_700_000_000;
            let bytes = canonical::envelope_bytes("ws_test", broker_timestamp, &encrypted);
            BrokerEnvelope {
                message_id: message_id.into(),
                workspace_id: "ws_test".into(),
                encrypted,
                broker_timestamp,
                broker_signature: BASE64.encode(self.signing.sign(&bytes).to_bytes()),
            }
        }
    }

    fn server_context(broker: &FakeBroker) -> CryptoContext {
        let box_secret = SecretKey::generate(&mut OsRng);
        let signing = SigningKey::generate(&mut OsRng);
        CryptoContext::new(
            box_secret.to_bytes(),
            signing.to_bytes(),
            *broker.box_secret.public_key().as_bytes(),
            broker.signing.verifying_key().to_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn envelope_verify_and_decrypt_round_trip() {
        let broker = FakeBroker::generate();
        let ctx = server_context(&broker);
        let env = broker.envelope_for(&ctx, "m-1", b"{\"type\":\"event_callback\"}");

        assert!(ctx.verify_envelope(&env));
        let plaintext = ctx.decrypt_envelope(&env).unwrap();
        assert_eq!(plaintext, b"{\"type\":\"event_callback\"}");
    }

    #[test]
    fn envelope_signed_with_wrong_key_is_rejected() {
        let broker = FakeBroker::generate();
        let imposter = FakeBroker::generate();
        let ctx = server_context(&broker);
        let env = imposter.envelope_for(&ctx, "m-1", b"{}");

        assert!(!ctx.verify_envelope(&env));
    }

    #[test]
    fn tampered_envelope_field_is_rejected() {
        let broker = FakeBroker::generate();
        let ctx = server_context(&broker);
        let mut env = broker.envelope_for(&ctx, "m-1", b"{}");
        env.broker_timestamp += 1;

        assert!(!ctx.verify_envelope(&env));
    }

    #[test]
    fn ciphertext_sealed_to_other_key_fails_decrypt() {
        let broker = FakeBroker::generate();
        let ctx = server_context(&broker);
        let other = server_context(&broker);
        let env = broker.envelope_for(&other, "m-1", b"{}");

        // Signed correctly but sealed to a different box public key.
        assert!(ctx.verify_envelope(&env));
        assert!(matches!(ctx.decrypt_envelope(&env), Err(BridgeError::Decrypt)));
    }

    #[test]
    fn protocol_request_signature_round_trip() {
        let broker = FakeBroker::generate();
        let ctx = server_context(&broker);
        let params = json!({"max_messages": 20, "wait_seconds": 25});
        let sig_b64 = ctx.sign_protocol_request("inbox.pull", "ws_test", 1_700_000_000, &params);

        let bytes = canonical::protocol_request_bytes(
            "ws_test",
            PROTOCOL_VERSION,
            "inbox.pull",
            1_700_000_000,
            &params,
        );
        let sig = Signature::from_slice(&BASE64.decode(sig_b64).unwrap()).unwrap();
        assert!(ctx.signing_public().verify(&bytes, &sig).is_ok());

        // Any single field change must break verification.
        let altered = canonical::protocol_request_bytes(
            "ws_test",
            PROTOCOL_VERSION,
            "inbox.ack",
            1_700_000_000,
            &params,
        );
        assert!(ctx.signing_public().verify(&altered, &sig).is_err());
    }

    #[test]
    fn encrypt_and_sign_is_decryptable_by_broker_and_verifiable() {
        let broker = FakeBroker::generate();
        let ctx = server_context(&broker);
        let routing = Routing {
            channel: "C123".into(),
            thread_ts: Some("1700000000.000100".into()),
            timestamp: None,
        };
        let body = json!({"text": "hello"});
        let sealed = ctx
            .encrypt_and_sign("chat.postMessage", "ws_test", 1_700_000_001, &body, &routing)
            .unwrap();

        // Broker opens the authenticated box with its secret + our public.
        let sbox = SalsaBox::new(&ctx.box_public(), &broker.box_secret);
        let nonce_bytes = BASE64.decode(&sealed.nonce).unwrap();
        let nonce = crypto_box::Nonce::clone_from_slice(&nonce_bytes);
        let ciphertext = BASE64.decode(&sealed.encrypted_body).unwrap();
        let plaintext = sbox.decrypt(&nonce, ciphertext.as_slice()).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&plaintext).unwrap(), body);

        // Broker verifies the signature over ciphertext + nonce + routing.
        let routing_value = serde_json::to_value(&routing).unwrap();
        let bytes = canonical::send_request_bytes(
            "ws_test",
            "chat.postMessage",
            1_700_000_001,
            &sealed.encrypted_body,
            &sealed.nonce,
            &routing_value,
        );
        let sig = Signature::from_slice(&BASE64.decode(&sealed.signature).unwrap()).unwrap();
        assert!(ctx.signing_public().verify(&bytes, &sig).is_ok());
    }
}
