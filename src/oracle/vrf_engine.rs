//! Schnorrkel-backed verifiable randomness: each random word is the hash of
//! a signature over the request input, and the signature is its proof.

use crate::errors::OracleError;
use crate::raffle::types::RandomWord;
use schnorrkel::{ExpansionMode, Keypair, MiniSecretKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const VRF_SIGNING_CONTEXT: &[u8] = b"raffle-vrf";

/// Random word together with the proof it was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfProof {
    /// SHA-256 of the proof, hex
    pub output: String,
    /// Schnorrkel signature over `input_message`, hex
    pub proof: String,
    pub public_key: String,
    pub input_message: String,
}

impl VrfProof {
    pub fn word(&self) -> Result<RandomWord, OracleError> {
        self.output
            .parse()
            .map_err(|e| OracleError::VrfFailure(format!("invalid VRF output: {}", e)))
    }
}

/// Signs request inputs and derives random words from the signatures
#[derive(Clone)]
pub struct VrfEngine {
    keypair: Arc<Keypair>,
}

impl VrfEngine {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Engine with a random keypair
    pub fn new_random() -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng))
    }

    /// Engine with a keypair expanded from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, OracleError> {
        let mini = MiniSecretKey::from_bytes(seed)
            .map_err(|e| OracleError::VrfFailure(format!("invalid seed: {:?}", e)))?;
        Ok(Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519)))
    }

    /// Input message for word `index` of a request
    pub fn input_message(
        request_id: u64,
        subscription_id: u64,
        key_hash: &[u8; 32],
        index: u32,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            request_id,
            subscription_id,
            hex::encode(key_hash),
            index
        )
    }

    /// Produce one word and its proof for `input_message`
    pub fn prove(&self, input_message: &str) -> VrfProof {
        // Create signing context
        let ctx = schnorrkel::signing_context(VRF_SIGNING_CONTEXT);

        // Sign the input; the word is derived from this signature
        let signature = self.keypair.sign(ctx.bytes(input_message.as_bytes()));
        let signature_bytes = signature.to_bytes();

        VrfProof {
            // Word is the hash of the signature
            output: hex::encode(Sha256::digest(signature_bytes)),
            // Proof is the signature itself
            proof: hex::encode(signature_bytes),
            public_key: self.public_key_hex(),
            input_message: input_message.to_string(),
        }
    }

    /// Produce `num_words` proofs for a request
    pub fn generate_words(
        &self,
        request_id: u64,
        subscription_id: u64,
        key_hash: &[u8; 32],
        num_words: u32,
    ) -> Vec<VrfProof> {
        (0..num_words)
            .map(|i| {
                self.prove(&Self::input_message(
                    request_id,
                    subscription_id,
                    key_hash,
                    i,
                ))
            })
            .collect()
    }

    /// Check that `proof` signs `expected_input` and that its output is
    /// derived from the signature
    pub fn verify(proof: &VrfProof, expected_input: &str) -> Result<bool, OracleError> {
        // Proof must be for the input we expect
        if proof.input_message != expected_input {
            return Ok(false);
        }

        // Decode components
        let output = hex::decode(&proof.output)
            .map_err(|e| OracleError::VrfFailure(format!("invalid output hex: {}", e)))?;
        let signature_bytes: [u8; 64] = hex::decode(&proof.proof)
            .map_err(|e| OracleError::VrfFailure(format!("invalid proof hex: {}", e)))?
            .try_into()
            .map_err(|_| OracleError::VrfFailure("proof must be 64 bytes".to_string()))?;
        let public_key_bytes: [u8; 32] = hex::decode(&proof.public_key)
            .map_err(|e| OracleError::VrfFailure(format!("invalid public key hex: {}", e)))?
            .try_into()
            .map_err(|_| OracleError::VrfFailure("public key must be 32 bytes".to_string()))?;

        // Parse public key and signature
        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| OracleError::VrfFailure(format!("invalid public key: {:?}", e)))?;
        let signature = Signature::from_bytes(&signature_bytes)
            .map_err(|e| OracleError::VrfFailure(format!("invalid signature: {:?}", e)))?;

        // Verify signature
        let ctx = schnorrkel::signing_context(VRF_SIGNING_CONTEXT);
        if public_key
            .verify(ctx.bytes(expected_input.as_bytes()), &signature)
            .is_err()
        {
            return Ok(false);
        }

        // Output must be the hash of the verified signature
        Ok(Sha256::digest(signature_bytes).as_slice() == output.as_slice())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_verifies() {
        let engine = VrfEngine::new_random();
        let input = VrfEngine::input_message(1, 7, &[3u8; 32], 0);
        let proof = engine.prove(&input);

        assert!(VrfEngine::verify(&proof, &input).unwrap());
        assert!(!VrfEngine::verify(&proof, "1:7:other:0").unwrap());
        assert_eq!(proof.word().unwrap().as_bytes().len(), 32);
    }

    #[test]
    fn test_tampered_output_rejected() {
        let engine = VrfEngine::from_seed(&[9u8; 32]).unwrap();
        let input = VrfEngine::input_message(2, 1, &[0u8; 32], 0);
        let mut proof = engine.prove(&input);
        proof.output = hex::encode([0xffu8; 32]);

        assert!(!VrfEngine::verify(&proof, &input).unwrap());
    }

    #[test]
    fn test_proof_from_other_key_rejected() {
        let engine = VrfEngine::from_seed(&[1u8; 32]).unwrap();
        let other = VrfEngine::from_seed(&[2u8; 32]).unwrap();
        let input = VrfEngine::input_message(3, 1, &[0u8; 32], 0);
        let mut proof = engine.prove(&input);
        proof.public_key = other.public_key_hex();

        assert!(!VrfEngine::verify(&proof, &input).unwrap());
    }

    #[test]
    fn test_generate_words_uses_distinct_inputs() {
        let engine = VrfEngine::new_random();
        let proofs = engine.generate_words(5, 1, &[4u8; 32], 3);
        assert_eq!(proofs.len(), 3);
        assert!(proofs[2].input_message.ends_with(":2"));
        assert_ne!(proofs[0].output, proofs[1].output);
    }
}
