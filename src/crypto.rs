use anyhow::Result;
use bitcoin::secp256k1::{
    All, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, rand::thread_rng,
    schnorr::Signature,
};

use crate::types::Hash256;

/// The host's signing identity.
#[derive(Clone)]
pub struct HostKey {
    secp: Secp256k1<All>,
    keypair: Keypair,
}

impl HostKey {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut thread_rng());
        Self { secp, keypair }
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&hex::decode(secret)?)?;
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        Ok(Self { secp, keypair })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    pub fn public_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    pub fn sign(&self, digest: &Hash256) -> Signature {
        self.secp
            .sign_schnorr_no_aux_rand(&Message::from_digest(digest.0), &self.keypair)
    }
}

impl std::fmt::Debug for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostKey({})", self.public_key())
    }
}

pub fn verify(key: &XOnlyPublicKey, digest: &Hash256, signature: &Signature) -> bool {
    Secp256k1::verification_only()
        .verify_schnorr(signature, &Message::from_digest(digest.0), key)
        .is_ok()
}
