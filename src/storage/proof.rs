use anyhow::{Result, bail};
use sha2::{Digest, Sha256};

use crate::{
    collaborators::ProofBuilder,
    types::{BlockHeight, ContractId, FileContract, Hash256, StorageProof},
};

pub const SEGMENT_SIZE: usize = 64;

/// Attaches one segment of the file and its digest chain to a proof.
///
/// The segment is picked deterministically from the contract id and the
/// height at which the proof is built.
#[derive(Clone, Debug, Default)]
pub struct DigestProofBuilder;

fn segment_index(id: &ContractId, height: BlockHeight, segments: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id.0.0);
    hasher.update(b"storage_proof_segment");
    hasher.update(height.to_le_bytes());
    let seed: [u8; 32] = hasher.finalize().into();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&seed[..8]);
    u64::from_le_bytes(bytes) % segments
}

impl ProofBuilder for DigestProofBuilder {
    fn build(
        &self,
        id: &ContractId,
        contract: &FileContract,
        height: BlockHeight,
        data: &[u8],
    ) -> Result<StorageProof> {
        if data.len() as u64 != contract.file_size {
            bail!(
                "Stored data for {} is {} bytes, contract commits to {}",
                id,
                data.len(),
                contract.file_size
            );
        }
        let segments = data.len().div_ceil(SEGMENT_SIZE).max(1) as u64;
        let index = segment_index(id, height, segments);
        let start = (index as usize * SEGMENT_SIZE).min(data.len());
        let end = (start + SEGMENT_SIZE).min(data.len());
        Ok(StorageProof {
            parent_id: *id,
            segment_index: index,
            segment: data[start..end].to_vec(),
            hash_set: vec![Hash256::digest(data), contract.file_merkle_root],
        })
    }
}
