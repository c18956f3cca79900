//! Checkpoint files: the complete engine state, generator included, so that a
//! restored run continues exactly where the saved one stopped.
//!
//! Layout: `MAGIC`, format version (u32 LE), SHA-256 of the payload, then
//! the bincode payload (nodes, contact matrix, pending events, clock, offset,
//! generator).

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{SimError, SimResult};
use crate::simulation::Simulation;

pub const MAGIC: &[u8; 8] = b"NUCOVIDK";
pub const FORMAT_VERSION: u32 = 1;

const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + 4 + DIGEST_LEN;

impl Simulation {
    pub fn to_bytes(&self) -> SimResult<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let digest: [u8; DIGEST_LEN] = Sha256::digest(&payload).into();

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&digest);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> SimResult<Simulation> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(SimError::CheckpointMagic);
        }
        let (version, rest) = bytes[MAGIC.len()..].split_at(4);
        let version = u32::from_le_bytes([version[0], version[1], version[2], version[3]]);
        if version != FORMAT_VERSION {
            return Err(SimError::CheckpointVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        let (stored, payload) = rest.split_at(DIGEST_LEN);
        let actual = Sha256::digest(payload);
        if actual.as_slice() != stored {
            return Err(SimError::CheckpointDigest {
                found: hex::encode(actual),
                expected: hex::encode(stored),
            });
        }

        let sim: Simulation = bincode::deserialize(payload)?;
        sim.check_integrity()
            .map_err(SimError::CheckpointInconsistent)?;
        Ok(sim)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        fs::write(path, &bytes).map_err(|source| SimError::CheckpointIo {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            now = self.now(),
            offset = self.offset(),
            pending = self.pending(),
            digest = %hex::encode(&bytes[MAGIC.len() + 4..HEADER_LEN]),
            "saved checkpoint"
        );
        Ok(())
    }

    pub fn restore(path: impl AsRef<Path>) -> SimResult<Simulation> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| SimError::CheckpointIo {
            path: path.to_path_buf(),
            source,
        })?;
        let sim = Simulation::from_bytes(&bytes)?;
        info!(
            path = %path.display(),
            now = sim.now(),
            offset = sim.offset(),
            pending = sim.pending(),
            "restored checkpoint"
        );
        Ok(sim)
    }
}
