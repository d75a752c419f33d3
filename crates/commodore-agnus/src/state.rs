//! Snapshots of the chipset core.
//!
//! The host is not part of a snapshot; memory and the external chips
//! persist their own state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agnus::Agnus;
use crate::blitter::Blitter;
use crate::chipset::Chipset;
use crate::copper::Copper;
use crate::host::Host;

/// Snapshot layout version.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0} (expected {STATE_VERSION})")]
    Version(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipsetState {
    pub version: u32,
    pub agnus: Agnus,
    pub copper: Copper,
    pub blitter: Blitter,
    pub phase: u8,
}

impl ChipsetState {
    /// Encodes the snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Json`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a snapshot produced by [`Self::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] for malformed input or a foreign version.
    pub fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        let state: Self = serde_json::from_slice(bytes)?;
        if state.version != STATE_VERSION {
            return Err(StateError::Version(state.version));
        }
        Ok(state)
    }
}

impl<H: Host> Chipset<H> {
    #[must_use]
    pub fn save_state(&self) -> ChipsetState {
        ChipsetState {
            version: STATE_VERSION,
            agnus: self.agnus.clone(),
            copper: self.copper.clone(),
            blitter: self.blitter.clone(),
            phase: self.phase(),
        }
    }

    /// Restores a snapshot. The host is left untouched.
    pub fn load_state(&mut self, state: ChipsetState) {
        self.agnus = state.agnus;
        self.copper = state.copper;
        self.blitter = state.blitter;
        self.set_phase(state.phase);
        self.agnus.events.refresh_next_trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChipsetConfig;
    use crate::host::ChipRam;

    #[test]
    fn decode_rejects_other_versions() {
        let cs = Chipset::new(ChipsetConfig::a500(), ChipRam::new(0x1000));
        let mut state = cs.save_state();
        state.version = 99;
        let bytes = state.encode().unwrap();
        assert!(matches!(ChipsetState::decode(&bytes), Err(StateError::Version(99))));
    }

    #[test]
    fn decode_reports_malformed_input() {
        assert!(matches!(ChipsetState::decode(b"{"), Err(StateError::Json(_))));
    }

    #[test]
    fn encode_decode_preserves_the_state() {
        let mut cs = Chipset::new(ChipsetConfig::a500_plus(), ChipRam::new(0x1000));
        cs.run_until(12_345 * 8);
        let state = cs.save_state();
        let bytes = state.encode().unwrap();
        assert_eq!(ChipsetState::decode(&bytes).unwrap(), state);
    }
}
