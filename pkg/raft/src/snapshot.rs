/// A point-in-time compaction of state-machine state (Section 3). Produced
/// by the owning process's `takeSnapshot() -> bytes` collaborator and
/// installed wholesale by `LogManager::install_snapshot`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub state: Vec<u8>,
}

impl Snapshot {
    /// `state` round-trips through the owning process's codec unmodified;
    /// this crate treats it as an opaque byte string. Length-prefixed so a
    /// snapshot can be concatenated with other framing without ambiguity.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.state.len());
        out.extend_from_slice(&self.last_included_index.to_le_bytes());
        out.extend_from_slice(&self.last_included_term.to_le_bytes());
        out.extend_from_slice(&self.state);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 16 {
            return None;
        }
        let last_included_index = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let last_included_term = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let state = bytes[16..].to_vec();
        Some(Self {
            last_included_index,
            last_included_term,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_codec_round_trips() {
        let snap = Snapshot {
            last_included_index: 200,
            last_included_term: 5,
            state: b"state machine bytes".to_vec(),
        };

        let bytes = snap.serialize();
        let decoded = Snapshot::deserialize(&bytes).unwrap();
        assert_eq!(snap, decoded);
    }
}
