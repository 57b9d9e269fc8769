use common::errors::*;
use file::{LocalPath, LocalPathBuf};

use crate::proto::NodeId;
use crate::snapshot::Snapshot;

/// Durable `(currentTerm, votedFor)` plus snapshot metadata (Section 6,
/// "Persisted state per member"). Each must be durable before any derived
/// RPC reply that depends on it is sent; this crate fulfills that by
/// `await`-ing the write before returning from `persist_hard_state`.
pub struct HardStateStore {
    dir: LocalPathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
}

impl HardStateStore {
    pub fn new(dir: &LocalPath) -> Self {
        Self { dir: dir.join("") }
    }

    fn hard_state_path(&self) -> LocalPathBuf {
        self.dir.join("hard_state")
    }

    fn snapshot_path(&self) -> LocalPathBuf {
        self.dir.join("snapshot")
    }

    pub async fn load_hard_state(&self) -> Result<Option<HardState>> {
        let path = self.hard_state_path();
        if !file::exists(&path).await? {
            return Ok(None);
        }

        let bytes = file::read(&path).await?;
        if bytes.len() < 9 {
            return Err(err_msg("hard state file truncated"));
        }

        let current_term = u64::from_le_bytes(bytes[0..8].try_into()?);
        let voted_for = if bytes[8] == 0 {
            None
        } else {
            Some(String::from_utf8(bytes[9..].to_vec())?)
        };

        Ok(Some(HardState {
            current_term,
            voted_for,
        }))
    }

    /// Persists `(currentTerm, votedFor)` before the caller sends any RPC
    /// reply that depended on this state change (Section 6).
    pub async fn persist_hard_state(&self, state: &HardState) -> Result<()> {
        let mut bytes = Vec::with_capacity(9);
        bytes.extend_from_slice(&state.current_term.to_le_bytes());
        match &state.voted_for {
            Some(id) => {
                bytes.push(1);
                bytes.extend_from_slice(id.as_bytes());
            }
            None => bytes.push(0),
        }

        file::write(&self.hard_state_path(), &bytes).await
    }

    pub async fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path();
        if !file::exists(&path).await? {
            return Ok(None);
        }

        let bytes = file::read(&path).await?;
        Ok(Snapshot::deserialize(&bytes))
    }

    pub async fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        file::write(&self.snapshot_path(), &snapshot.serialize()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use file::temp::TempDir;

    #[testcase]
    async fn hard_state_round_trips() -> Result<()> {
        let temp_dir = TempDir::create()?;
        let store = HardStateStore::new(temp_dir.path());

        assert_eq!(store.load_hard_state().await?, None);

        let state = HardState {
            current_term: 7,
            voted_for: Some("node-b".to_string()),
        };
        store.persist_hard_state(&state).await?;

        assert_eq!(store.load_hard_state().await?, Some(state));
        Ok(())
    }

    #[testcase]
    async fn snapshot_metadata_round_trips() -> Result<()> {
        let temp_dir = TempDir::create()?;
        let store = HardStateStore::new(temp_dir.path());

        let snapshot = Snapshot {
            last_included_index: 42,
            last_included_term: 3,
            state: b"frozen state".to_vec(),
        };
        store.persist_snapshot(&snapshot).await?;

        assert_eq!(store.load_snapshot().await?, Some(snapshot));
        Ok(())
    }
}
