//! Common test utilities for mosaic-commit integration tests.

#![allow(dead_code)]

use mosaic_commit::transport::memory::MemoryNetwork;
use mosaic_commit::transport::MessageHandler;
use mosaic_commit::{
    ApprovalHook, AutoApprove, Coordinator, CoordinatorConfig, Participant, ParticipantConfig,
    TimingConfig, COORDINATOR_ADDR,
};
use mosaic_core::wal::{WalReader, WalRecord};
use mosaic_core::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Short protocol deadlines so loss and timeout paths run in test time.
pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        vote_timeout_ms: 500,
        ack_timeout_ms: 200,
        max_outcome_rounds: 5,
    }
}

/// A coordinator and a set of participants wired over one in-memory network.
pub struct TestNet {
    pub network: Arc<MemoryNetwork>,
    pub coordinator: Arc<Coordinator>,
    pub coordinator_dir: TempDir,
    participants: HashMap<String, Arc<Participant>>,
    participant_dirs: HashMap<String, TempDir>,
}

impl TestNet {
    /// Build a net where every participant approves every request.
    pub fn new(ids: &[&str]) -> Self {
        let hooks = ids
            .iter()
            .map(|id| (*id, Arc::new(AutoApprove) as Arc<dyn ApprovalHook>))
            .collect();
        Self::with_hooks(hooks)
    }

    /// Build a net with a custom approval hook per participant.
    pub fn with_hooks(hooks: Vec<(&str, Arc<dyn ApprovalHook>)>) -> Self {
        let network = MemoryNetwork::new();

        let coordinator_dir = TempDir::new().expect("coordinator tempdir");
        let config = CoordinatorConfig::builder()
            .data_dir(coordinator_dir.path())
            .timing(fast_timing())
            .build()
            .expect("coordinator config");
        let coordinator = Coordinator::new(config, network.endpoint(COORDINATOR_ADDR))
            .expect("coordinator");
        network.register(COORDINATOR_ADDR, coordinator.clone());

        let mut participants = HashMap::new();
        let mut participant_dirs = HashMap::new();
        for (id, hook) in hooks {
            let dir = TempDir::new().expect("participant tempdir");
            let config = ParticipantConfig::builder()
                .id(id)
                .data_dir(dir.path())
                .build()
                .expect("participant config");
            let participant =
                Participant::new(config, network.endpoint(id), hook).expect("participant");
            network.register(id, participant.clone());
            participants.insert(id.to_string(), participant);
            participant_dirs.insert(id.to_string(), dir);
        }

        Self {
            network,
            coordinator,
            coordinator_dir,
            participants,
            participant_dirs,
        }
    }

    pub fn participant(&self, id: &str) -> &Arc<Participant> {
        &self.participants[id]
    }

    pub fn participant_dir(&self, id: &str) -> &Path {
        self.participant_dirs[id].path()
    }

    /// Create a guarded source file in a participant's working directory.
    pub fn seed_file(&self, id: &str, name: &str, bytes: &[u8]) {
        std::fs::write(self.participant_dir(id).join(name), bytes).expect("seed file");
    }

    pub fn coordinator_wal(&self) -> Vec<WalRecord> {
        WalReader::new(self.coordinator_dir.path())
            .read_all()
            .expect("coordinator wal")
    }

    pub fn participant_wal(&self, id: &str) -> Vec<WalRecord> {
        WalReader::new(self.participant_dir(id))
            .read_all()
            .expect("participant wal")
    }
}

/// Poll until `check` holds, panicking with `label` on timeout.
pub async fn wait_until(label: &str, timeout_ms: u64, check: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    while !check() {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for: {label}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Message sink that records everything it can decode, for driving a node
/// directly without a real peer.
#[derive(Default)]
pub struct Recorder {
    messages: Mutex<Vec<(String, Message)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, Message)> {
        self.messages.lock().clone()
    }

    pub fn count_matching(&self, predicate: impl Fn(&Message) -> bool) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(_, m)| predicate(m))
            .count()
    }
}

impl MessageHandler for Recorder {
    fn on_message(&self, src: &str, frame: &[u8]) -> bool {
        if let Ok(message) = Message::decode(frame) {
            self.messages.lock().push((src.to_string(), message));
        }
        true
    }
}
