//! Crash-recovery scenarios: nodes restart from their WALs and converge.

mod common;

use common::{fast_timing, wait_until, Recorder, TestNet};
use mosaic_commit::transport::memory::MemoryNetwork;
use mosaic_commit::transport::MessageHandler;
use mosaic_commit::{
    AutoApprove, Coordinator, CoordinatorConfig, Participant, ParticipantConfig, COORDINATOR_ADDR,
};
use mosaic_core::wal::{Wal, WalRecord};
use mosaic_core::{Message, TxnId};
use std::sync::Arc;
use tempfile::TempDir;

/// Seed a working directory with WAL records, releasing the file lock when
/// done so the recovering node can take it.
fn seed_wal(dir: &TempDir, records: &[WalRecord]) {
    let wal = Wal::open(dir.path()).expect("seed wal");
    for record in records {
        wal.append_durable(record).expect("seed append");
    }
}

/// Coordinator crashed between logging the commit decision and the outcome
/// broadcast: restart must republish the destination from the blob, resend
/// the commit outcome and finish collecting acks.
#[tokio::test(flavor = "multi_thread")]
async fn coordinator_resumes_committed_transaction() {
    let network = MemoryNetwork::new();

    // Participant A crashed after voting yes; its staged state is durable.
    let a_dir = TempDir::new().expect("a dir");
    seed_wal(
        &a_dir,
        &[WalRecord::Staged {
            txn: TxnId::new(1),
            files: vec!["a.png".to_string()],
        }],
    );
    std::fs::write(a_dir.path().join("a.png"), [8, 8]).expect("seed a.png");

    let a_config = ParticipantConfig::builder()
        .id("A")
        .data_dir(a_dir.path())
        .build()
        .expect("config");
    let participant = Participant::new(a_config, network.endpoint("A"), Arc::new(AutoApprove))
        .expect("participant");
    network.register("A", participant.clone());
    participant.recover().expect("participant recovery");
    assert_eq!(participant.locked_paths(), vec!["a.png"]);

    // The coordinator's WAL holds the committed decision and the blob.
    let coord_dir = TempDir::new().expect("coord dir");
    {
        let wal = Wal::open(coord_dir.path()).expect("seed wal");
        wal.append_durable(&WalRecord::Participants {
            txn: TxnId::new(1),
            participants: vec!["A".to_string()],
        })
        .expect("append");
        let blob = wal.write_blob(TxnId::new(1), &[1, 2, 3, 4]).expect("blob");
        wal.append_durable(&WalRecord::Decision {
            txn: TxnId::new(1),
            commit: true,
            filename: "out.png".to_string(),
            blob,
        })
        .expect("append");
    }

    let config = CoordinatorConfig::builder()
        .data_dir(coord_dir.path())
        .timing(fast_timing())
        .build()
        .expect("config");
    let coordinator =
        Coordinator::new(config, network.endpoint(COORDINATOR_ADDR)).expect("coordinator");
    network.register(COORDINATOR_ADDR, coordinator.clone());
    coordinator.recover().expect("coordinator recovery");

    wait_until("recovered commit to finish", 10_000, || {
        coordinator.pending_transactions() == 0
    })
    .await;

    // Destination restored from the blob, source consumed, log closed.
    assert_eq!(
        std::fs::read(coord_dir.path().join("out.png")).expect("destination"),
        [1, 2, 3, 4]
    );
    wait_until("source file to be consumed", 5_000, || {
        !a_dir.path().join("a.png").exists()
    })
    .await;
    assert!(participant.locked_paths().is_empty());

    let wal = mosaic_core::wal::WalReader::new(coord_dir.path())
        .read_all()
        .expect("wal");
    assert!(matches!(
        wal.last(),
        Some(WalRecord::Completed { txn }) if *txn == TxnId::new(1)
    ));

    // Fresh transaction ids start above everything in the log.
    coordinator.start_commit("out2.png", vec![5], &[]);
    wait_until("fresh transaction to finish", 5_000, || {
        coordinator.pending_transactions() == 0
    })
    .await;
    let wal = mosaic_core::wal::WalReader::new(coord_dir.path())
        .read_all()
        .expect("wal");
    assert!(wal.iter().any(|r| matches!(
        r,
        WalRecord::Participants { txn, .. } if *txn == TxnId::new(2)
    )));
}

/// Coordinator crashed before deciding: restart re-announces abort so the
/// staged participant releases its locks, and collects no acks.
#[tokio::test(flavor = "multi_thread")]
async fn coordinator_reannounces_abort_for_undecided_transaction() {
    let network = MemoryNetwork::new();

    let a_dir = TempDir::new().expect("a dir");
    seed_wal(
        &a_dir,
        &[WalRecord::Staged {
            txn: TxnId::new(1),
            files: vec!["a.png".to_string()],
        }],
    );
    std::fs::write(a_dir.path().join("a.png"), [4]).expect("seed a.png");

    let a_config = ParticipantConfig::builder()
        .id("A")
        .data_dir(a_dir.path())
        .build()
        .expect("config");
    let participant = Participant::new(a_config, network.endpoint("A"), Arc::new(AutoApprove))
        .expect("participant");
    network.register("A", participant.clone());
    participant.recover().expect("participant recovery");

    let coord_dir = TempDir::new().expect("coord dir");
    seed_wal(
        &coord_dir,
        &[WalRecord::Participants {
            txn: TxnId::new(1),
            participants: vec!["A".to_string()],
        }],
    );

    let config = CoordinatorConfig::builder()
        .data_dir(coord_dir.path())
        .timing(fast_timing())
        .build()
        .expect("config");
    let coordinator =
        Coordinator::new(config, network.endpoint(COORDINATOR_ADDR)).expect("coordinator");
    network.register(COORDINATOR_ADDR, coordinator.clone());
    coordinator.recover().expect("coordinator recovery");

    wait_until("abort to release the locks", 5_000, || {
        participant.locked_paths().is_empty()
    })
    .await;

    // Abort never creates the destination and never deletes sources.
    assert!(!coord_dir.path().join("out.png").exists());
    assert!(a_dir.path().join("a.png").exists());
    assert_eq!(participant.staged_transactions(), 0);

    // The abort path owes no acks and parks nothing in flight.
    assert_eq!(coordinator.pending_transactions(), 0);
}

/// Participant crashed between its yes vote and the outcome: restart must
/// re-lock the files, re-send the vote, and still apply the commit.
#[tokio::test(flavor = "multi_thread")]
async fn participant_resumes_staged_transaction() {
    let network = MemoryNetwork::new();
    let recorder = Recorder::new();
    network.register(COORDINATOR_ADDR, recorder.clone());

    let dir = TempDir::new().expect("tempdir");
    seed_wal(
        &dir,
        &[WalRecord::Staged {
            txn: TxnId::new(7),
            files: vec!["a.png".to_string()],
        }],
    );
    std::fs::write(dir.path().join("a.png"), [1, 1]).expect("seed a.png");

    let config = ParticipantConfig::builder()
        .id("A")
        .data_dir(dir.path())
        .build()
        .expect("config");
    let participant = Participant::new(config, network.endpoint("A"), Arc::new(AutoApprove))
        .expect("participant");
    network.register("A", participant.clone());
    participant.recover().expect("recovery");

    assert_eq!(participant.locked_paths(), vec!["a.png"]);
    wait_until("yes vote to be re-sent", 2_000, || {
        recorder.count_matching(|m| {
            matches!(m, Message::VoteResponse { txn, granted: true } if *txn == TxnId::new(7))
        }) == 1
    })
    .await;

    // The retransmitted commit outcome still deletes the file.
    let outcome = Message::VoteOutcome {
        txn: TxnId::new(7),
        commit: true,
    }
    .encode()
    .expect("encode");
    participant.on_message(COORDINATOR_ADDR, &outcome);

    assert!(!dir.path().join("a.png").exists());
    assert!(participant.locked_paths().is_empty());
    wait_until("ack to be sent", 2_000, || {
        recorder.count_matching(|m| matches!(m, Message::VoteAck { .. })) == 1
    })
    .await;

    let wal = mosaic_core::wal::WalReader::new(dir.path())
        .read_all()
        .expect("wal");
    assert_eq!(
        wal,
        vec![
            WalRecord::Staged {
                txn: TxnId::new(7),
                files: vec!["a.png".to_string()],
            },
            WalRecord::Applied { txn: TxnId::new(7) },
        ]
    );
}

/// Running recovery twice without intervening traffic reconstructs the same
/// state both times.
#[tokio::test(flavor = "multi_thread")]
async fn participant_recovery_is_idempotent_over_restarts() {
    let network = MemoryNetwork::new();
    network.register(COORDINATOR_ADDR, Recorder::new());

    let dir = TempDir::new().expect("tempdir");
    seed_wal(
        &dir,
        &[
            WalRecord::Staged {
                txn: TxnId::new(1),
                files: vec!["a.png".to_string()],
            },
            WalRecord::Applied { txn: TxnId::new(1) },
            WalRecord::Staged {
                txn: TxnId::new(2),
                files: vec!["b.png".to_string()],
            },
        ],
    );

    let config = ParticipantConfig::builder()
        .id("A")
        .data_dir(dir.path())
        .build()
        .expect("config");
    let participant = Participant::new(config, network.endpoint("A"), Arc::new(AutoApprove))
        .expect("participant");
    participant.recover().expect("first recovery");

    let locked = participant.locked_paths();
    let staged = participant.staged_transactions();
    assert_eq!(locked, vec!["b.png"]);

    participant.recover().expect("second recovery");
    assert_eq!(participant.locked_paths(), locked);
    assert_eq!(participant.staged_transactions(), staged);
}

/// The in-memory TestNet survives a full happy path too; regression guard
/// for the harness used across this suite.
#[tokio::test(flavor = "multi_thread")]
async fn two_participant_commit_consumes_all_sources() {
    let net = TestNet::new(&["A", "B"]);
    net.seed_file("A", "a.png", &[1]);
    net.seed_file("B", "b.png", &[2]);

    net.coordinator.start_commit(
        "collage.png",
        vec![1, 2, 3],
        &["A:a.png".to_string(), "B:b.png".to_string()],
    );

    wait_until("two-party commit to finish", 5_000, || {
        net.coordinator.pending_transactions() == 0
    })
    .await;

    assert_eq!(
        std::fs::read(net.coordinator_dir.path().join("collage.png")).expect("destination"),
        [1, 2, 3]
    );
    assert!(!net.participant_dir("A").join("a.png").exists());
    assert!(!net.participant_dir("B").join("b.png").exists());
    assert!(net.participant("A").locked_paths().is_empty());
    assert!(net.participant("B").locked_paths().is_empty());
}
