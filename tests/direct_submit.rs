//! Direct broadcast and confirmation behavior under network failures.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use launchpad_tx::blockchain::types::BlockhashContext;
use launchpad_tx::blockchain::wallet::ExternalWallet;
use launchpad_tx::error::{ErrorKind, PipelineError};
use launchpad_tx::pipeline::cosigner;
use launchpad_tx::pipeline::{
    ConfirmationWatcher, DirectSubmitter, Intent, SignedTransaction, SubmissionStatus,
    TransactionPreparer,
};
use launchpad_tx::blockchain::types::{Commitment, Pubkey};
use launchpad_tx::resilience::RetryPolicy;

mod common;
use common::{FakeProgram, FakeRpc};

async fn signed_buy(rpc: &Arc<FakeRpc>) -> SignedTransaction {
    let program = FakeProgram::new();
    let preparer = common::local_preparer(rpc, &program);
    let wallet = common::test_wallet();
    let credential = common::credential_for(&wallet);
    let intent = Intent::Buy { mint: Pubkey::new([5u8; 32]), lamports: 1_000_000, slippage_bps: 100 };
    let prepared = preparer.prepare(&intent, &credential).await.unwrap();
    cosigner::sign(&prepared, wallet.as_ref() as &dyn ExternalWallet).await.unwrap()
}

fn transport_error() -> PipelineError {
    PipelineError::Transport("connection reset by peer".into())
}

#[tokio::test]
async fn test_lost_response_is_not_resent() {
    let rpc = FakeRpc::new();
    let signed = signed_buy(&rpc).await;
    // The send reaches the network but the answer is lost.
    rpc.fail_next_send(transport_error(), true);

    let submitter = DirectSubmitter::new(rpc.clone(), common::test_retry());
    let receipt = submitter.broadcast_once(&signed).await.unwrap();

    assert_eq!(receipt.signature, signed.signature);
    assert_eq!(rpc.sends(), 1);
}

#[tokio::test]
async fn test_unseen_transaction_is_resent_identically() {
    let rpc = FakeRpc::new();
    let signed = signed_buy(&rpc).await;
    rpc.fail_next_send(transport_error(), false);

    let submitter = DirectSubmitter::new(rpc.clone(), common::test_retry());
    submitter.broadcast_once(&signed).await.unwrap();

    let sent = rpc.sent_bytes.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
    assert!(rpc.has_landed(&signed.signature));
}

#[tokio::test]
async fn test_duplicate_pending_id_broadcasts_once() {
    let rpc = FakeRpc::new();
    let signed = signed_buy(&rpc).await;
    let submitter = Arc::new(DirectSubmitter::new(rpc.clone(), common::test_retry()));

    let (a, b) = tokio::join!(submitter.broadcast_once(&signed), submitter.broadcast_once(&signed));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(rpc.sends(), 1);
    assert!(submitter.recorded(&signed.pending_id).await.is_some());
}

#[tokio::test]
async fn test_persistent_transport_failure_exhausts() {
    let rpc = FakeRpc::new();
    let signed = signed_buy(&rpc).await;
    for _ in 0..3 {
        rpc.fail_next_send(transport_error(), false);
    }

    let submitter = DirectSubmitter::new(rpc.clone(), common::test_retry());
    let err = submitter.broadcast_once(&signed).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
    assert_eq!(rpc.sends(), 3);

    // A later retry of the same id sends again only because nothing landed.
    submitter.broadcast_once(&signed).await.unwrap();
    assert_eq!(rpc.sends(), 4);
}

#[tokio::test]
async fn test_already_processed_is_not_retried() {
    let rpc = FakeRpc::new();
    let signed = signed_buy(&rpc).await;
    rpc.already_processed.store(true, Ordering::SeqCst);

    let submitter = DirectSubmitter::new(rpc.clone(), common::test_retry());
    let err = submitter.broadcast_once(&signed).await.unwrap_err();
    match err {
        PipelineError::AlreadyProcessedAmbiguous { signature, .. } => {
            assert_eq!(signature, Some(signed.signature.to_string()));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(rpc.sends(), 1);
}

#[tokio::test]
async fn test_watcher_rides_out_rate_limited_polls() {
    let rpc = FakeRpc::new();
    let signed = signed_buy(&rpc).await;
    let submitter = DirectSubmitter::new(rpc.clone(), common::test_retry());
    submitter.broadcast_once(&signed).await.unwrap();

    // Enough 429s to exhaust more than one poll's retries.
    rpc.read_rate_limits.store(5, Ordering::SeqCst);
    let watcher = ConfirmationWatcher::new(rpc.clone(), common::test_retry(), Duration::from_millis(5), Commitment::Confirmed);
    let blockhash = BlockhashContext {
        blockhash: bs58::encode(rpc.blockhash).into_string(),
        last_valid_block_height: common::LAST_VALID_HEIGHT,
    };
    let result = watcher
        .await_confirmation(&signed.signature, &signed.pending_id, &blockhash, Duration::from_secs(5))
        .await;

    assert_eq!(result.status, SubmissionStatus::Confirmed);
    assert_eq!(rpc.read_rate_limits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_watcher_timeout_before_expiry() {
    let rpc = FakeRpc::new();
    rpc.land_transactions.store(false, Ordering::SeqCst);
    rpc.height_step.store(0, Ordering::SeqCst);
    let signed = signed_buy(&rpc).await;

    let watcher = ConfirmationWatcher::new(rpc.clone(), common::test_retry(), Duration::from_millis(5), Commitment::Confirmed);
    let blockhash = BlockhashContext {
        blockhash: bs58::encode(rpc.blockhash).into_string(),
        last_valid_block_height: common::LAST_VALID_HEIGHT,
    };
    let result = watcher
        .await_confirmation(&signed.signature, &signed.pending_id, &blockhash, Duration::from_millis(60))
        .await;

    assert_eq!(result.status, SubmissionStatus::TimedOut);
    assert_eq!(result.error.as_deref(), Some("confirmation timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_watcher_timeout_cuts_off_retry_backoff() {
    let rpc = FakeRpc::new();
    let signed = signed_buy(&rpc).await;
    rpc.read_rate_limits.store(1_000, Ordering::SeqCst);

    // One poll's backoff alone (1s + 2s) outlasts the timeout.
    let retry = RetryPolicy::new(3, Duration::from_secs(1));
    let watcher = ConfirmationWatcher::new(rpc.clone(), retry, Duration::from_millis(5), Commitment::Confirmed);
    let blockhash = BlockhashContext {
        blockhash: bs58::encode(rpc.blockhash).into_string(),
        last_valid_block_height: common::LAST_VALID_HEIGHT,
    };

    let started = tokio::time::Instant::now();
    let result = watcher
        .await_confirmation(&signed.signature, &signed.pending_id, &blockhash, Duration::from_millis(500))
        .await;

    assert_eq!(result.status, SubmissionStatus::TimedOut);
    assert_eq!(result.error.as_deref(), Some("confirmation timeout"));
    assert!(started.elapsed() <= Duration::from_millis(600), "took {:?}", started.elapsed());
}
