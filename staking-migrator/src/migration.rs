//! # Batch migration engine
//!
//! Moves every stash whose reward destination is still `Controller` over to an explicit
//! `Account(controller)` payee. Targets are split into fixed-size batches that are processed
//! strictly one after another:
//!
//! 1. the current controller of every stash in the batch is resolved concurrently,
//! 2. one `Staking::update_payee` per controller is wrapped into a `Utility::batch`,
//!    signed with the engine's current nonce and submitted,
//! 3. the inclusion events are consumed until the first terminal event (or a timeout).
//!
//! The nonce advances exactly once per accepted submission, whatever the batch's eventual
//! outcome. A failed batch is logged and never retried; later batches still run.
use std::fmt;
use std::time::Duration;

use futures::future::try_join_all;
use futures::StreamExt;
use log::{debug, error, info, warn};
use snafu::{OptionExt, ResultExt};
use sp_core::crypto::AccountId32;

use crate::decode;
use crate::error::*;
use crate::ledger::{InclusionKind, InclusionStream, Instruction, LedgerClient, StorageItem};
use crate::model::Address;
use crate::orchestrator::RunContext;
use crate::signer::Signer;

/// Number of stashes per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// What to do with the nonce when an accepted batch never reports a terminal event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UnresolvedNoncePolicy {
    /// Keep the incremented nonce.
    #[default]
    Consume,
    /// Re-read the signer's nonce from `System::Account` and adopt it.
    Refetch,
}

/// Tunables of a migration run.
#[derive(Clone, Debug)]
pub struct MigrationOptions {
    /// Maximum number of stashes per batch.
    pub batch_size: usize,
    /// How long to wait for a terminal event per batch; `None` waits forever.
    pub completion_timeout: Option<Duration>,
    /// Nonce handling for unresolved batches.
    pub unresolved_nonce: UnresolvedNoncePolicy,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            completion_timeout: Some(Duration::from_secs(300)),
            unresolved_nonce: UnresolvedNoncePolicy::Consume,
        }
    }
}

/// Lifecycle of a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    /// Built, not yet submitted.
    Pending,
    /// Accepted by the node; the nonce has been consumed.
    Submitted,
    /// `ExtrinsicSuccess` was observed.
    Succeeded,
    /// Resolution, submission or execution failed.
    Failed,
}

/// Why a batch ended up [`BatchStatus::Failed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchFailure {
    /// A controller lookup failed; nothing was submitted.
    ControllerResolution(String),
    /// The node rejected the submission; no nonce was consumed.
    Submission(String),
    /// The extrinsic executed and emitted `ExtrinsicFailed`.
    ExtrinsicFailed(String),
    /// No terminal event arrived before the stream ended or timed out.
    Unresolved,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchFailure::ControllerResolution(e) => write!(f, "controller resolution failed: {e}"),
            BatchFailure::Submission(e) => write!(f, "submission rejected: {e}"),
            BatchFailure::ExtrinsicFailed(e) => write!(f, "extrinsic failed: {e}"),
            BatchFailure::Unresolved => f.write_str("no terminal event observed"),
        }
    }
}

/// One slice of the migration target set.
#[derive(Clone, Debug)]
pub struct MigrationBatch {
    /// Zero-based position of the batch.
    pub index: usize,
    /// Stashes to migrate.
    pub stashes: Vec<Address>,
    /// Resolved controllers, aligned with `stashes` once resolution succeeded.
    pub controllers: Vec<Address>,
    /// Nonce the batch was submitted with.
    pub nonce: Option<u64>,
    /// Current status.
    pub status: BatchStatus,
}

impl MigrationBatch {
    fn new(index: usize, stashes: Vec<Address>) -> Self {
        Self {
            index,
            stashes,
            controllers: Vec::new(),
            nonce: None,
            status: BatchStatus::Pending,
        }
    }

    fn finish(self, failure: Option<BatchFailure>) -> BatchOutcome {
        let status = match failure {
            None => BatchStatus::Succeeded,
            Some(_) => BatchStatus::Failed,
        };
        debug!("Batch {} {:?} -> {:?}", self.index + 1, self.status, status);

        BatchOutcome {
            index: self.index,
            size: self.stashes.len(),
            controllers: self.controllers,
            nonce: self.nonce,
            status,
            failure,
        }
    }
}

/// Terminal record of a processed batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Zero-based position of the batch.
    pub index: usize,
    /// Number of stashes in the batch.
    pub size: usize,
    /// Controllers the batch addressed; empty if resolution failed.
    pub controllers: Vec<Address>,
    /// Nonce the batch was submitted with; `None` if it never got accepted.
    pub nonce: Option<u64>,
    /// Either [`BatchStatus::Succeeded`] or [`BatchStatus::Failed`].
    pub status: BatchStatus,
    /// Set iff the batch failed.
    pub failure: Option<BatchFailure>,
}

/// The signing account and the nonce its next batch will use.
#[derive(Debug)]
pub struct SignerState {
    /// The signing account.
    signer: Signer,
    /// Nonce of the next submission.
    nonce: u64,
}

impl SignerState {
    /// The signer's address.
    pub fn address(&self) -> &Address {
        self.signer.address()
    }

    /// Nonce of the next submission.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

/// Result of waiting on an inclusion stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// `ExtrinsicSuccess`
    Succeeded,
    /// `ExtrinsicFailed`, with the dispatch error.
    Failed(String),
    /// The stream ended or the timeout elapsed first.
    Unresolved,
}

/// Resolves once with the first terminal event of `events`.
///
/// The stream is dropped on return, which cancels the underlying subscription.
pub async fn await_outcome(mut events: InclusionStream, timeout: Option<Duration>) -> Completion {
    let terminal = async move {
        while let Some(event) = events.next().await {
            match event.kind {
                InclusionKind::Included => info!("📄 Batch included in block {}", event.detail),
                InclusionKind::Succeeded => return Completion::Succeeded,
                InclusionKind::Failed => return Completion::Failed(event.detail),
            }
        }
        Completion::Unresolved
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, terminal).await {
            Ok(completion) => completion,
            Err(_) => {
                warn!("⚠️ No terminal event within {:?}", limit);
                Completion::Unresolved
            }
        },
        None => terminal.await,
    }
}

/// Reads the on-chain nonce of `account`; an account that does not exist has nonce 0.
async fn fetch_nonce(ledger: &dyn LedgerClient, account: &AccountId32) -> Result<u64> {
    match ledger.point_lookup(StorageItem::SystemAccount, account).await? {
        Some(info) => decode::account_nonce(&info).context(DecodeSnafu {
            context: "System::Account nonce",
        }),
        None => Ok(0),
    }
}

/// Processes migration batches for one network with one signer.
pub struct MigrationEngine<'a> {
    /// Network and client of the run.
    ctx: RunContext<'a>,
    /// Exclusively owned signer and nonce.
    state: SignerState,
    /// Batch size, timeout and nonce policy.
    options: MigrationOptions,
}

impl<'a> MigrationEngine<'a> {
    /// Creates an engine, reading the signer's starting nonce from chain.
    ///
    /// If the nonce cannot be read the engine starts at 0.
    pub async fn start(ctx: RunContext<'a>, signer: Signer, options: MigrationOptions) -> Self {
        let nonce = match fetch_nonce(ctx.ledger, &signer.account_id()).await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("⚠️ Failed getting nonce for {}, starting at 0: {e}", signer.address());
                0
            }
        };
        info!("Signer {} starts at nonce {}", signer.address(), nonce);

        Self {
            ctx,
            state: SignerState { signer, nonce },
            options,
        }
    }

    /// The signer and its next nonce.
    pub fn signer_state(&self) -> &SignerState {
        &self.state
    }

    /// Migrates `targets` batch by batch and returns one outcome per batch, in order.
    pub async fn migrate(&mut self, targets: &[Address]) -> Vec<BatchOutcome> {
        let batch_size = self.options.batch_size.max(1);
        let batch_count = targets.len().div_ceil(batch_size);
        info!(
            "{} payees to migrate on {} in {} batches, signed by {}",
            targets.len(),
            self.ctx.network,
            batch_count,
            self.state.address()
        );

        let mut outcomes = Vec::with_capacity(batch_count);
        for (index, stashes) in targets.chunks(batch_size).enumerate() {
            info!(
                "🔵 Attempting batch {}/{} ({} stashes)",
                index + 1,
                batch_count,
                stashes.len()
            );
            let outcome = self
                .process(MigrationBatch::new(index, stashes.to_vec()))
                .await;
            match &outcome.failure {
                None => info!("✅ Batch {} migrated", index + 1),
                Some(failure) => error!("❌ Batch {} failed: {failure}", index + 1),
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Resolves, submits and awaits one batch.
    async fn process(&mut self, mut batch: MigrationBatch) -> BatchOutcome {
        let controllers = match self.resolve_controllers(&batch.stashes).await {
            Ok(controllers) => controllers,
            Err(e) => return batch.finish(Some(BatchFailure::ControllerResolution(e.to_string()))),
        };
        batch.controllers = controllers
            .iter()
            .map(|c| Address::from_account(c, self.ctx.network))
            .collect();

        let instructions: Vec<Instruction> = controllers
            .into_iter()
            .map(|controller| Instruction::UpdatePayee { controller })
            .collect();

        let nonce = self.state.nonce;
        let events = match self
            .ctx
            .ledger
            .submit_batch(&self.state.signer, nonce, &instructions)
            .await
        {
            Ok(events) => events,
            Err(e) => return batch.finish(Some(BatchFailure::Submission(e.to_string()))),
        };
        batch.nonce = Some(nonce);
        batch.status = BatchStatus::Submitted;
        self.state.nonce += 1;

        match await_outcome(events, self.options.completion_timeout).await {
            Completion::Succeeded => batch.finish(None),
            Completion::Failed(detail) => batch.finish(Some(BatchFailure::ExtrinsicFailed(detail))),
            Completion::Unresolved => {
                if self.options.unresolved_nonce == UnresolvedNoncePolicy::Refetch {
                    self.refetch_nonce().await;
                }
                batch.finish(Some(BatchFailure::Unresolved))
            }
        }
    }

    /// Looks up the current controller of every stash concurrently.
    ///
    /// Fails if any stash is unbonded or any lookup fails.
    async fn resolve_controllers(&self, stashes: &[Address]) -> Result<Vec<AccountId32>> {
        let ledger = self.ctx.ledger;
        try_join_all(stashes.iter().map(|stash| async move {
            let value = ledger
                .point_lookup(StorageItem::Bonded, &stash.account_id()?)
                .await?
                .context(ControllerNotFoundSnafu {
                    stash: stash.as_str(),
                })?;
            decode::account(&value).context(DecodeSnafu {
                context: format!("controller of {stash}"),
            })
        }))
        .await
    }

    /// Replaces the local nonce with the chain's, keeping it on failure.
    async fn refetch_nonce(&mut self) {
        match fetch_nonce(self.ctx.ledger, &self.state.signer.account_id()).await {
            Ok(nonce) => {
                info!("Adopting on-chain nonce {} (was {})", nonce, self.state.nonce);
                self.state.nonce = nonce;
            }
            Err(e) => warn!(
                "⚠️ Failed refetching nonce, keeping {}: {e}",
                self.state.nonce
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use codec::Encode;

    use super::*;
    use crate::ledger::InclusionEvent;
    use crate::network::Network;
    use crate::test_utils::{
        account,
        account_info_value,
        test_signer,
        MockLedger,
        Scripted,
    };

    /// A ledger where stash `i` is bonded to controller `i + 128`, for `i < count`.
    fn bonded_ledger(count: u8) -> MockLedger {
        (0..count).fold(MockLedger::new(), |ledger, i| {
            ledger.with_value(StorageItem::Bonded, account(i), account(i + 128).encode())
        })
    }

    fn stashes(count: u8) -> Vec<Address> {
        (0..count)
            .map(|i| Address::from_account(&account(i), Network::Westend))
            .collect()
    }

    fn with_nonce(ledger: MockLedger, nonce: u32) -> MockLedger {
        ledger.with_value(
            StorageItem::SystemAccount,
            test_signer().account_id(),
            account_info_value(nonce),
        )
    }

    fn options() -> MigrationOptions {
        MigrationOptions {
            completion_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn targets_are_split_into_ordered_batches() {
        let ledger = with_nonce(bonded_ledger(125), 3);
        let ctx = RunContext::new(Network::Westend, &ledger);
        let mut engine = MigrationEngine::start(ctx, test_signer(), options()).await;

        let outcomes = engine.migrate(&stashes(125)).await;

        let sizes: Vec<usize> = outcomes.iter().map(|o| o.size).collect();
        assert_eq!(sizes, vec![50, 50, 25]);
        let indices: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(outcomes.iter().all(|o| o.status == BatchStatus::Succeeded));

        let submissions = ledger.submissions();
        assert_eq!(submissions.len(), 3);
        assert_eq!(
            submissions[2].instructions[0],
            Instruction::UpdatePayee {
                controller: account(100 + 128)
            }
        );
        assert_eq!(
            outcomes[2].controllers[0],
            Address::from_account(&account(100 + 128), Network::Westend)
        );
        assert_eq!(engine.signer_state().nonce(), 6);
    }

    #[tokio::test]
    async fn nonces_stay_sequential_across_a_failed_batch() {
        let ledger = with_nonce(bonded_ledger(6), 11)
            .with_script([Scripted::Succeed, Scripted::Fail, Scripted::Succeed]);
        let ctx = RunContext::new(Network::Westend, &ledger);
        let mut engine = MigrationEngine::start(
            ctx,
            test_signer(),
            MigrationOptions {
                batch_size: 2,
                ..options()
            },
        )
        .await;

        let outcomes = engine.migrate(&stashes(6)).await;

        assert_eq!(ledger.submitted_nonces(), vec![11, 12, 13]);
        let statuses: Vec<BatchStatus> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![BatchStatus::Succeeded, BatchStatus::Failed, BatchStatus::Succeeded]
        );
        assert_eq!(
            outcomes[1].failure,
            Some(BatchFailure::ExtrinsicFailed("BadOrigin".to_string()))
        );
        assert_eq!(outcomes[1].nonce, Some(12));
    }

    #[tokio::test]
    async fn rejected_submissions_do_not_consume_a_nonce() {
        let ledger = with_nonce(bonded_ledger(4), 5).with_script([Scripted::Reject]);
        let ctx = RunContext::new(Network::Westend, &ledger);
        let mut engine = MigrationEngine::start(
            ctx,
            test_signer(),
            MigrationOptions {
                batch_size: 2,
                ..options()
            },
        )
        .await;

        let outcomes = engine.migrate(&stashes(4)).await;

        assert_eq!(ledger.submitted_nonces(), vec![5, 5]);
        assert!(matches!(
            outcomes[0].failure,
            Some(BatchFailure::Submission(_))
        ));
        assert_eq!(outcomes[0].nonce, None);
        assert_eq!(outcomes[1].status, BatchStatus::Succeeded);
        assert_eq!(engine.signer_state().nonce(), 6);
    }

    #[tokio::test]
    async fn unresolvable_controllers_fail_the_batch_without_submitting() {
        let ledger = with_nonce(bonded_ledger(4), 0)
            .with_failing_lookup(StorageItem::Bonded, account(1));
        let mut targets = stashes(4);
        // unbonded stash in the last batch
        targets.push(Address::from_account(&account(200), Network::Westend));
        let ctx = RunContext::new(Network::Westend, &ledger);
        let mut engine = MigrationEngine::start(
            ctx,
            test_signer(),
            MigrationOptions {
                batch_size: 2,
                ..options()
            },
        )
        .await;

        let outcomes = engine.migrate(&targets).await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(
            outcomes[0].failure,
            Some(BatchFailure::ControllerResolution(_))
        ));
        assert!(outcomes[0].controllers.is_empty());
        assert_eq!(outcomes[1].status, BatchStatus::Succeeded);
        assert!(matches!(
            outcomes[2].failure,
            Some(BatchFailure::ControllerResolution(_))
        ));
        assert_eq!(ledger.submitted_nonces(), vec![0]);
    }

    #[tokio::test]
    async fn unresolved_batches_consume_the_nonce_by_default() {
        let ledger = with_nonce(bonded_ledger(2), 7).with_script([Scripted::Hang]);
        let ctx = RunContext::new(Network::Westend, &ledger);
        let mut engine = MigrationEngine::start(
            ctx,
            test_signer(),
            MigrationOptions {
                batch_size: 1,
                ..options()
            },
        )
        .await;

        let outcomes = engine.migrate(&stashes(2)).await;

        assert_eq!(outcomes[0].failure, Some(BatchFailure::Unresolved));
        assert_eq!(outcomes[0].nonce, Some(7));
        assert_eq!(ledger.submitted_nonces(), vec![7, 8]);
    }

    #[tokio::test]
    async fn unresolved_batches_can_refetch_the_chain_nonce() {
        let ledger = with_nonce(bonded_ledger(2), 7).with_script([Scripted::EndWithoutTerminal]);
        let ctx = RunContext::new(Network::Westend, &ledger);
        let mut engine = MigrationEngine::start(
            ctx,
            test_signer(),
            MigrationOptions {
                batch_size: 1,
                completion_timeout: None,
                unresolved_nonce: UnresolvedNoncePolicy::Refetch,
            },
        )
        .await;

        let outcomes = engine.migrate(&stashes(2)).await;

        assert_eq!(outcomes[0].failure, Some(BatchFailure::Unresolved));
        assert_eq!(ledger.submitted_nonces(), vec![7, 7]);
        assert_eq!(outcomes[1].status, BatchStatus::Succeeded);
    }

    #[tokio::test]
    async fn nonce_fetch_failures_start_at_zero() {
        let ledger = bonded_ledger(1)
            .with_failing_lookup(StorageItem::SystemAccount, test_signer().account_id());
        let ctx = RunContext::new(Network::Westend, &ledger);
        let mut engine = MigrationEngine::start(ctx, test_signer(), options()).await;
        assert_eq!(engine.signer_state().nonce(), 0);

        engine.migrate(&stashes(1)).await;
        assert_eq!(ledger.submitted_nonces(), vec![0]);
    }

    #[tokio::test]
    async fn we_can_wait_for_the_first_terminal_event() {
        let events = futures::stream::iter(vec![
            InclusionEvent::new(InclusionKind::Included, "0x01"),
            InclusionEvent::new(InclusionKind::Failed, "Module"),
            InclusionEvent::new(InclusionKind::Succeeded, "0x01"),
        ])
        .boxed();
        assert_eq!(
            await_outcome(events, None).await,
            Completion::Failed("Module".to_string())
        );

        let silent = futures::stream::pending().boxed();
        assert_eq!(
            await_outcome(silent, Some(Duration::from_millis(10))).await,
            Completion::Unresolved
        );
    }
}
