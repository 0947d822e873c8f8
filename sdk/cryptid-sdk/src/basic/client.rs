use cryptid_state::TransactionState;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;

use crate::advanced::encoder::EncodedTransaction;
use crate::advanced::instructions::{CryptidTransactionBuilder, ExecuteSource};
use crate::advanced::proposal::{self, ProposalOp};
use crate::basic::actions::ProposeAndExecute;
use crate::basic::middleware::{compose, MiddlewareOutput, MiddlewarePipeline, MiddlewareRegistry};
use crate::config::CryptidConfig;
use crate::core::connection::SolConnection;
use crate::core::signer::{sign_transaction, CryptidSigner};
use crate::error::{CryptidSdkError, EncodingError, Result, Stage};
use crate::types::{CryptidAccountDetails, Middleware};
use crate::utils;

/// Who signs and on whose behalf
#[derive(Clone)]
pub struct Capabilities {
    pub signer: Arc<dyn CryptidSigner>,
    /// `false` when the signer is not a key on the DID and relies on a
    /// superuser middleware
    pub authorized: bool,
    /// DIDs delegating down to this client, outermost first
    pub controller_chain: Vec<String>,
}

/// A stored proposal created by this client
#[derive(Debug, Clone)]
pub struct Proposal {
    pub transaction_account: Pubkey,
    pub keypair: Arc<Keypair>,
    pub encoded: EncodedTransaction,
    pub state: TransactionState,
    pub signature: Signature,
}

/// Ledger transaction waiting for a blockhash and signatures
pub struct ComposedTransaction {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Arc<dyn CryptidSigner>>,
    pub payer: Pubkey,
}

impl std::fmt::Debug for ComposedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedTransaction")
            .field("instructions", &self.instructions)
            .field("signers", &self.signers.len())
            .field("payer", &self.payer)
            .finish()
    }
}

impl ComposedTransaction {
    pub fn new(instructions: Vec<Instruction>, payer: Arc<dyn CryptidSigner>) -> Self {
        Self {
            instructions,
            payer: payer.pubkey(),
            signers: vec![payer],
        }
    }

    pub fn with_signers(
        mut self,
        signers: impl IntoIterator<Item = Arc<dyn CryptidSigner>>,
    ) -> Self {
        self.signers.extend(signers);
        self
    }

    pub fn message(&self) -> Message {
        Message::new(&self.instructions, Some(&self.payer))
    }

    /// Serialized size of the signed transaction
    pub fn size(&self) -> usize {
        let tx = Transaction::new_unsigned(self.message());
        bincode::serialized_size(&tx)
            .map(|size| size as usize)
            .unwrap_or(usize::MAX)
    }

    pub fn check_size(&self, limit: usize, stage: Stage) -> Result<()> {
        let size = self.size();
        if size > limit {
            return Err(CryptidSdkError::encoding(
                stage,
                EncodingError::TransactionTooLarge { size, limit },
            ));
        }
        Ok(())
    }

    /// Sign, send and wait for confirmation
    pub async fn submit(self, connection: &dyn SolConnection, stage: Stage) -> Result<Signature> {
        let blockhash = connection
            .get_latest_blockhash()
            .await
            .map_err(|e| CryptidSdkError::transport(stage, e))?;

        let message =
            Message::new_with_blockhash(&self.instructions, Some(&self.payer), &blockhash);
        let mut tx = Transaction::new_unsigned(message);
        sign_transaction(&mut tx, &self.signers, stage).await?;

        let signature = connection
            .send_transaction(&tx)
            .await
            .map_err(|e| CryptidSdkError::transport(stage, e))?;
        let confirmed = connection
            .confirm_transaction(&signature)
            .await
            .map_err(|e| CryptidSdkError::transport(stage, e))?;
        if !confirmed {
            return Err(CryptidSdkError::NotConfirmed { stage, signature });
        }

        tracing::info!(
            %stage,
            %signature,
            instructions = self.instructions.len(),
            "transaction confirmed"
        );
        Ok(signature)
    }
}

/// A DID-controlled wallet
#[derive(Clone)]
pub struct Cryptid {
    details: CryptidAccountDetails,
    capabilities: Capabilities,
    controller_accounts: Vec<Pubkey>,
    connection: Arc<dyn SolConnection>,
    registry: Arc<MiddlewareRegistry>,
    config: CryptidConfig,
}

impl std::fmt::Debug for Cryptid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cryptid")
            .field("details", &self.details)
            .field("controller_accounts", &self.controller_accounts)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Cryptid {
    pub fn builder(
        did: impl Into<String>,
        signer: Arc<dyn CryptidSigner>,
        connection: Arc<dyn SolConnection>,
    ) -> CryptidClientBuilder {
        CryptidClientBuilder::new(did, signer, connection)
    }

    pub fn did(&self) -> &str {
        &self.details.owner_did
    }

    /// Cryptid account address: where funds live
    pub fn address(&self) -> Pubkey {
        self.details.address
    }

    pub fn details(&self) -> &CryptidAccountDetails {
        &self.details
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn config(&self) -> &CryptidConfig {
        &self.config
    }

    pub fn connection(&self) -> &dyn SolConnection {
        self.connection.as_ref()
    }

    pub fn signer_key(&self) -> Pubkey {
        self.capabilities.signer.pubkey()
    }

    /// DID accounts of the controller chain, outermost authority first
    pub fn additional_keys(&self) -> Vec<Pubkey> {
        self.controller_accounts.clone()
    }

    /// Act for `controlled_did`, a DID that lists this client's DID as a
    /// controller. The signer is unchanged.
    pub fn control_with(&self, controlled_did: &str) -> Result<Cryptid> {
        let details = CryptidAccountDetails::generative(controlled_did)?;

        let mut controller_chain = self.capabilities.controller_chain.clone();
        controller_chain.push(self.details.owner_did.clone());
        let mut controller_accounts = self.controller_accounts.clone();
        controller_accounts.push(self.details.did_account);

        tracing::debug!(
            controller = %self.details.owner_did,
            controlled = %controlled_did,
            hops = controller_accounts.len(),
            "delegating through controller"
        );

        Ok(Cryptid {
            details,
            capabilities: Capabilities {
                controller_chain,
                ..self.capabilities.clone()
            },
            controller_accounts,
            connection: self.connection.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        })
    }

    pub fn transaction_builder(&self) -> CryptidTransactionBuilder<'_> {
        CryptidTransactionBuilder::new(&self.details)
            .with_rent_payer(self.config.rent_payer)
            .with_debug(self.config.debug)
            .with_allow_unauthorized(!self.capabilities.authorized)
    }

    fn pipeline(&self) -> MiddlewarePipeline<'_> {
        MiddlewarePipeline::new(&self.registry, &self.details)
    }

    async fn run_middleware(
        &self,
        stage: Stage,
        transaction_account: Pubkey,
    ) -> Result<MiddlewareOutput> {
        self.pipeline()
            .run(stage, self.signer_key(), self.connection(), transaction_account)
            .await
    }

    fn compose(&self, instructions: Vec<Instruction>) -> ComposedTransaction {
        ComposedTransaction::new(instructions, self.capabilities.signer.clone())
    }

    async fn fetch_proposal(
        &self,
        transaction_account: &Pubkey,
        stage: Stage,
    ) -> Result<cryptid_state::TransactionAccount> {
        utils::fetch_transaction_account(self.connection(), transaction_account, stage)
            .await?
            .ok_or(CryptidSdkError::AccountNotFound {
                stage,
                account: *transaction_account,
            })
    }

    /// Wrap `instructions` into a single direct-execute transaction, checked
    /// against the size budget
    pub fn compose_direct_execute(
        &self,
        instructions: &[Instruction],
    ) -> Result<ComposedTransaction> {
        if let Some(middleware) = self.details.middlewares.first() {
            return Err(CryptidSdkError::Middleware {
                stage: Stage::Encode,
                middleware: middleware.address,
                source: "middleware approval needs the propose/execute path".into(),
            });
        }

        let ix = self.transaction_builder().direct_execute(
            &self.signer_key(),
            instructions,
            &self.controller_accounts,
        )?;
        let composed = self.compose(vec![ix]);
        composed.check_size(self.config.transaction_size_limit, Stage::Encode)?;
        Ok(composed)
    }

    pub async fn direct_execute(&self, instructions: &[Instruction]) -> Result<Signature> {
        let composed = self.compose_direct_execute(instructions)?;
        composed.submit(self.connection(), Stage::Execute).await
    }

    /// Store `instructions` in a fresh transaction account
    pub async fn propose(
        &self,
        instructions: &[Instruction],
        state: TransactionState,
    ) -> Result<Proposal> {
        self.propose_with_keypair(Arc::new(Keypair::new()), instructions, state)
            .await
    }

    /// Same as [`Cryptid::propose`] with a caller-chosen transaction account
    pub async fn propose_with_keypair(
        &self,
        keypair: Arc<Keypair>,
        instructions: &[Instruction],
        state: TransactionState,
    ) -> Result<Proposal> {
        let transaction_account = keypair.pubkey();
        let (ix, encoded) = self.transaction_builder().propose(
            &self.signer_key(),
            &transaction_account,
            instructions,
            state,
            &self.controller_accounts,
        )?;

        // a Ready proposal is sealed on creation, so it gets the propose hooks now
        let middleware = match state {
            TransactionState::Ready => {
                self.run_middleware(Stage::Propose, transaction_account)
                    .await?
            },
            _ => MiddlewareOutput::default(),
        };

        let signers: Vec<Arc<dyn CryptidSigner>> = vec![keypair.clone() as Arc<dyn CryptidSigner>];
        let composed = self
            .compose(compose(Stage::Propose, vec![ix], middleware.instructions))
            .with_signers(signers.into_iter().chain(middleware.signers));
        composed.check_size(self.config.transaction_size_limit, Stage::Propose)?;

        let signature = composed.submit(self.connection(), Stage::Propose).await?;
        tracing::info!(%transaction_account, %state, "proposed transaction");

        Ok(Proposal {
            transaction_account,
            keypair,
            encoded,
            state,
            signature,
        })
    }

    /// Append to a `NotReady` proposal
    pub async fn extend(
        &self,
        transaction_account: &Pubkey,
        instructions: &[Instruction],
    ) -> Result<Signature> {
        let stored = self.fetch_proposal(transaction_account, Stage::Propose).await?;
        let (ix, _) = self.transaction_builder().extend(
            &self.signer_key(),
            transaction_account,
            &stored,
            instructions,
            &self.controller_accounts,
        )?;

        let composed = self.compose(vec![ix]);
        composed.check_size(self.config.transaction_size_limit, Stage::Propose)?;
        composed.submit(self.connection(), Stage::Propose).await
    }

    /// Freeze a proposal; runs the propose-stage middleware
    pub async fn seal(&self, transaction_account: &Pubkey) -> Result<Signature> {
        let stored = self.fetch_proposal(transaction_account, Stage::Propose).await?;
        let ix = self.transaction_builder().seal(
            &self.signer_key(),
            transaction_account,
            &stored,
            &self.controller_accounts,
        )?;
        let middleware = self.run_middleware(Stage::Propose, *transaction_account).await?;

        let composed = self
            .compose(compose(Stage::Propose, vec![ix], middleware.instructions))
            .with_signers(middleware.signers);
        composed.check_size(self.config.transaction_size_limit, Stage::Propose)?;
        composed.submit(self.connection(), Stage::Propose).await
    }

    /// Execute a `Ready` proposal, decoding it from the ledger
    pub async fn execute(&self, transaction_account: &Pubkey) -> Result<Signature> {
        self.execute_inner(transaction_account, None).await
    }

    /// Execute a `Ready` proposal from the encoding kept since proposing
    pub async fn execute_with(
        &self,
        transaction_account: &Pubkey,
        encoded: &EncodedTransaction,
    ) -> Result<Signature> {
        self.execute_inner(transaction_account, Some(encoded)).await
    }

    async fn execute_inner(
        &self,
        transaction_account: &Pubkey,
        precomputed: Option<&EncodedTransaction>,
    ) -> Result<Signature> {
        let stored = self.fetch_proposal(transaction_account, Stage::Execute).await?;
        proposal::check(ProposalOp::Execute, transaction_account, stored.state)?;
        if let Some(encoded) = precomputed {
            if encoded.account_table != stored.account_table
                || encoded.instructions != stored.instructions
            {
                return Err(CryptidSdkError::encoding(
                    Stage::Execute,
                    EncodingError::StaleEncoding {
                        account: *transaction_account,
                    },
                ));
            }
        }

        let middleware = self.run_middleware(Stage::Execute, *transaction_account).await?;
        let middleware_accounts: Vec<AccountMeta> = self
            .details
            .middlewares
            .iter()
            .map(|m| AccountMeta::new_readonly(m.address, false))
            .collect();

        let source = match precomputed {
            Some(encoded) => ExecuteSource::Precomputed(encoded),
            None => ExecuteSource::Stored(&stored),
        };
        let authority = self.signer_key();
        let ix = self.transaction_builder().execute(
            &authority,
            transaction_account,
            &authority,
            source,
            &middleware_accounts,
            &self.controller_accounts,
        )?;

        let composed = self
            .compose(compose(Stage::Execute, vec![ix], middleware.instructions))
            .with_signers(middleware.signers);
        composed.check_size(self.config.transaction_size_limit, Stage::Execute)?;

        match composed.submit(self.connection(), Stage::Execute).await {
            Ok(signature) => {
                tracing::info!(%transaction_account, %signature, "executed transaction");
                Ok(signature)
            },
            Err(e) => {
                tracing::warn!(%transaction_account, error = %e, "execute rejected");
                Err(e)
            },
        }
    }

    /// Reclaim a transaction account's rent to the signer
    pub async fn close(&self, transaction_account: &Pubkey) -> Result<Signature> {
        let stored = self.fetch_proposal(transaction_account, Stage::Close).await?;
        proposal::check(ProposalOp::Close, transaction_account, stored.state)?;

        let middleware = self.run_middleware(Stage::Close, *transaction_account).await?;
        let authority = self.signer_key();
        let ix = self.transaction_builder().close(
            &authority,
            transaction_account,
            &authority,
            &self.controller_accounts,
        );

        let composed = self
            .compose(compose(Stage::Close, vec![ix], middleware.instructions))
            .with_signers(middleware.signers);
        composed.check_size(self.config.transaction_size_limit, Stage::Close)?;
        composed.submit(self.connection(), Stage::Close).await
    }

    /// Execute `instructions` in one transaction when they fit, otherwise
    /// through a proposal
    pub async fn send(&self, instructions: &[Instruction]) -> Result<Signature> {
        if !self.details.middlewares.is_empty() {
            return self.propose_and_execute(instructions).await;
        }

        match self.compose_direct_execute(instructions) {
            Ok(composed) => composed.submit(self.connection(), Stage::Execute).await,
            Err(e) if e.is_oversized() => {
                tracing::info!(error = %e, "falling back to propose and execute");
                self.propose_and_execute(instructions).await
            },
            Err(e) => Err(e),
        }
    }

    pub async fn propose_and_execute(&self, instructions: &[Instruction]) -> Result<Signature> {
        let mut action = ProposeAndExecute::new(self, instructions.to_vec())?;
        action.run(self).await
    }

    /// Initialize the account at `index` (never 0) and return a client for it
    pub async fn create_account(
        &self,
        index: u32,
        middlewares: Vec<Middleware>,
    ) -> Result<Cryptid> {
        let details = CryptidAccountDetails::derive(&self.details.owner_did, index, middlewares)?;
        let signer = self.signer_key();
        let ix = CryptidTransactionBuilder::new(&details).create_cryptid_account(
            &signer,
            &signer,
            &self.controller_accounts,
        )?;

        self.compose(vec![ix])
            .submit(self.connection(), Stage::Execute)
            .await?;
        tracing::info!(account = %details.address, index, "created cryptid account");

        Ok(Cryptid {
            details,
            ..self.clone()
        })
    }
}

pub struct CryptidClientBuilder {
    did: String,
    signer: Arc<dyn CryptidSigner>,
    connection: Arc<dyn SolConnection>,
    index: u32,
    middlewares: Vec<Middleware>,
    registry: Arc<MiddlewareRegistry>,
    config: CryptidConfig,
    authorized: bool,
}

impl CryptidClientBuilder {
    pub fn new(
        did: impl Into<String>,
        signer: Arc<dyn CryptidSigner>,
        connection: Arc<dyn SolConnection>,
    ) -> Self {
        Self {
            did: did.into(),
            signer,
            connection,
            index: 0,
            middlewares: Vec::new(),
            registry: Arc::new(MiddlewareRegistry::default()),
            config: CryptidConfig::default(),
            authorized: true,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn with_middlewares(mut self, middlewares: Vec<Middleware>) -> Self {
        self.middlewares = middlewares;
        self
    }

    pub fn with_registry(mut self, registry: Arc<MiddlewareRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: CryptidConfig) -> Self {
        self.config = config;
        self
    }

    /// The signer is not a key on the DID
    pub fn unauthorized(mut self) -> Self {
        self.authorized = false;
        self
    }

    /// Build from derived addresses, without reading the ledger
    pub fn build(self) -> Result<Cryptid> {
        let details =
            CryptidAccountDetails::derive(&self.did, self.index, self.middlewares.clone())?;
        Ok(self.finish(details))
    }

    /// Build from the account stored on the ledger
    pub async fn fetch(self) -> Result<Cryptid> {
        let details = CryptidAccountDetails::fetch(
            self.connection.as_ref(),
            &self.did,
            self.index,
            &self.registry,
        )
        .await?;
        Ok(self.finish(details))
    }

    fn finish(self, details: CryptidAccountDetails) -> Cryptid {
        Cryptid {
            details,
            capabilities: Capabilities {
                signer: self.signer,
                authorized: self.authorized,
                controller_chain: Vec::new(),
            },
            controller_accounts: Vec::new(),
            connection: self.connection,
            registry: self.registry,
            config: self.config,
        }
    }
}
