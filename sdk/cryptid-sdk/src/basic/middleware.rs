//! Middleware hooks and their placement around the core Cryptid instruction.
//!
//! Each middleware attached to a Cryptid account is owned by a program; the
//! [`MiddlewareRegistry`] maps that program to the client that knows how to
//! talk to it. For one stage, every attached middleware's hook is awaited
//! together and the outputs are concatenated in attachment order.

use async_trait::async_trait;
use futures::future::try_join_all;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::connection::SolConnection;
use crate::core::signer::CryptidSigner;
use crate::error::{BoxedError, CryptidSdkError, Result, Stage};
use crate::types::CryptidAccountDetails;

/// What a hook gets to look at
pub struct MiddlewareContext<'a> {
    /// Key signing the Cryptid transaction
    pub authority: Pubkey,
    pub connection: &'a dyn SolConnection,
    /// The proposal the hook is about
    pub transaction_account: Pubkey,
    /// This middleware's state account
    pub middleware_account: Pubkey,
    pub details: &'a CryptidAccountDetails,
}

/// Instructions a hook contributes, plus any extra signers they need
#[derive(Clone, Default)]
pub struct MiddlewareOutput {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Arc<dyn CryptidSigner>>,
}

impl MiddlewareOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn CryptidSigner>) -> Self {
        self.signers.push(signer);
        self
    }

    pub fn append(&mut self, other: MiddlewareOutput) {
        self.instructions.extend(other.instructions);
        self.signers.extend(other.signers);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && self.signers.is_empty()
    }
}

impl std::fmt::Debug for MiddlewareOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signers: Vec<Pubkey> = self.signers.iter().map(|s| s.pubkey()).collect();
        f.debug_struct("MiddlewareOutput")
            .field("instructions", &self.instructions)
            .field("signers", &signers)
            .finish()
    }
}

/// Client side of a middleware program. Every hook defaults to contributing
/// nothing.
#[async_trait]
pub trait MiddlewareClient: Send + Sync {
    /// Whether this middleware can approve unauthorized signers
    fn is_superuser(&self) -> bool {
        false
    }

    async fn on_propose(
        &self,
        _ctx: &MiddlewareContext<'_>,
    ) -> std::result::Result<MiddlewareOutput, BoxedError> {
        Ok(MiddlewareOutput::default())
    }

    async fn on_execute(
        &self,
        _ctx: &MiddlewareContext<'_>,
    ) -> std::result::Result<MiddlewareOutput, BoxedError> {
        Ok(MiddlewareOutput::default())
    }

    async fn on_close(
        &self,
        _ctx: &MiddlewareContext<'_>,
    ) -> std::result::Result<MiddlewareOutput, BoxedError> {
        Ok(MiddlewareOutput::default())
    }
}

/// Owning program id to middleware client. Passed explicitly to clients.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    clients: HashMap<Pubkey, Arc<dyn MiddlewareClient>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, program_id: Pubkey, client: Arc<dyn MiddlewareClient>) -> Self {
        self.register(program_id, client);
        self
    }

    pub fn register(&mut self, program_id: Pubkey, client: Arc<dyn MiddlewareClient>) {
        self.clients.insert(program_id, client);
    }

    pub fn get(&self, program_id: &Pubkey) -> Option<&Arc<dyn MiddlewareClient>> {
        self.clients.get(program_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.clients.keys()).finish()
    }
}

/// Runs one stage's hooks for the middleware attached to an account
pub struct MiddlewarePipeline<'a> {
    registry: &'a MiddlewareRegistry,
    details: &'a CryptidAccountDetails,
}

impl<'a> MiddlewarePipeline<'a> {
    pub fn new(registry: &'a MiddlewareRegistry, details: &'a CryptidAccountDetails) -> Self {
        Self { registry, details }
    }

    /// Run every attached middleware's hook for `stage`. The first failure
    /// aborts the stage.
    pub async fn run(
        &self,
        stage: Stage,
        authority: Pubkey,
        connection: &dyn SolConnection,
        transaction_account: Pubkey,
    ) -> Result<MiddlewareOutput> {
        if self.details.middlewares.is_empty() {
            return Ok(MiddlewareOutput::default());
        }

        let mut clients = Vec::with_capacity(self.details.middlewares.len());
        for middleware in &self.details.middlewares {
            let client = self.registry.get(&middleware.owning_program).ok_or_else(|| {
                CryptidSdkError::Middleware {
                    stage,
                    middleware: middleware.address,
                    source: format!(
                        "no client registered for program {}",
                        middleware.owning_program
                    )
                    .into(),
                }
            })?;
            clients.push((middleware.address, client.clone()));
        }

        let details = self.details;
        let hooks = clients.into_iter().map(move |(middleware_account, client)| async move {
            let ctx = MiddlewareContext {
                authority,
                connection,
                transaction_account,
                middleware_account,
                details,
            };
            let output = match stage {
                Stage::Propose => client.on_propose(&ctx).await,
                Stage::Execute => client.on_execute(&ctx).await,
                Stage::Close => client.on_close(&ctx).await,
                Stage::Encode => Ok(MiddlewareOutput::default()),
            };
            output.map_err(|source| CryptidSdkError::Middleware {
                stage,
                middleware: middleware_account,
                source,
            })
        });

        let outputs = try_join_all(hooks).await?;
        let mut combined = MiddlewareOutput::default();
        for output in outputs {
            combined.append(output);
        }

        tracing::debug!(
            %stage,
            middlewares = self.details.middlewares.len(),
            instructions = combined.instructions.len(),
            "middleware stage complete"
        );
        Ok(combined)
    }
}

/// Place middleware output relative to the core instructions: after them for
/// `Propose`, before them for `Execute` and `Close`.
pub fn compose(
    stage: Stage,
    core: Vec<Instruction>,
    middleware: Vec<Instruction>,
) -> Vec<Instruction> {
    match stage {
        Stage::Execute | Stage::Close => middleware.into_iter().chain(core).collect(),
        Stage::Propose | Stage::Encode => core.into_iter().chain(middleware).collect(),
    }
}
