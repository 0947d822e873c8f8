use assert_matches::assert_matches;
use cryptid_sdk::state::{TransactionState, CRYPTID_PROGRAM_ID};
use cryptid_sdk::{
    Cryptid, CryptidSdkError, EncodingError, Middleware, MiddlewareClient, MiddlewareRegistry,
    SolConnection, Stage,
};
use solana_sdk::account::Account;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::transaction::Transaction;
use std::sync::Arc;

mod common;
use common::{
    marker, setup_test_context, transfer, FailingMiddleware, RecordingMiddleware, TestContext,
};

struct Attached {
    address: Pubkey,
    client: Arc<RecordingMiddleware>,
}

fn attach(tag: u8) -> Attached {
    Attached {
        address: Pubkey::new_unique(),
        client: Arc::new(RecordingMiddleware::new(tag)),
    }
}

fn middleware_for(attached: &Attached) -> Middleware {
    Middleware {
        address: attached.address,
        owning_program: attached.client.program,
        is_superuser: false,
    }
}

fn client_with(
    context: &TestContext,
    middlewares: Vec<Middleware>,
    registry: MiddlewareRegistry,
) -> Cryptid {
    Cryptid::builder(
        context.did.clone(),
        context.authority.clone() as Arc<dyn cryptid_sdk::CryptidSigner>,
        context.ledger.clone() as Arc<dyn SolConnection>,
    )
    .with_middlewares(middlewares)
    .with_registry(Arc::new(registry))
    .build()
    .unwrap()
}

fn two_middleware_client(context: &TestContext) -> (Cryptid, Attached, Attached) {
    let a = attach(1);
    let b = attach(2);
    let registry = MiddlewareRegistry::new()
        .with(a.client.program, a.client.clone() as Arc<dyn MiddlewareClient>)
        .with(b.client.program, b.client.clone() as Arc<dyn MiddlewareClient>);
    let client = client_with(context, vec![middleware_for(&a), middleware_for(&b)], registry);
    (client, a, b)
}

/// (program, data) of every instruction in the transaction, in order
fn layout(tx: &Transaction) -> Vec<(Pubkey, Vec<u8>)> {
    tx.message
        .instructions
        .iter()
        .map(|ix| (tx.message.account_keys[ix.program_id_index as usize], ix.data.clone()))
        .collect()
}

fn programs(tx: &Transaction) -> Vec<Pubkey> {
    layout(tx).into_iter().map(|(program, _)| program).collect()
}

#[tokio::test]
async fn test_propose_appends_and_execute_prepends_middleware() {
    let context = setup_test_context();
    let (client, a, b) = two_middleware_client(&context);
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let proposal = client
        .propose(&[ix.clone()], TransactionState::Ready)
        .await
        .unwrap();
    let propose_tx = context.ledger.submitted().await.pop().unwrap();
    assert_eq!(
        programs(&propose_tx),
        vec![CRYPTID_PROGRAM_ID, a.client.program, b.client.program]
    );
    assert_eq!(layout(&propose_tx)[1].1, marker(1, Stage::Propose));

    client.execute(&proposal.transaction_account).await.unwrap();
    let execute_tx = context.ledger.submitted().await.pop().unwrap();
    assert_eq!(
        layout(&execute_tx),
        vec![
            (a.client.program, marker(1, Stage::Execute)),
            (b.client.program, marker(2, Stage::Execute)),
            (CRYPTID_PROGRAM_ID, layout(&execute_tx)[2].1.clone()),
        ]
    );
    assert!(execute_tx.message.account_keys.contains(&a.address));
    assert!(execute_tx.message.account_keys.contains(&b.address));

    assert_eq!(a.client.calls(), vec![Stage::Propose, Stage::Execute]);
    assert_eq!(b.client.calls(), vec![Stage::Propose, Stage::Execute]);
    assert_eq!(context.ledger.executed().await, vec![ix]);
}

#[tokio::test]
async fn test_not_ready_proposal_runs_propose_hooks_at_seal() {
    let context = setup_test_context();
    let (client, a, _b) = two_middleware_client(&context);
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let proposal = client
        .propose(&[ix], TransactionState::NotReady)
        .await
        .unwrap();
    assert!(a.client.calls().is_empty());

    client.seal(&proposal.transaction_account).await.unwrap();
    assert_eq!(a.client.calls(), vec![Stage::Propose]);

    let seal_tx = context.ledger.submitted().await.pop().unwrap();
    assert_eq!(programs(&seal_tx)[0], CRYPTID_PROGRAM_ID);
    assert_eq!(programs(&seal_tx).len(), 3);
}

#[tokio::test]
async fn test_oversized_middleware_output_fails_seal_and_close_locally() {
    let context = setup_test_context();
    let bulky = Attached {
        address: Pubkey::new_unique(),
        client: Arc::new(RecordingMiddleware::new(9).with_padding(1_300)),
    };
    let registry = MiddlewareRegistry::new().with(
        bulky.client.program,
        bulky.client.clone() as Arc<dyn MiddlewareClient>,
    );
    let client = client_with(&context, vec![middleware_for(&bulky)], registry);
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let proposal = client
        .propose(&[ix], TransactionState::NotReady)
        .await
        .unwrap();
    let submitted = context.ledger.submitted().await.len();

    let sealed = client.seal(&proposal.transaction_account).await;
    assert_matches!(
        sealed,
        Err(CryptidSdkError::Encoding {
            stage: Stage::Propose,
            source: EncodingError::TransactionTooLarge { .. },
        })
    );

    let closed = client.close(&proposal.transaction_account).await;
    assert_matches!(
        closed,
        Err(CryptidSdkError::Encoding {
            stage: Stage::Close,
            source: EncodingError::TransactionTooLarge { .. },
        })
    );
    assert_eq!(context.ledger.submitted().await.len(), submitted);
}

#[tokio::test]
async fn test_close_prepends_middleware() {
    let context = setup_test_context();
    let (client, a, b) = two_middleware_client(&context);
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let proposal = client
        .propose(&[ix], TransactionState::NotReady)
        .await
        .unwrap();
    client.close(&proposal.transaction_account).await.unwrap();

    let close_tx = context.ledger.submitted().await.pop().unwrap();
    assert_eq!(
        programs(&close_tx),
        vec![a.client.program, b.client.program, CRYPTID_PROGRAM_ID]
    );
    assert_eq!(b.client.calls(), vec![Stage::Close]);
}

#[tokio::test]
async fn test_failing_hook_aborts_before_submission() {
    let context = setup_test_context();
    let program = Pubkey::new_unique();
    let address = Pubkey::new_unique();
    let registry = MiddlewareRegistry::new().with(program, Arc::new(FailingMiddleware));
    let client = client_with(
        &context,
        vec![Middleware {
            address,
            owning_program: program,
            is_superuser: false,
        }],
        registry,
    );
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let proposal = client
        .propose(&[ix], TransactionState::Ready)
        .await
        .unwrap();
    let submitted = context.ledger.submitted().await.len();

    let result = client.execute(&proposal.transaction_account).await;
    assert_matches!(
        result,
        Err(CryptidSdkError::Middleware { stage: Stage::Execute, middleware, source })
            if middleware == address && source.to_string() == "recipient not allowed"
    );
    assert_eq!(context.ledger.submitted().await.len(), submitted);
    let stored = context
        .ledger
        .transaction_account(&proposal.transaction_account)
        .await
        .unwrap();
    assert_eq!(stored.state, TransactionState::Ready);
}

#[tokio::test]
async fn test_unregistered_middleware_program_is_an_error() {
    let context = setup_test_context();
    let address = Pubkey::new_unique();
    let client = client_with(
        &context,
        vec![Middleware {
            address,
            owning_program: Pubkey::new_unique(),
            is_superuser: false,
        }],
        MiddlewareRegistry::new(),
    );
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let result = client.propose(&[ix], TransactionState::Ready).await;
    assert_matches!(
        result,
        Err(CryptidSdkError::Middleware { stage: Stage::Propose, middleware, .. })
            if middleware == address
    );
    assert!(context.ledger.submitted().await.is_empty());
}

#[tokio::test]
async fn test_middleware_signer_signs_the_transaction() {
    let context = setup_test_context();
    let signer = Arc::new(Keypair::new());
    let attached = Attached {
        address: Pubkey::new_unique(),
        client: Arc::new(RecordingMiddleware::new(5).with_signer(signer.clone())),
    };
    let registry = MiddlewareRegistry::new().with(
        attached.client.program,
        attached.client.clone() as Arc<dyn MiddlewareClient>,
    );
    let client = client_with(&context, vec![middleware_for(&attached)], registry);
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let proposal = client
        .propose(&[ix.clone()], TransactionState::Ready)
        .await
        .unwrap();
    client.execute(&proposal.transaction_account).await.unwrap();

    let execute_tx = context.ledger.submitted().await.pop().unwrap();
    assert_eq!(execute_tx.message.header.num_required_signatures, 2);
    assert!(execute_tx.verify().is_ok());
    assert_eq!(context.ledger.executed().await, vec![ix]);
}

#[tokio::test]
async fn test_middleware_forces_proposal_path() {
    let context = setup_test_context();
    let (client, a, _b) = two_middleware_client(&context);
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    assert_matches!(
        client.compose_direct_execute(&[ix.clone()]),
        Err(CryptidSdkError::Middleware { stage: Stage::Encode, middleware, .. })
            if middleware == a.address
    );

    client.send(&[ix.clone()]).await.unwrap();
    assert_eq!(context.ledger.executed().await, vec![ix]);
    assert_eq!(a.client.calls(), vec![Stage::Propose, Stage::Execute]);
}

#[tokio::test]
async fn test_rejected_middleware_instruction_rolls_back_execute() {
    let context = setup_test_context();
    let (client, a, _b) = two_middleware_client(&context);
    let ix = transfer(client.address(), Pubkey::new_unique(), 1);

    let proposal = client
        .propose(&[ix], TransactionState::Ready)
        .await
        .unwrap();
    context.ledger.reject_program(a.client.program).await;

    assert_matches!(
        client.execute(&proposal.transaction_account).await,
        Err(CryptidSdkError::Transport { stage: Stage::Execute, .. })
    );
    let stored = context
        .ledger
        .transaction_account(&proposal.transaction_account)
        .await
        .unwrap();
    assert_eq!(stored.state, TransactionState::Ready);
    assert!(context.ledger.executed().await.is_empty());
}

#[tokio::test]
async fn test_fetch_resolves_middleware_owners() {
    let context = setup_test_context();
    let attached = attach(3);
    let registry = MiddlewareRegistry::new().with(
        attached.client.program,
        attached.client.clone() as Arc<dyn MiddlewareClient>,
    );

    let creator = context.client();
    creator
        .create_account(1, vec![middleware_for(&attached)])
        .await
        .unwrap();
    context
        .ledger
        .set_account(
            attached.address,
            Account {
                lamports: 1,
                data: vec![],
                owner: attached.client.program,
                executable: false,
                rent_epoch: 0,
            },
        )
        .await;

    let fetched = Cryptid::builder(
        context.did.clone(),
        context.authority.clone() as Arc<dyn cryptid_sdk::CryptidSigner>,
        context.ledger.clone() as Arc<dyn SolConnection>,
    )
    .with_index(1)
    .with_registry(Arc::new(registry))
    .fetch()
    .await
    .unwrap();

    assert_eq!(fetched.details().middlewares, vec![middleware_for(&attached)]);
}
