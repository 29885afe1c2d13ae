#![allow(non_snake_case)]
use ethers::types::U256;
use lottery_dapp::{
    chain::ChainError,
    client::{
        Action,
        AppController,
        MISSING_WALLET_MESSAGE,
    },
    test_helpers::{
        CallKind,
        FakeChain,
        PASSPHRASE,
        RecordedCall,
        addresses,
        connected_as,
        dealer,
        player,
        run_tasks,
        tokens,
    },
    view::{
        CONNECT_LABEL,
        CONNECTED_LABEL,
        Controls,
    },
};

#[tokio::test]
async fn connect__sets_account_label_and_reads_balance() {
    // given
    let chain = FakeChain::default();
    chain.mint(player(), tokens(5));

    // when
    let controller = connected_as(&chain, player()).await;

    // then
    let view = controller.view();
    assert_eq!(view.account, Some(player()));
    assert_eq!(view.connection_label, CONNECTED_LABEL);
    assert_eq!(view.balance.as_deref(), Some("5.0"));
    assert_eq!(view.error_message, None);
    let calls = chain.calls();
    assert!(calls.contains(&RecordedCall::BalanceOf(player())));
    assert!(calls.contains(&RecordedCall::IsStop));
}

#[tokio::test]
async fn connect__without_wallet_reports_missing_wallet() {
    // given
    let mut controller = AppController::<FakeChain>::new(None, addresses());

    // when
    let task = controller.connect(PASSPHRASE.to_string());

    // then
    assert!(task.is_none());
    assert_eq!(
        controller.view().error_message.as_deref(),
        Some(MISSING_WALLET_MESSAGE)
    );
    assert_eq!(controller.view().account, None);
}

#[tokio::test]
async fn connect__rejected_authorization_keeps_disconnected() {
    // given
    let chain = FakeChain::default();
    let mut controller = AppController::new(Some(chain.clone()), chain.addresses());

    // when
    let task = controller.connect("wrong".to_string());
    run_tasks(&mut controller, task).await;

    // then
    let view = controller.view();
    assert_eq!(view.account, None);
    assert_eq!(view.connection_label, CONNECT_LABEL);
    assert_eq!(
        view.error_message.as_deref(),
        Some("User rejected the request.")
    );
    assert_eq!(controller.controls(), Controls::default());
    assert!(!controller.is_in_flight(Action::Connect));
    assert_eq!(chain.live_subscriptions(), 0);
}

#[tokio::test]
async fn connect__can_retry_after_rejection() {
    // given
    let chain = FakeChain::default();
    let mut controller = AppController::new(Some(chain.clone()), chain.addresses());
    let task = controller.connect("wrong".to_string());
    run_tasks(&mut controller, task).await;

    // when
    let task = controller.connect(PASSPHRASE.to_string());
    run_tasks(&mut controller, task).await;

    // then
    assert_eq!(controller.view().account, Some(player()));
    // the stale error stays until the next one replaces it
    assert_eq!(
        controller.view().error_message.as_deref(),
        Some("User rejected the request.")
    );
}

#[tokio::test]
async fn connect__provider_error_prefers_provider_message() {
    // given
    let chain = FakeChain::default();
    chain.fail_next(
        CallKind::RequestAccounts,
        ChainError::Rpc {
            message: "(code: -32002, message: Already processing eth_requestAccounts)".into(),
            provider_message: Some("Already processing eth_requestAccounts".into()),
        },
    );
    let mut controller = AppController::new(Some(chain.clone()), chain.addresses());

    // when
    let task = controller.connect(PASSPHRASE.to_string());
    run_tasks(&mut controller, task).await;

    // then
    assert_eq!(
        controller.view().error_message.as_deref(),
        Some("Already processing eth_requestAccounts")
    );
}

#[tokio::test]
async fn connect__second_request_while_pending_is_ignored() {
    // given
    let chain = FakeChain::default();
    let mut controller = AppController::new(Some(chain.clone()), chain.addresses());
    let first = controller.connect(PASSPHRASE.to_string());

    // when
    let second = controller.connect(PASSPHRASE.to_string());

    // then
    assert!(first.is_some());
    assert!(second.is_none());
    assert!(controller.is_in_flight(Action::Connect));
    assert_eq!(
        controller.view().status,
        "Wallet connection already in progress"
    );
    run_tasks(&mut controller, first).await;
    assert_eq!(chain.count_calls(CallKind::RequestAccounts), 1);
}

#[tokio::test]
async fn connect__ignored_once_connected() {
    // given
    let chain = FakeChain::default();
    let mut controller = connected_as(&chain, player()).await;

    // when
    let task = controller.connect(PASSPHRASE.to_string());

    // then
    assert!(task.is_none());
    assert_eq!(chain.count_calls(CallKind::RequestAccounts), 1);
}

#[tokio::test]
async fn connect__registers_token_lottery_and_provider_listeners() {
    let chain = FakeChain::default();
    let _controller = connected_as(&chain, player()).await;
    assert_eq!(chain.live_subscriptions(), 3);
}

#[tokio::test]
async fn connect__player_sees_bet_form_but_not_stop_control() {
    // given
    let chain = FakeChain::default();

    // when
    let controller = connected_as(&chain, player()).await;

    // then
    assert_eq!(
        controller.controls(),
        Controls {
            claim_token: true,
            bet_form: true,
            claim_reward: false,
            stop_game: false,
        }
    );
}

#[tokio::test]
async fn connect__dealer_sees_stop_control_but_not_bet_form() {
    // given
    let chain = FakeChain::default();

    // when
    let controller = connected_as(&chain, dealer()).await;

    // then
    assert_eq!(
        controller.controls(),
        Controls {
            claim_token: true,
            bet_form: false,
            claim_reward: false,
            stop_game: true,
        }
    );
}

#[tokio::test]
async fn connect__reads_stopped_game_and_offers_claim() {
    // given
    let chain = FakeChain::default();
    chain.set_stopped(true);

    // when
    let controller = connected_as(&chain, player()).await;

    // then
    assert!(controller.view().is_stopped);
    assert!(controller.controls().claim_reward);
    assert!(!controller.controls().stop_game);
}

#[tokio::test]
async fn connect__balance_read_failure_becomes_error_message() {
    // given
    let chain = FakeChain::default();
    chain.fail_next(
        CallKind::BalanceOf,
        ChainError::Rpc {
            message: "(code: -32000, message: header not found)".into(),
            provider_message: Some("header not found".into()),
        },
    );

    // when
    let controller = connected_as(&chain, player()).await;

    // then
    assert_eq!(controller.view().account, Some(player()));
    assert_eq!(controller.view().balance, None);
    assert_eq!(
        controller.view().error_message.as_deref(),
        Some("header not found")
    );
}

#[tokio::test]
async fn connect__zero_balance_renders_as_zero() {
    let chain = FakeChain::default();
    let controller = connected_as(&chain, player()).await;
    assert_eq!(chain.balance(player()), U256::zero());
    assert_eq!(controller.view().balance.as_deref(), Some("0.0"));
}
