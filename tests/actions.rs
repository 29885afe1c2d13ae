#![allow(non_snake_case)]
use ethers::types::U256;
use lottery_dapp::{
    chain::{
        ChainError,
        LotteryEvent,
    },
    client::{
        Action,
        AppController,
    },
    test_helpers::{
        CallKind,
        FakeChain,
        RecordedCall,
        connected_as,
        dealer,
        drain_events,
        fund_player,
        player,
        run_tasks,
        tokens,
    },
};

#[tokio::test]
async fn claim_token__sends_claim_and_reports_hash() {
    // given
    let chain = FakeChain::default();
    let mut controller = connected_as(&chain, player()).await;

    // when
    let task = controller.claim_token();
    assert_eq!(controller.snapshot().in_flight, vec![Action::ClaimToken]);
    run_tasks(&mut controller, task).await;

    // then
    assert!(
        chain
            .calls()
            .contains(&RecordedCall::ClaimMockToken { from: player() })
    );
    assert_eq!(controller.view().status, "Token claim sent (0x000000...0001)");
    assert!(controller.snapshot().in_flight.is_empty());
}

#[tokio::test]
async fn claim_token__failure_replaces_previous_error() {
    // given
    let chain = FakeChain::default();
    let mut controller = connected_as(&chain, player()).await;
    chain.fail_next(
        CallKind::ClaimMockToken,
        ChainError::Rejected("User denied transaction signature.".into()),
    );
    let task = controller.claim_token();
    run_tasks(&mut controller, task).await;

    // when
    chain.fail_next(
        CallKind::ClaimMockToken,
        ChainError::reverted("Already claimed today"),
    );
    let task = controller.claim_token();
    run_tasks(&mut controller, task).await;

    // then
    assert_eq!(
        controller.view().error_message.as_deref(),
        Some("execution reverted: Already claimed today")
    );
    assert_eq!(controller.view().status, "Token claim failed");
}

#[tokio::test]
async fn actions__without_connection_send_nothing() {
    // given
    let chain = FakeChain::default();
    let mut controller = AppController::new(Some(chain.clone()), chain.addresses());

    // when
    let started = [
        controller.claim_token().is_some(),
        controller.place_bet("1").is_some(),
        controller.stop_game().is_some(),
        controller.claim_reward().is_some(),
    ];

    // then
    assert_eq!(started, [false; 4]);
    assert_eq!(controller.view().status, "Connect a wallet first");
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn stop_game__dealer_stops_game_and_event_updates_view() {
    // given
    let chain = FakeChain::default();
    let mut controller = connected_as(&chain, dealer()).await;
    assert!(controller.controls().stop_game);

    // when
    let task = controller.stop_game();
    run_tasks(&mut controller, task).await;
    drain_events(&mut controller).await;

    // then
    assert!(chain.is_stopped());
    assert!(controller.view().is_stopped);
    assert!(!controller.controls().stop_game);
    // the dealer never sees the claim control
    assert!(!controller.controls().claim_reward);
}

#[tokio::test]
async fn stop_game__rejection_is_reported_like_other_actions() {
    // given
    let chain = FakeChain::default();
    let mut controller = connected_as(&chain, player()).await;

    // when
    let task = controller.stop_game();
    run_tasks(&mut controller, task).await;

    // then
    assert_eq!(
        controller.view().error_message.as_deref(),
        Some("execution reverted: Only dealer can stop the game")
    );
    assert_eq!(controller.view().status, "Stop game failed");
    assert!(!controller.is_in_flight(Action::StopGame));
    assert!(!chain.is_stopped());
}

#[tokio::test]
async fn claim_reward__after_stop_shows_reward_from_event() {
    // given
    let chain = FakeChain::default();
    fund_player(&chain, player());
    let mut controller = connected_as(&chain, player()).await;
    let task = controller.place_bet("8");
    run_tasks(&mut controller, task).await;
    chain.set_stopped(true);
    chain.emit_lottery(LotteryEvent::Stop { is_stop: true });
    chain.set_reward(player(), tokens(150));
    drain_events(&mut controller).await;
    assert!(controller.controls().claim_reward);

    // when
    let task = controller.claim_reward();
    run_tasks(&mut controller, task).await;
    drain_events(&mut controller).await;

    // then
    assert_eq!(controller.view().reward, Some(tokens(150)));
    assert_eq!(controller.view().error_message, None);
}

#[tokio::test]
async fn claim_reward__before_stop_surfaces_revert() {
    // given
    let chain = FakeChain::default();
    let mut controller = connected_as(&chain, player()).await;

    // when
    let task = controller.claim_reward();
    run_tasks(&mut controller, task).await;

    // then
    assert_eq!(
        controller.view().error_message.as_deref(),
        Some("execution reverted: Game is not stopped")
    );
    assert_eq!(controller.view().reward, None);
}

#[tokio::test]
async fn in_flight__tracked_per_action() {
    // given
    let chain = FakeChain::default();
    fund_player(&chain, player());
    let mut controller = connected_as(&chain, player()).await;

    // when
    let claim = controller.claim_token();
    let bet = controller.place_bet("4");

    // then
    assert!(claim.is_some());
    assert!(bet.is_some());
    assert_eq!(
        controller.snapshot().in_flight,
        vec![Action::PlaceBet, Action::ClaimToken]
    );
    run_tasks(&mut controller, claim.into_iter().chain(bet)).await;
    assert!(controller.snapshot().in_flight.is_empty());
    assert_eq!(chain.bet_of(player()), Some(U256::from(4)));
}
