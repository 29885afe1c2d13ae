//! In-memory token, lottery and wallet for driving the controller without a
//! node. Writes confirm immediately and emit their events to every live
//! subscription.

use crate::{
    chain::{
        Authorization,
        ChainError,
        INSUFFICIENT_ALLOWANCE_REASON,
        LotteryContract,
        LotteryEvent,
        ProviderChange,
        TokenContract,
        TokenEvent,
        WalletProvider,
    },
    client::{
        AppController,
        SessionEvent,
        Task,
    },
    deployment::ContractAddresses,
    subscription::{
        Subscription,
        SubscriptionSender,
    },
};
use ethers::types::{
    Address,
    TxHash,
    U256,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};

pub const PASSPHRASE: &str = "correct horse";
pub const INITIAL_SUPPLY_TOKENS: u64 = 1_000_000;
pub const FAUCET_TOKENS: u64 = 1;
pub const BET_TOKENS: u64 = 100;

pub fn tokens(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

pub fn player() -> Address {
    Address::repeat_byte(0x11)
}

pub fn other_player() -> Address {
    Address::repeat_byte(0x22)
}

pub fn dealer() -> Address {
    Address::repeat_byte(0xde)
}

pub fn addresses() -> ContractAddresses {
    ContractAddresses {
        token: Address::repeat_byte(0xa1),
        lottery: Address::repeat_byte(0xb2),
        dealer: dealer(),
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CallKind {
    RequestAccounts,
    BalanceOf,
    TotalSupply,
    ClaimMockToken,
    Approve,
    Bet,
    StopGame,
    ClaimReward,
    IsStop,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordedCall {
    RequestAccounts,
    BalanceOf(Address),
    TotalSupply,
    ClaimMockToken { from: Address },
    Approve {
        from: Address,
        spender: Address,
        amount: U256,
    },
    Bet { from: Address, number: U256 },
    StopGame { from: Address },
    ClaimReward { from: Address },
    IsStop,
}

impl RecordedCall {
    pub fn kind(&self) -> CallKind {
        match self {
            RecordedCall::RequestAccounts => CallKind::RequestAccounts,
            RecordedCall::BalanceOf(_) => CallKind::BalanceOf,
            RecordedCall::TotalSupply => CallKind::TotalSupply,
            RecordedCall::ClaimMockToken { .. } => CallKind::ClaimMockToken,
            RecordedCall::Approve { .. } => CallKind::Approve,
            RecordedCall::Bet { .. } => CallKind::Bet,
            RecordedCall::StopGame { .. } => CallKind::StopGame,
            RecordedCall::ClaimReward { .. } => CallKind::ClaimReward,
            RecordedCall::IsStop => CallKind::IsStop,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeSigner {
    pub account: Address,
}

struct Ledger {
    addresses: ContractAddresses,
    passphrase: String,
    accounts: Vec<Address>,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
    is_stop: bool,
    bets: HashMap<Address, U256>,
    rewards: HashMap<Address, U256>,
    calls: Vec<RecordedCall>,
    failures: HashMap<CallKind, ChainError>,
    token_listeners: Vec<SubscriptionSender<TokenEvent>>,
    lottery_listeners: Vec<SubscriptionSender<LotteryEvent>>,
    provider_listeners: Vec<SubscriptionSender<ProviderChange>>,
    next_tx: u64,
}

impl Ledger {
    fn new(addresses: ContractAddresses) -> Self {
        let supply = tokens(INITIAL_SUPPLY_TOKENS);
        Self {
            addresses,
            passphrase: PASSPHRASE.to_string(),
            accounts: vec![player()],
            balances: HashMap::from([(addresses.dealer, supply)]),
            allowances: HashMap::new(),
            total_supply: supply,
            is_stop: false,
            bets: HashMap::new(),
            rewards: HashMap::new(),
            calls: Vec::new(),
            failures: HashMap::new(),
            token_listeners: Vec::new(),
            lottery_listeners: Vec::new(),
            provider_listeners: Vec::new(),
            next_tx: 0,
        }
    }

    /// Records the call, then fails it if a failure was scripted for it.
    fn call(&mut self, call: RecordedCall) -> Result<(), ChainError> {
        let kind = call.kind();
        self.calls.push(call);
        match self.failures.remove(&kind) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn tx(&mut self) -> TxHash {
        self.next_tx += 1;
        TxHash::from_low_u64_be(self.next_tx)
    }

    fn balance(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn emit_token(&mut self, event: TokenEvent) {
        self.token_listeners
            .retain(|listener| listener.send(Ok(event.clone())).is_ok());
    }

    fn emit_lottery(&mut self, event: LotteryEvent) {
        self.lottery_listeners
            .retain(|listener| listener.send(Ok(event.clone())).is_ok());
    }

    fn emit_provider(&mut self, change: ProviderChange) {
        self.provider_listeners
            .retain(|listener| listener.send(Ok(change.clone())).is_ok());
    }
}

type SharedLedger = Arc<Mutex<Ledger>>;

fn lock(ledger: &SharedLedger) -> MutexGuard<'_, Ledger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

fn require_signer(signer: &Option<FakeSigner>) -> Result<Address, ChainError> {
    signer
        .as_ref()
        .map(|s| s.account)
        .ok_or(ChainError::NoSigner)
}

/// Shared handle on the fake ledger; also the wallet the controller talks to.
#[derive(Clone)]
pub struct FakeChain {
    ledger: SharedLedger,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new(addresses())
    }
}

impl FakeChain {
    pub fn new(addresses: ContractAddresses) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger::new(addresses))),
        }
    }

    pub fn addresses(&self) -> ContractAddresses {
        lock(&self.ledger).addresses
    }

    /// Accounts handed out on a successful unlock.
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        lock(&self.ledger).accounts = accounts;
    }

    pub fn mint(&self, account: Address, amount: U256) {
        let mut ledger = lock(&self.ledger);
        *ledger.balances.entry(account).or_default() += amount;
        ledger.total_supply += amount;
    }

    pub fn set_allowance(&self, owner: Address, amount: U256) {
        let mut ledger = lock(&self.ledger);
        let spender = ledger.addresses.lottery;
        ledger.allowances.insert((owner, spender), amount);
    }

    pub fn set_stopped(&self, is_stop: bool) {
        lock(&self.ledger).is_stop = is_stop;
    }

    /// Amount `claim_reward` pays `account`; zero when unset.
    pub fn set_reward(&self, account: Address, amount: U256) {
        lock(&self.ledger).rewards.insert(account, amount);
    }

    /// The next call of `kind` fails with `err` instead of running.
    pub fn fail_next(&self, kind: CallKind, err: ChainError) {
        lock(&self.ledger).failures.insert(kind, err);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.ledger).calls.clone()
    }

    pub fn count_calls(&self, kind: CallKind) -> usize {
        lock(&self.ledger)
            .calls
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    pub fn balance(&self, account: Address) -> U256 {
        lock(&self.ledger).balance(account)
    }

    pub fn allowance(&self, owner: Address) -> U256 {
        let ledger = lock(&self.ledger);
        ledger.allowance(owner, ledger.addresses.lottery)
    }

    pub fn bet_of(&self, account: Address) -> Option<U256> {
        lock(&self.ledger).bets.get(&account).copied()
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.ledger).is_stop
    }

    pub fn emit_token(&self, event: TokenEvent) {
        lock(&self.ledger).emit_token(event);
    }

    pub fn emit_lottery(&self, event: LotteryEvent) {
        lock(&self.ledger).emit_lottery(event);
    }

    pub fn change_accounts(&self, accounts: Vec<Address>) {
        lock(&self.ledger).emit_provider(ProviderChange::AccountsChanged(accounts));
    }

    pub fn change_chain(&self, chain_id: u64) {
        lock(&self.ledger).emit_provider(ProviderChange::ChainChanged(chain_id));
    }

    /// Subscriptions whose receiving side is still alive.
    pub fn live_subscriptions(&self) -> usize {
        let ledger = lock(&self.ledger);
        ledger
            .token_listeners
            .iter()
            .filter(|l| !l.is_closed())
            .count()
            + ledger
                .lottery_listeners
                .iter()
                .filter(|l| !l.is_closed())
                .count()
            + ledger
                .provider_listeners
                .iter()
                .filter(|l| !l.is_closed())
                .count()
    }
}

impl WalletProvider for FakeChain {
    type Signer = FakeSigner;
    type Token = FakeToken;
    type Lottery = FakeLottery;

    async fn request_accounts(
        &self,
        passphrase: String,
    ) -> Result<Authorization<FakeSigner>, ChainError> {
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::RequestAccounts)?;
        if passphrase != ledger.passphrase {
            return Err(ChainError::Rejected("User rejected the request.".into()));
        }
        let accounts = ledger.accounts.clone();
        let account = accounts.first().copied().unwrap_or_default();
        Ok(Authorization {
            accounts,
            signer: FakeSigner { account },
        })
    }

    fn token_at(&self, address: Address) -> FakeToken {
        FakeToken {
            ledger: self.ledger.clone(),
            address,
            signer: None,
        }
    }

    fn lottery_at(&self, address: Address) -> FakeLottery {
        FakeLottery {
            ledger: self.ledger.clone(),
            address,
            signer: None,
        }
    }

    fn watch_changes(&self) -> Subscription<ProviderChange> {
        let (sender, subscription) = Subscription::channel();
        lock(&self.ledger).provider_listeners.push(sender);
        subscription
    }
}

#[derive(Clone)]
pub struct FakeToken {
    ledger: SharedLedger,
    address: Address,
    signer: Option<FakeSigner>,
}

impl TokenContract for FakeToken {
    type Signer = FakeSigner;

    fn address(&self) -> Address {
        self.address
    }

    fn connect(&self, signer: &FakeSigner) -> Self {
        Self {
            signer: Some(signer.clone()),
            ..self.clone()
        }
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, ChainError> {
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::BalanceOf(owner))?;
        Ok(ledger.balance(owner))
    }

    async fn total_supply(&self) -> Result<U256, ChainError> {
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::TotalSupply)?;
        Ok(ledger.total_supply)
    }

    async fn claim_mock_token(&self) -> Result<TxHash, ChainError> {
        let from = require_signer(&self.signer)?;
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::ClaimMockToken { from })?;
        let amount = tokens(FAUCET_TOKENS);
        *ledger.balances.entry(from).or_default() += amount;
        ledger.total_supply += amount;
        ledger.emit_token(TokenEvent::ClaimToken { claimer: from });
        Ok(ledger.tx())
    }

    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash, ChainError> {
        let from = require_signer(&self.signer)?;
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::Approve {
            from,
            spender,
            amount,
        })?;
        ledger.allowances.insert((from, spender), amount);
        ledger.emit_token(TokenEvent::Approval {
            owner: from,
            spender,
            value: amount,
        });
        Ok(ledger.tx())
    }

    fn subscribe(&self) -> Subscription<TokenEvent> {
        let (sender, subscription) = Subscription::channel();
        lock(&self.ledger).token_listeners.push(sender);
        subscription
    }
}

#[derive(Clone)]
pub struct FakeLottery {
    ledger: SharedLedger,
    address: Address,
    signer: Option<FakeSigner>,
}

impl LotteryContract for FakeLottery {
    type Signer = FakeSigner;

    fn address(&self) -> Address {
        self.address
    }

    fn connect(&self, signer: &FakeSigner) -> Self {
        Self {
            signer: Some(signer.clone()),
            ..self.clone()
        }
    }

    async fn bet(&self, number: U256) -> Result<TxHash, ChainError> {
        let from = require_signer(&self.signer)?;
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::Bet { from, number })?;
        let cost = tokens(BET_TOKENS);
        if ledger.allowance(from, self.address) < cost {
            return Err(ChainError::reverted(INSUFFICIENT_ALLOWANCE_REASON));
        }
        if ledger.balance(from) < cost {
            return Err(ChainError::reverted("ERC20: transfer amount exceeds balance"));
        }
        if let Some(allowance) = ledger.allowances.get_mut(&(from, self.address)) {
            *allowance -= cost;
        }
        if let Some(balance) = ledger.balances.get_mut(&from) {
            *balance -= cost;
        }
        *ledger.balances.entry(self.address).or_default() += cost;
        ledger.bets.insert(from, number);
        ledger.emit_lottery(LotteryEvent::Bet {
            player: from,
            number,
        });
        Ok(ledger.tx())
    }

    async fn stop_game(&self) -> Result<TxHash, ChainError> {
        let from = require_signer(&self.signer)?;
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::StopGame { from })?;
        if from != ledger.addresses.dealer {
            return Err(ChainError::reverted("Only dealer can stop the game"));
        }
        if ledger.is_stop {
            return Err(ChainError::reverted("Game already stopped"));
        }
        ledger.is_stop = true;
        ledger.emit_lottery(LotteryEvent::Stop { is_stop: true });
        Ok(ledger.tx())
    }

    async fn claim_reward(&self) -> Result<TxHash, ChainError> {
        let from = require_signer(&self.signer)?;
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::ClaimReward { from })?;
        if !ledger.is_stop {
            return Err(ChainError::reverted("Game is not stopped"));
        }
        if ledger.bets.remove(&from).is_none() {
            return Err(ChainError::reverted("No bet to claim"));
        }
        let reward = ledger.rewards.remove(&from).unwrap_or_default();
        *ledger.balances.entry(from).or_default() += reward;
        ledger.emit_lottery(LotteryEvent::ClaimReward {
            winner: from,
            reward,
        });
        Ok(ledger.tx())
    }

    async fn is_stop(&self) -> Result<bool, ChainError> {
        let mut ledger = lock(&self.ledger);
        ledger.call(RecordedCall::IsStop)?;
        Ok(ledger.is_stop)
    }

    fn subscribe(&self) -> Subscription<LotteryEvent> {
        let (sender, subscription) = Subscription::channel();
        lock(&self.ledger).lottery_listeners.push(sender);
        subscription
    }
}

/// Awaits every task, applying each result and following up on the tasks
/// that result starts.
pub async fn run_tasks<W: WalletProvider>(
    controller: &mut AppController<W>,
    tasks: impl IntoIterator<Item = Task<W::Signer>>,
) {
    let mut queue: VecDeque<Task<W::Signer>> = tasks.into_iter().collect();
    while let Some(task) = queue.pop_front() {
        let envelope = task.await;
        queue.extend(controller.apply(envelope));
    }
}

/// Next session event, or `None` if nothing arrives shortly.
pub async fn next_event<W: WalletProvider>(
    controller: &mut AppController<W>,
) -> Option<SessionEvent> {
    tokio::time::timeout(Duration::from_millis(100), controller.next_session_event())
        .await
        .ok()
}

/// Handles queued session events until the subscriptions go quiet. Returns
/// how many were handled.
pub async fn drain_events<W: WalletProvider>(controller: &mut AppController<W>) -> usize {
    let mut handled = 0;
    while let Some(event) = next_event(controller).await {
        let tasks = controller.handle_session_event(event);
        run_tasks(controller, tasks).await;
        handled += 1;
    }
    handled
}

/// Controller connected to `chain` as `account`, with the initial reads done.
pub async fn connected_as(chain: &FakeChain, account: Address) -> AppController<FakeChain> {
    chain.set_accounts(vec![account]);
    let mut controller = AppController::new(Some(chain.clone()), chain.addresses());
    let task = controller.connect(PASSPHRASE.to_string());
    run_tasks(&mut controller, task).await;
    controller
}

/// Player with faucet tokens and the lottery approved for the whole supply.
pub fn fund_player(chain: &FakeChain, account: Address) {
    chain.mint(account, tokens(BET_TOKENS * 10));
    chain.set_allowance(account, U256::MAX);
}
