use crate::{
    chain::{
        AccountScoped,
        Authorization,
        ChainError,
        ErrorKind,
        LotteryContract,
        LotteryEvent,
        ProviderChange,
        TokenContract,
        TokenEvent,
        WalletProvider,
    },
    deployment::ContractAddresses,
    evm::{
        self,
        KeystoreWallet,
    },
    subscription::Subscription,
    ui,
    view::{
        CONNECTED_LABEL,
        Controls,
        GameView,
        format_token_amount,
    },
    wallets,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ethers::types::{
    Address,
    TxHash,
    U256,
};
use futures::{
    StreamExt,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use std::{
    collections::HashSet,
    future::pending,
    path::PathBuf,
    sync::Arc,
};
use tracing::{
    error,
    info,
    warn,
};

pub const DEFAULT_TESTNET_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
pub const DEFAULT_DEVNET_RPC_URL: &str = "https://ethereum-holesky-rpc.publicnode.com";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";

pub use crate::chain::MISSING_WALLET_MESSAGE;

#[derive(Clone, Debug)]
pub enum NetworkTarget {
    Testnet { url: String },
    Devnet { url: String },
    LocalNode { url: String },
}

impl NetworkTarget {
    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Testnet { url }
            | NetworkTarget::Devnet { url }
            | NetworkTarget::LocalNode { url } => url,
        }
    }
}

#[derive(Clone, Debug)]
pub enum WalletConfig {
    None,
    Keystore { name: String, dir: PathBuf },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub wallet: WalletConfig,
    pub addresses: ContractAddresses,
}

/// User actions that go on chain. At most one of each is outstanding.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    Connect,
    ClaimToken,
    PlaceBet,
    StopGame,
    ClaimReward,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::Connect => "Wallet connection",
            Action::ClaimToken => "Token claim",
            Action::PlaceBet => "Bet",
            Action::StopGame => "Stop game",
            Action::ClaimReward => "Reward claim",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionOutcome {
    Submitted(TxHash),
    /// The bet lacked allowance; an approval was sent instead of the bet.
    ApprovalSubmitted(TxHash),
}

pub enum AppMessage<S> {
    Connected(Result<Authorization<S>, ChainError>),
    BalanceRead {
        account: Address,
        result: Result<U256, ChainError>,
    },
    GameStatusRead(Result<bool, ChainError>),
    ActionFinished {
        action: Action,
        result: Result<ActionOutcome, ChainError>,
    },
}

/// Message tagged with the session generation that produced it, so results
/// of calls started before a reset are dropped.
pub struct Envelope<S> {
    generation: u64,
    pub message: AppMessage<S>,
}

pub type Task<S> = BoxFuture<'static, Envelope<S>>;

pub enum SessionEvent {
    Token(Result<TokenEvent, ChainError>),
    Lottery(Result<LotteryEvent, ChainError>),
    Provider(Result<ProviderChange, ChainError>),
    Closed(Channel),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
    Token,
    Lottery,
    Provider,
}

struct Contracts<W: WalletProvider> {
    token: W::Token,
    lottery: W::Lottery,
}

struct Session<W: WalletProvider> {
    account: Address,
    signer: W::Signer,
    token_events: Option<Subscription<TokenEvent>>,
    lottery_events: Option<Subscription<LotteryEvent>>,
    provider_changes: Option<Subscription<ProviderChange>>,
}

async fn recv_from<T: Send + 'static>(
    subscription: &mut Option<Subscription<T>>,
) -> Option<Result<T, ChainError>> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => pending().await,
    }
}

impl<W: WalletProvider> Session<W> {
    async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            item = recv_from(&mut self.token_events) => match item {
                Some(event) => SessionEvent::Token(event),
                None => SessionEvent::Closed(Channel::Token),
            },
            item = recv_from(&mut self.lottery_events) => match item {
                Some(event) => SessionEvent::Lottery(event),
                None => SessionEvent::Closed(Channel::Lottery),
            },
            item = recv_from(&mut self.provider_changes) => match item {
                Some(change) => SessionEvent::Provider(change),
                None => SessionEvent::Closed(Channel::Provider),
            },
        }
    }

    fn close(&mut self, channel: Channel) {
        match channel {
            Channel::Token => self.token_events = None,
            Channel::Lottery => self.lottery_events = None,
            Channel::Provider => self.provider_changes = None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub view: GameView,
    pub controls: Controls,
    pub in_flight: Vec<Action>,
    pub wallet_name: Option<String>,
}

pub struct AppController<W: WalletProvider> {
    wallet: Option<Arc<W>>,
    wallet_name: Option<String>,
    addresses: ContractAddresses,
    contracts: Option<Contracts<W>>,
    session: Option<Session<W>>,
    view: GameView,
    in_flight: HashSet<Action>,
    generation: u64,
}

impl<W: WalletProvider> AppController<W> {
    pub fn new(wallet: Option<W>, addresses: ContractAddresses) -> Self {
        Self {
            wallet: wallet.map(Arc::new),
            wallet_name: None,
            addresses,
            contracts: None,
            session: None,
            view: GameView::default(),
            in_flight: HashSet::new(),
            generation: 0,
        }
    }

    pub fn with_wallet_name(mut self, name: impl Into<String>) -> Self {
        self.wallet_name = Some(name.into());
        self
    }

    pub fn view(&self) -> &GameView {
        &self.view
    }

    pub fn controls(&self) -> Controls {
        Controls::derive(&self.view, self.addresses.dealer)
    }

    pub fn is_in_flight(&self, action: Action) -> bool {
        self.in_flight.contains(&action)
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let mut in_flight: Vec<Action> = self.in_flight.iter().copied().collect();
        in_flight.sort_by_key(|a| a.label());
        AppSnapshot {
            view: self.view.clone(),
            controls: self.controls(),
            in_flight,
            wallet_name: self.wallet_name.clone(),
        }
    }

    fn task<F>(&self, work: F) -> Task<W::Signer>
    where
        F: Future<Output = AppMessage<W::Signer>> + Send + 'static,
    {
        let generation = self.generation;
        Box::pin(async move {
            Envelope {
                generation,
                message: work.await,
            }
        })
    }

    fn begin(&mut self, action: Action) -> bool {
        if !self.in_flight.insert(action) {
            self.view
                .set_status(format!("{} already in progress", action.label()));
            return false;
        }
        true
    }

    /// Token and lottery handles rebound to the session signer.
    fn write_handles(&mut self) -> Option<(W::Token, W::Lottery)> {
        match (&self.session, &self.contracts) {
            (Some(session), Some(contracts)) => Some((
                contracts.token.connect(&session.signer),
                contracts.lottery.connect(&session.signer),
            )),
            _ => {
                self.view.set_status("Connect a wallet first");
                None
            }
        }
    }

    fn submit<F>(&mut self, action: Action, work: F) -> Option<Task<W::Signer>>
    where
        F: Future<Output = Result<ActionOutcome, ChainError>> + Send + 'static,
    {
        if !self.begin(action) {
            return None;
        }
        self.view.set_status(format!("{} submitted...", action.label()));
        Some(self.task(async move {
            AppMessage::ActionFinished {
                action,
                result: work.await,
            }
        }))
    }

    pub fn connect(&mut self, passphrase: String) -> Option<Task<W::Signer>> {
        let Some(wallet) = self.wallet.clone() else {
            self.view.set_error(ChainError::WalletMissing.user_message());
            return None;
        };
        if self.view.account.is_some() || !self.begin(Action::Connect) {
            return None;
        }
        info!("requesting wallet authorization");
        self.view.set_status("Unlocking wallet...");
        Some(self.task(async move {
            AppMessage::Connected(wallet.request_accounts(passphrase).await)
        }))
    }

    pub fn refresh_balance(&self) -> Option<Task<W::Signer>> {
        let account = self.view.account?;
        let token = self.contracts.as_ref()?.token.clone();
        Some(self.task(async move {
            let result = token.balance_of(account).await;
            AppMessage::BalanceRead { account, result }
        }))
    }

    fn read_game_status(&self) -> Option<Task<W::Signer>> {
        let lottery = self.contracts.as_ref()?.lottery.clone();
        Some(self.task(async move { AppMessage::GameStatusRead(lottery.is_stop().await) }))
    }

    pub fn claim_token(&mut self) -> Option<Task<W::Signer>> {
        let (token, _) = self.write_handles()?;
        self.submit(Action::ClaimToken, async move {
            token.claim_mock_token().await.map(ActionOutcome::Submitted)
        })
    }

    pub fn place_bet(&mut self, bet_number: impl Into<String>) -> Option<Task<W::Signer>> {
        self.view.bet_input = bet_number.into();
        let (token, lottery) = self.write_handles()?;
        let raw = self.view.bet_input.clone();
        self.submit(Action::PlaceBet, async move {
            bet_or_approve(&token, &lottery, &raw).await
        })
    }

    pub fn stop_game(&mut self) -> Option<Task<W::Signer>> {
        let (_, lottery) = self.write_handles()?;
        self.submit(Action::StopGame, async move {
            lottery.stop_game().await.map(ActionOutcome::Submitted)
        })
    }

    pub fn claim_reward(&mut self) -> Option<Task<W::Signer>> {
        let (_, lottery) = self.write_handles()?;
        self.submit(Action::ClaimReward, async move {
            lottery.claim_reward().await.map(ActionOutcome::Submitted)
        })
    }

    /// Applies a finished call; may start follow-up reads.
    pub fn apply(&mut self, envelope: Envelope<W::Signer>) -> Vec<Task<W::Signer>> {
        if envelope.generation != self.generation {
            info!("dropping result from a previous session");
            return Vec::new();
        }
        match envelope.message {
            AppMessage::Connected(result) => self.on_connected(result),
            AppMessage::BalanceRead { account, result } => {
                if self.view.account != Some(account) {
                    return Vec::new();
                }
                match result {
                    Ok(balance) => self.view.balance = Some(format_token_amount(balance)),
                    Err(err) => self.view.set_error(err.user_message()),
                }
                Vec::new()
            }
            AppMessage::GameStatusRead(result) => {
                match result {
                    Ok(is_stop) => self.view.is_stopped = is_stop,
                    Err(err) => self.view.set_error(err.user_message()),
                }
                Vec::new()
            }
            AppMessage::ActionFinished { action, result } => {
                self.in_flight.remove(&action);
                match result {
                    Ok(ActionOutcome::Submitted(tx)) => {
                        info!(?action, ?tx, "transaction submitted");
                        self.view.set_status(format!(
                            "{} sent ({})",
                            action.label(),
                            hash_preview(&tx)
                        ));
                    }
                    Ok(ActionOutcome::ApprovalSubmitted(tx)) => {
                        info!(?tx, "approval submitted after allowance revert");
                        self.view.set_status(format!(
                            "Token approval sent ({}); place your bet again once it confirms",
                            hash_preview(&tx)
                        ));
                    }
                    Err(err) => {
                        error!(?action, error = %err, "action failed");
                        self.view.set_status(format!("{} failed", action.label()));
                        self.view.set_error(err.user_message());
                    }
                }
                Vec::new()
            }
        }
    }

    fn on_connected(
        &mut self,
        result: Result<Authorization<W::Signer>, ChainError>,
    ) -> Vec<Task<W::Signer>> {
        self.in_flight.remove(&Action::Connect);
        let Some(wallet) = self.wallet.clone() else {
            return Vec::new();
        };
        // Handles are bound whatever the outcome; binding twice is harmless.
        let contracts = self.contracts.get_or_insert_with(|| Contracts {
            token: wallet.token_at(self.addresses.token),
            lottery: wallet.lottery_at(self.addresses.lottery),
        });

        let authorization = match result {
            Ok(authorization) => authorization,
            Err(err) => {
                self.view.set_status("Wallet connection failed");
                self.view.set_error(err.user_message());
                return Vec::new();
            }
        };
        let Some(account) = authorization.accounts.first().copied() else {
            self.view.set_error("Wallet returned no accounts");
            return Vec::new();
        };

        info!(?account, "wallet connected");
        self.session = Some(Session {
            account,
            signer: authorization.signer,
            token_events: Some(contracts.token.subscribe()),
            lottery_events: Some(contracts.lottery.subscribe()),
            provider_changes: Some(wallet.watch_changes()),
        });
        self.view.account = Some(account);
        self.view.connection_label = CONNECTED_LABEL.to_string();
        self.view.set_status("Wallet connected");

        [self.refresh_balance(), self.read_game_status()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Waits for the next event on any live subscription. Never resolves
    /// while disconnected.
    pub async fn next_session_event(&mut self) -> SessionEvent {
        match self.session.as_mut() {
            Some(session) => session.next_event().await,
            None => pending().await,
        }
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) -> Vec<Task<W::Signer>> {
        match event {
            SessionEvent::Token(event) => self.on_token_event(event),
            SessionEvent::Lottery(event) => {
                self.on_lottery_event(event);
                Vec::new()
            }
            SessionEvent::Provider(change) => {
                self.on_provider_change(change);
                Vec::new()
            }
            SessionEvent::Closed(channel) => {
                warn!(?channel, "event subscription closed");
                if let Some(session) = self.session.as_mut() {
                    session.close(channel);
                }
                Vec::new()
            }
        }
    }

    fn session_account(&self) -> Option<Address> {
        self.session.as_ref().map(|s| s.account)
    }

    pub fn on_token_event(
        &mut self,
        event: Result<TokenEvent, ChainError>,
    ) -> Vec<Task<W::Signer>> {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "token event stream error");
                return Vec::new();
            }
        };
        let Some(account) = self.session_account() else {
            return Vec::new();
        };
        if !event.concerns(account) {
            return Vec::new();
        }
        match event {
            TokenEvent::ClaimToken { .. } => self.refresh_balance().into_iter().collect(),
            TokenEvent::Approval { spender, value, .. } => {
                info!(?spender, %value, "approval confirmed");
                Vec::new()
            }
        }
    }

    pub fn on_lottery_event(&mut self, event: Result<LotteryEvent, ChainError>) {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "lottery event stream error");
                return;
            }
        };
        let Some(account) = self.session_account() else {
            return;
        };
        if !event.concerns(account) {
            return;
        }
        match event {
            LotteryEvent::Bet { number, .. } => self.view.bet_number_on_chain = Some(number),
            LotteryEvent::Stop { is_stop } => {
                if is_stop {
                    self.view.is_stopped = true;
                }
            }
            LotteryEvent::ClaimReward { reward, .. } => self.view.reward = Some(reward),
        }
    }

    pub fn on_provider_change(&mut self, change: Result<ProviderChange, ChainError>) {
        let reason = match change {
            Ok(ProviderChange::AccountsChanged(_)) => "Wallet account changed; reconnect to continue",
            Ok(ProviderChange::ChainChanged(_)) => "Network changed; reconnect to continue",
            Err(err) => {
                warn!(error = %err, "provider change stream error");
                return;
            }
        };
        self.reset(reason);
    }

    /// Drops the session and every subscription it owns, then starts over
    /// from a blank view.
    fn reset(&mut self, reason: &str) {
        info!(reason, "resetting session");
        self.session = None;
        self.contracts = None;
        self.in_flight.clear();
        self.generation += 1;
        self.view = GameView::default();
        self.view.set_status(reason);
    }
}

fn parse_bet_number(raw: &str) -> Result<U256, ChainError> {
    let invalid = || ChainError::InvalidInput(format!("'{raw}' is not a valid bet number"));
    let digits = raw.trim();
    // from_dec_str reads an empty string as zero
    if digits.is_empty() {
        return Err(invalid());
    }
    U256::from_dec_str(digits).map_err(|_| invalid())
}

/// Places the bet; if the token refuses for lack of allowance, approves the
/// whole supply for the lottery instead. The bet itself is not retried.
async fn bet_or_approve<T, L>(
    token: &T,
    lottery: &L,
    raw: &str,
) -> Result<ActionOutcome, ChainError>
where
    T: TokenContract,
    L: LotteryContract,
{
    let number = parse_bet_number(raw)?;
    match lottery.bet(number).await {
        Ok(tx) => Ok(ActionOutcome::Submitted(tx)),
        Err(err) if err.kind() == ErrorKind::InsufficientAllowance => {
            info!("bet needs allowance; approving total supply");
            let total_supply = token.total_supply().await?;
            let tx = token.approve(lottery.address(), total_supply).await?;
            Ok(ActionOutcome::ApprovalSubmitted(tx))
        }
        Err(err) => Err(err),
    }
}

fn hash_preview(hash: &TxHash) -> String {
    let full = hex::encode(hash.as_bytes());
    format!("0x{}...{}", &full[..6], &full[full.len() - 4..])
}

pub fn build_wallet(config: &AppConfig) -> Result<Option<KeystoreWallet>> {
    let WalletConfig::Keystore { name, dir } = &config.wallet else {
        return Ok(None);
    };
    let descriptor = wallets::find_wallet(dir, name)?;
    let provider = evm::connect_provider(config.network.url()).map_err(|e| eyre!(e))?;
    info!(wallet = %name, url = %config.network.url(), "using keystore wallet");
    Ok(Some(KeystoreWallet::new(descriptor, provider)))
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let wallet = build_wallet(&config)?;
    let wallet_name = wallet.as_ref().map(|w| w.name().to_string());
    let mut controller = AppController::new(wallet, config.addresses);
    if let Some(name) = wallet_name {
        controller = controller.with_wallet_name(name);
    }
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    tracing::info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    tracing::info!("UI ready");
    let res = run_loop(controller, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<W: WalletProvider>(
    mut controller: AppController<W>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    tracing::info!("Running app loop");
    let mut tasks: FuturesUnordered<Task<W::Signer>> = FuturesUnordered::new();
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            Some(envelope) = tasks.next(), if !tasks.is_empty() => {
                tasks.extend(controller.apply(envelope));
            }
            event = controller.next_session_event() => {
                tasks.extend(controller.handle_session_event(event));
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                let started = match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => None,
                    ui::UserEvent::Connect { passphrase } => controller.connect(passphrase),
                    ui::UserEvent::ClaimToken => controller.claim_token(),
                    ui::UserEvent::PlaceBet { number } => controller.place_bet(number),
                    ui::UserEvent::StopGame => controller.stop_game(),
                    ui::UserEvent::ClaimReward => controller.claim_reward(),
                };
                tasks.extend(started);
            }
        }
        ui::draw(ui_state, &controller.snapshot()).wrap_err("draw failed")?;
    }
    Ok(())
}
