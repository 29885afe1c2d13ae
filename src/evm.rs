//! ethers-rs bindings for the token and lottery contracts, and the keystore
//! wallet that signs for them.

use crate::{
    chain::{
        Authorization,
        ChainError,
        LotteryContract,
        LotteryEvent,
        ProviderChange,
        TokenContract,
        TokenEvent,
        WalletProvider,
    },
    subscription::{
        Subscription,
        SubscriptionSender,
    },
    wallets::{
        self,
        WalletDescriptor,
    },
};
use ethers::{
    contract::{
        ContractError,
        EthLogDecode,
        abigen,
        builders::Event,
    },
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        MiddlewareError,
        Provider,
        ProviderError,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        TxHash,
        U256,
    },
};
use futures::StreamExt;
use std::{
    path::Path,
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
};
use tokio::time;
use tracing::{
    debug,
    info,
    warn,
};

abigen!(
    MockErc20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function totalSupply() external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function claimMockToken() external
        event ClaimToken(address claimer)
        event Approval(address indexed owner, address indexed spender, uint256 value)
    ]"#
);

abigen!(
    Lottery,
    r#"[
        function bet(uint256 number) external
        function stopGame() external
        function claimReward() external
        function isStop() external view returns (bool)
        event Bet(address player, uint256 number)
        event Stop(bool isStop)
        event ClaimReward(address winner, uint256 reward)
    ]"#
);

const CHANGE_POLL_INTERVAL: Duration = Duration::from_secs(4);
const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(2);

type ReadClient = Provider<Http>;
type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub type EvmSigner = Arc<SignerClient>;

pub fn connect_provider(rpc_url: &str) -> Result<Arc<ReadClient>, ChainError> {
    let provider = Provider::<Http>::try_from(rpc_url)
        .map_err(|e| ChainError::Rpc {
            message: format!("invalid RPC url '{rpc_url}': {e}"),
            provider_message: None,
        })?
        .interval(EVENT_POLL_INTERVAL);
    Ok(Arc::new(provider))
}

fn classify_contract_error<M: Middleware>(err: ContractError<M>) -> ChainError {
    if let Some(reason) = err.decode_revert::<String>() {
        return ChainError::reverted(reason);
    }
    let provider_message = err
        .as_middleware_error()
        .and_then(|e| e.as_error_response())
        .map(|response| response.message.clone());
    classify_message(err.to_string(), provider_message)
}

fn classify_provider_error(err: ProviderError) -> ChainError {
    let provider_message = err.as_error_response().map(|r| r.message.clone());
    classify_message(err.to_string(), provider_message)
}

fn classify_message(message: String, provider_message: Option<String>) -> ChainError {
    match provider_message {
        Some(text) if text.starts_with("execution reverted: ") => ChainError::reverted(text),
        provider_message => ChainError::Rpc {
            message,
            provider_message,
        },
    }
}

impl From<MockErc20Events> for TokenEvent {
    fn from(event: MockErc20Events) -> Self {
        match event {
            MockErc20Events::ClaimTokenFilter(e) => TokenEvent::ClaimToken {
                claimer: e.claimer,
            },
            MockErc20Events::ApprovalFilter(e) => TokenEvent::Approval {
                owner: e.owner,
                spender: e.spender,
                value: e.value,
            },
        }
    }
}

impl From<LotteryEvents> for LotteryEvent {
    fn from(event: LotteryEvents) -> Self {
        match event {
            LotteryEvents::BetFilter(e) => LotteryEvent::Bet {
                player: e.player,
                number: e.number,
            },
            LotteryEvents::StopFilter(e) => LotteryEvent::Stop { is_stop: e.is_stop },
            LotteryEvents::ClaimRewardFilter(e) => LotteryEvent::ClaimReward {
                winner: e.winner,
                reward: e.reward,
            },
        }
    }
}

/// Forwards decoded contract logs into `sender` until the receiver goes away.
async fn forward_events<M, D, T>(
    events: Event<Arc<M>, M, D>,
    sender: SubscriptionSender<T>,
) where
    M: Middleware + 'static,
    D: EthLogDecode + Send + 'static,
    T: From<D> + Send + 'static,
{
    let mut stream = match events.stream().await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = sender.send(Err(classify_contract_error(err)));
            return;
        }
    };
    while let Some(item) = stream.next().await {
        let item = item.map(T::from).map_err(classify_contract_error);
        if sender.send(item).is_err() {
            break;
        }
    }
    debug!("event stream finished");
}

#[derive(Clone)]
pub struct EvmToken {
    address: Address,
    reader: MockErc20<ReadClient>,
    writer: Option<MockErc20<SignerClient>>,
}

impl EvmToken {
    fn writer(&self) -> Result<&MockErc20<SignerClient>, ChainError> {
        self.writer.as_ref().ok_or(ChainError::NoSigner)
    }
}

impl TokenContract for EvmToken {
    type Signer = EvmSigner;

    fn address(&self) -> Address {
        self.address
    }

    fn connect(&self, signer: &EvmSigner) -> Self {
        Self {
            address: self.address,
            reader: self.reader.clone(),
            writer: Some(MockErc20::new(self.address, signer.clone())),
        }
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, ChainError> {
        self.reader
            .balance_of(owner)
            .call()
            .await
            .map_err(classify_contract_error)
    }

    async fn total_supply(&self) -> Result<U256, ChainError> {
        self.reader
            .total_supply()
            .call()
            .await
            .map_err(classify_contract_error)
    }

    async fn claim_mock_token(&self) -> Result<TxHash, ChainError> {
        let call = self.writer()?.claim_mock_token();
        let pending = call.send().await.map_err(classify_contract_error)?;
        Ok(pending.tx_hash())
    }

    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash, ChainError> {
        let call = self.writer()?.approve(spender, amount);
        let pending = call.send().await.map_err(classify_contract_error)?;
        Ok(pending.tx_hash())
    }

    fn subscribe(&self) -> Subscription<TokenEvent> {
        let contract = self.reader.clone();
        Subscription::spawn(move |sender| async move {
            forward_events(contract.events(), sender).await;
        })
    }
}

#[derive(Clone)]
pub struct EvmLottery {
    address: Address,
    reader: Lottery<ReadClient>,
    writer: Option<Lottery<SignerClient>>,
}

impl EvmLottery {
    fn writer(&self) -> Result<&Lottery<SignerClient>, ChainError> {
        self.writer.as_ref().ok_or(ChainError::NoSigner)
    }
}

impl LotteryContract for EvmLottery {
    type Signer = EvmSigner;

    fn address(&self) -> Address {
        self.address
    }

    fn connect(&self, signer: &EvmSigner) -> Self {
        Self {
            address: self.address,
            reader: self.reader.clone(),
            writer: Some(Lottery::new(self.address, signer.clone())),
        }
    }

    async fn bet(&self, number: U256) -> Result<TxHash, ChainError> {
        let call = self.writer()?.bet(number);
        let pending = call.send().await.map_err(classify_contract_error)?;
        Ok(pending.tx_hash())
    }

    async fn stop_game(&self) -> Result<TxHash, ChainError> {
        let call = self.writer()?.stop_game();
        let pending = call.send().await.map_err(classify_contract_error)?;
        Ok(pending.tx_hash())
    }

    async fn claim_reward(&self) -> Result<TxHash, ChainError> {
        let call = self.writer()?.claim_reward();
        let pending = call.send().await.map_err(classify_contract_error)?;
        Ok(pending.tx_hash())
    }

    async fn is_stop(&self) -> Result<bool, ChainError> {
        self.reader
            .is_stop()
            .call()
            .await
            .map_err(classify_contract_error)
    }

    fn subscribe(&self) -> Subscription<LotteryEvent> {
        let contract = self.reader.clone();
        Subscription::spawn(move |sender| async move {
            forward_events(contract.events(), sender).await;
        })
    }
}

async fn keystore_modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
}

/// Encrypted keystore plus the RPC endpoint it signs against.
pub struct KeystoreWallet {
    descriptor: WalletDescriptor,
    provider: Arc<ReadClient>,
}

impl KeystoreWallet {
    pub fn new(descriptor: WalletDescriptor, provider: Arc<ReadClient>) -> Self {
        Self {
            descriptor,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl WalletProvider for KeystoreWallet {
    type Signer = EvmSigner;
    type Token = EvmToken;
    type Lottery = EvmLottery;

    async fn request_accounts(
        &self,
        passphrase: String,
    ) -> Result<Authorization<EvmSigner>, ChainError> {
        let descriptor = self.descriptor.clone();
        let wallet = tokio::task::spawn_blocking(move || {
            wallets::unlock_wallet(&descriptor, &passphrase)
        })
        .await
        .map_err(|e| ChainError::Rejected(format!("wallet unlock aborted: {e}")))?
        .map_err(|e| ChainError::Rejected(e.to_string()))?;

        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(classify_provider_error)?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let account = wallet.address();
        info!(wallet = %self.descriptor.name, ?account, %chain_id, "wallet unlocked");

        let signer = Arc::new(SignerMiddleware::new((*self.provider).clone(), wallet));
        Ok(Authorization {
            accounts: vec![account],
            signer,
        })
    }

    fn token_at(&self, address: Address) -> EvmToken {
        EvmToken {
            address,
            reader: MockErc20::new(address, self.provider.clone()),
            writer: None,
        }
    }

    fn lottery_at(&self, address: Address) -> EvmLottery {
        EvmLottery {
            address,
            reader: Lottery::new(address, self.provider.clone()),
            writer: None,
        }
    }

    fn watch_changes(&self) -> Subscription<ProviderChange> {
        let provider = self.provider.clone();
        let keystore = self.descriptor.path.clone();
        Subscription::spawn(move |sender| async move {
            let mut ticker = time::interval(CHANGE_POLL_INTERVAL);
            let mut known_chain: Option<u64> = None;
            let mut known_modified = keystore_modified(&keystore).await;
            loop {
                ticker.tick().await;
                match provider.get_chainid().await {
                    Ok(id) => {
                        let id = id.as_u64();
                        match known_chain {
                            Some(previous) if previous != id => {
                                warn!(previous, current = id, "chain changed");
                                if sender.send(Ok(ProviderChange::ChainChanged(id))).is_err() {
                                    break;
                                }
                                known_chain = Some(id);
                            }
                            Some(_) => {}
                            None => known_chain = Some(id),
                        }
                    }
                    Err(err) => warn!(?err, "chain id poll failed"),
                }
                let current_modified = keystore_modified(&keystore).await;
                if current_modified != known_modified {
                    warn!(path = %keystore.display(), "wallet keystore changed on disk");
                    known_modified = current_modified;
                    if sender
                        .send(Ok(ProviderChange::AccountsChanged(Vec::new())))
                        .is_err()
                    {
                        break;
                    }
                }
            }
        })
    }
}
