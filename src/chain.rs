//! Wallet and contract boundary.
//!
//! The controller only talks to these traits. `evm` implements them on top of
//! an ethers RPC provider, `test_helpers` on top of an in-memory ledger.

use crate::subscription::Subscription;
use ethers::types::{
    Address,
    TxHash,
    U256,
};
use std::future::Future;

/// Revert reason the ERC20 token raises when the lottery may not pull the
/// bet amount yet.
pub const INSUFFICIENT_ALLOWANCE_REASON: &str = "ERC20: insufficient allowance";
const REVERT_PREFIX: &str = "execution reverted: ";

pub const MISSING_WALLET_MESSAGE: &str =
    "Please select a wallet with --wallet <name> to interact";

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ChainError {
    #[error("{}", MISSING_WALLET_MESSAGE)]
    WalletMissing,
    #[error("{0}")]
    Rejected(String),
    #[error("execution reverted: {reason}")]
    Reverted { reason: String },
    #[error("{message}")]
    Rpc {
        message: String,
        provider_message: Option<String>,
    },
    #[error("contract handle is not bound to a signer")]
    NoSigner,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    InsufficientAllowance,
    Other,
}

impl ChainError {
    pub fn reverted(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = reason
            .strip_prefix(REVERT_PREFIX)
            .map(str::to_owned)
            .unwrap_or(reason);
        ChainError::Reverted { reason }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Reverted { reason } if reason == INSUFFICIENT_ALLOWANCE_REASON => {
                ErrorKind::InsufficientAllowance
            }
            _ => ErrorKind::Other,
        }
    }

    /// Message supplied by the node or contract, if any.
    pub fn provider_message(&self) -> Option<String> {
        match self {
            ChainError::Reverted { reason } => Some(format!("{REVERT_PREFIX}{reason}")),
            ChainError::Rpc {
                provider_message, ..
            } => provider_message.clone(),
            _ => None,
        }
    }

    /// Flat string shown in the error panel.
    pub fn user_message(&self) -> String {
        self.provider_message().unwrap_or_else(|| self.to_string())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenEvent {
    ClaimToken {
        claimer: Address,
    },
    Approval {
        owner: Address,
        spender: Address,
        value: U256,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LotteryEvent {
    Bet { player: Address, number: U256 },
    Stop { is_stop: bool },
    ClaimReward { winner: Address, reward: U256 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderChange {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// Events that name the account they are about.
pub trait AccountScoped {
    /// `None` for events that concern every account.
    fn subject(&self) -> Option<Address>;

    fn concerns(&self, account: Address) -> bool {
        self.subject().is_none_or(|subject| subject == account)
    }
}

impl AccountScoped for TokenEvent {
    fn subject(&self) -> Option<Address> {
        match self {
            TokenEvent::ClaimToken { claimer } => Some(*claimer),
            TokenEvent::Approval { owner, .. } => Some(*owner),
        }
    }
}

impl AccountScoped for LotteryEvent {
    fn subject(&self) -> Option<Address> {
        match self {
            LotteryEvent::Bet { player, .. } => Some(*player),
            LotteryEvent::Stop { .. } => None,
            LotteryEvent::ClaimReward { winner, .. } => Some(*winner),
        }
    }
}

pub struct Authorization<S> {
    pub accounts: Vec<Address>,
    pub signer: S,
}

pub trait TokenContract: Clone + Send + Sync + 'static {
    type Signer;

    fn address(&self) -> Address;

    /// Same contract, rebound to `signer` for writes.
    fn connect(&self, signer: &Self::Signer) -> Self;

    fn balance_of(
        &self,
        owner: Address,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send;

    fn total_supply(&self) -> impl Future<Output = Result<U256, ChainError>> + Send;

    fn claim_mock_token(&self) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn subscribe(&self) -> Subscription<TokenEvent>;
}

pub trait LotteryContract: Clone + Send + Sync + 'static {
    type Signer;

    fn address(&self) -> Address;

    fn connect(&self, signer: &Self::Signer) -> Self;

    fn bet(&self, number: U256) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn stop_game(&self) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn claim_reward(&self) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn is_stop(&self) -> impl Future<Output = Result<bool, ChainError>> + Send;

    fn subscribe(&self) -> Subscription<LotteryEvent>;
}

pub trait WalletProvider: Send + Sync + 'static {
    type Signer: Clone + Send + Sync + 'static;
    type Token: TokenContract<Signer = Self::Signer>;
    type Lottery: LotteryContract<Signer = Self::Signer>;

    /// Unlocks the wallet and returns its accounts plus a signer for them.
    fn request_accounts(
        &self,
        passphrase: String,
    ) -> impl Future<Output = Result<Authorization<Self::Signer>, ChainError>> + Send;

    /// Token handle bound to the read-only provider.
    fn token_at(&self, address: Address) -> Self::Token;

    /// Lottery handle bound to the read-only provider.
    fn lottery_at(&self, address: Address) -> Self::Lottery;

    fn watch_changes(&self) -> Subscription<ProviderChange>;
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn reverted__strips_node_prefix_from_reason() {
        // when
        let err = ChainError::reverted("execution reverted: ERC20: insufficient allowance");

        // then
        assert_eq!(
            err,
            ChainError::Reverted {
                reason: INSUFFICIENT_ALLOWANCE_REASON.to_string()
            }
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientAllowance);
    }

    #[test]
    fn kind__other_reverts_are_not_allowance_failures() {
        let err = ChainError::reverted("ERC20: transfer amount exceeds balance");
        assert_eq!(err.kind(), ErrorKind::Other);

        let err = ChainError::Rpc {
            message: "(code: -32000, message: ERC20: insufficient allowance)".into(),
            provider_message: Some(INSUFFICIENT_ALLOWANCE_REASON.into()),
        };
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn user_message__prefers_provider_message() {
        // given
        let err = ChainError::Rpc {
            message: "(code: -32603, message: internal error)".into(),
            provider_message: Some("nonce too low".into()),
        };

        // then
        assert_eq!(err.user_message(), "nonce too low");
    }

    #[test]
    fn user_message__falls_back_to_error_text() {
        let err = ChainError::Rpc {
            message: "connection refused".into(),
            provider_message: None,
        };
        assert_eq!(err.user_message(), "connection refused");
        assert_eq!(
            ChainError::NoSigner.user_message(),
            "contract handle is not bound to a signer"
        );
    }

    #[test]
    fn user_message__missing_wallet_names_the_flag() {
        assert_eq!(
            ChainError::WalletMissing.user_message(),
            "Please select a wallet with --wallet <name> to interact"
        );
    }

    #[test]
    fn concerns__matches_addresses_parsed_from_any_case() {
        // given
        let checksummed: Address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
            .parse()
            .unwrap();
        let lowercase: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
            .parse()
            .unwrap();
        let event = LotteryEvent::Bet {
            player: checksummed,
            number: U256::from(7),
        };

        // then
        assert!(event.concerns(lowercase));
        assert!(!event.concerns(Address::repeat_byte(0x11)));
        assert!(LotteryEvent::Stop { is_stop: true }.concerns(lowercase));
    }
}
