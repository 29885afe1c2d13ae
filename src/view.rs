use ethers::{
    types::{
        Address,
        U256,
    },
    utils::format_ether,
};
use tracing::error;

pub const CONNECT_LABEL: &str = "Connect Wallet";
pub const CONNECTED_LABEL: &str = "Wallet Connected";
pub const BET_AMOUNT_NOTICE: &str = "Bet amount: 100";
pub const APPROVAL_HINT: &str =
    "If this is your first time playing, you must have approved the token before you can bet.";

/// Everything the screen shows. Mirrors chain state after reads and events;
/// nothing here is persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameView {
    pub account: Option<Address>,
    pub connection_label: String,
    pub balance: Option<String>,
    pub bet_input: String,
    pub bet_number_on_chain: Option<U256>,
    pub is_stopped: bool,
    pub reward: Option<U256>,
    pub error_message: Option<String>,
    pub status: String,
}

impl Default for GameView {
    fn default() -> Self {
        Self {
            account: None,
            connection_label: CONNECT_LABEL.to_string(),
            balance: None,
            bet_input: String::new(),
            bet_number_on_chain: None,
            is_stopped: false,
            reward: None,
            error_message: None,
            status: String::from("Ready"),
        }
    }
}

impl GameView {
    /// Replaces the previous error; errors are never cleared otherwise.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.error_message = Some(message);
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }
}

pub fn is_dealer(account: Option<Address>, dealer: Address) -> bool {
    account == Some(dealer)
}

/// Which controls are on screen.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Controls {
    pub claim_token: bool,
    pub bet_form: bool,
    pub claim_reward: bool,
    pub stop_game: bool,
}

impl Controls {
    pub fn derive(view: &GameView, dealer: Address) -> Self {
        let connected = view.account.is_some();
        let dealer = is_dealer(view.account, dealer);
        Self {
            claim_token: connected,
            bet_form: connected && !dealer,
            claim_reward: view.is_stopped && !dealer,
            stop_game: dealer && !view.is_stopped,
        }
    }
}

/// 18-decimal token amount in human units, e.g. `1.0` or `2.5`.
pub fn format_token_amount(amount: U256) -> String {
    let raw = format_ether(amount);
    match raw.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                format!("{whole}.0")
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => format!("{raw}.0"),
    }
}
