use crate::core::error::EngineError;
use mockchain_common::{
    api::{AccountInfo, ActionDescriptor},
    block::BlockNumber,
    config::{ACCOUNTS_MODULE, TOKEN_MODULE},
};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Module '{0}' is not enabled on this chain")]
    Disabled(&'static str),

    #[error("Invalid data for action '{action}': {reason}")]
    InvalidAction { action: String, reason: String },

    #[error("Account '{account}' holds {balance} {symbol}, cannot move {quantity}")]
    InsufficientBalance {
        account: String,
        symbol: String,
        balance: u64,
        quantity: u64,
    },

    #[error("Balance of '{account}' in {symbol} would overflow")]
    Overflow { account: String, symbol: String },

    #[error("Account '{0}' already exists")]
    AccountExists(String),
}

#[derive(Deserialize)]
struct IssueData {
    to: String,
    quantity: u64,
    symbol: String,
}

#[derive(Deserialize)]
struct TransferData {
    from: String,
    to: String,
    quantity: u64,
    symbol: String,
}

#[derive(Deserialize)]
struct NewAccountData {
    name: String,
}

fn parse_data<T: DeserializeOwned>(action: &ActionDescriptor) -> Result<T, ModuleError> {
    serde_json::from_value(action.data.clone()).map_err(|e| ModuleError::InvalidAction {
        action: action.name.clone(),
        reason: e.to_string(),
    })
}

// Balances keyed by (owner, symbol)
#[derive(Debug, Default)]
struct TokenModule {
    balances: HashMap<(String, String), u64>,
}

impl TokenModule {
    fn balance(&self, owner: &str, symbol: &str) -> u64 {
        self.balances
            .get(&(owner.to_owned(), symbol.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    fn credit(&mut self, owner: &str, symbol: &str, quantity: u64) -> Result<(), ModuleError> {
        let balance = self
            .balances
            .entry((owner.to_owned(), symbol.to_owned()))
            .or_insert(0);
        *balance = balance
            .checked_add(quantity)
            .ok_or_else(|| ModuleError::Overflow {
                account: owner.to_owned(),
                symbol: symbol.to_owned(),
            })?;
        Ok(())
    }

    fn issue(&mut self, data: IssueData) -> Result<(), ModuleError> {
        self.credit(&data.to, &data.symbol, data.quantity)
    }

    fn transfer(&mut self, data: TransferData) -> Result<(), ModuleError> {
        let balance = self.balance(&data.from, &data.symbol);
        if balance < data.quantity {
            return Err(ModuleError::InsufficientBalance {
                account: data.from,
                symbol: data.symbol,
                balance,
                quantity: data.quantity,
            });
        }

        // Debit first so a self transfer never passes through balance + quantity
        let sender = (data.from, data.symbol);
        self.balances.insert(sender.clone(), balance - data.quantity);
        if let Err(e) = self.credit(&data.to, &sender.1, data.quantity) {
            self.balances.insert(sender, balance);
            return Err(e);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AccountsModule {
    accounts: BTreeMap<String, BlockNumber>,
}

impl AccountsModule {
    fn create(&mut self, block_num: BlockNumber, data: NewAccountData) -> Result<(), ModuleError> {
        if self.accounts.contains_key(&data.name) {
            return Err(ModuleError::AccountExists(data.name));
        }
        self.accounts.insert(data.name, block_num);
        Ok(())
    }
}

/// Mocking modules enabled on a chain and the state they track
#[derive(Debug, Default)]
pub struct ModuleState {
    token: Option<TokenModule>,
    accounts: Option<AccountsModule>,
}

impl ModuleState {
    pub fn enable(&mut self, name: &str) -> Result<(), EngineError> {
        if self.is_enabled(name) {
            return Err(EngineError::ModuleInit {
                module: name.to_owned(),
                reason: "module is already initialized".to_owned(),
            });
        }

        match name {
            TOKEN_MODULE => self.token = Some(TokenModule::default()),
            ACCOUNTS_MODULE => self.accounts = Some(AccountsModule::default()),
            _ => return Err(EngineError::UnknownModule(name.to_owned())),
        }
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        match name {
            TOKEN_MODULE => self.token.is_some(),
            ACCOUNTS_MODULE => self.accounts.is_some(),
            _ => false,
        }
    }

    /// Apply a scripted action produced in `block_num`.
    /// Actions that no enabled module handles are only carried by the block.
    pub fn apply(
        &mut self,
        block_num: BlockNumber,
        action: &ActionDescriptor,
    ) -> Result<(), ModuleError> {
        match (action.name.as_str(), &mut self.token, &mut self.accounts) {
            ("issue", Some(token), _) => token.issue(parse_data(action)?),
            ("transfer", Some(token), _) => token.transfer(parse_data(action)?),
            ("newaccount", _, Some(accounts)) => accounts.create(block_num, parse_data(action)?),
            _ => Ok(()),
        }
    }

    pub fn currency_balance(&self, account: &str, symbol: &str) -> Result<u64, ModuleError> {
        self.token
            .as_ref()
            .map(|token| token.balance(account, symbol))
            .ok_or(ModuleError::Disabled(TOKEN_MODULE))
    }

    pub fn account(&self, name: &str) -> Result<Option<AccountInfo>, ModuleError> {
        let accounts = self
            .accounts
            .as_ref()
            .ok_or(ModuleError::Disabled(ACCOUNTS_MODULE))?;

        Ok(accounts.accounts.get(name).map(|block_num| AccountInfo {
            account_name: name.to_owned(),
            created_at_block: *block_num,
        }))
    }
}
