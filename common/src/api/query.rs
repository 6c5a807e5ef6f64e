use crate::block::BlockNumber;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockParams {
    pub block_num: BlockNumber,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCurrencyBalanceParams {
    pub account: String,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub account: String,
    pub symbol: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAccountParams {
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_name: String,
    pub created_at_block: BlockNumber,
}

/// Error body returned by the query and control interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}
