use super::RpcClientError;
use crate::{
    api::{
        AccountInfo, BlockInfo, ChainInfo, CurrencyBalance, ErrorResponse, GetAccountParams,
        GetBlockParams, GetCurrencyBalanceParams,
    },
    block::BlockNumber,
};
use log::trace;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

/// JSON client for the query interface of one chain
#[derive(Debug, Clone)]
pub struct ChainRpcClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChainRpcClient {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, method: &str) -> String {
        format!("{}/v1/chain/{}", self.base_url, method)
    }

    async fn call<P: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R, RpcClientError> {
        let url = self.url_for(method);
        trace!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|source| RpcClientError::Request {
                url: url.clone(),
                source,
            })?;

        Self::read_response(url, response).await
    }

    async fn get<R: DeserializeOwned>(&self, method: &str) -> Result<R, RpcClientError> {
        let url = self.url_for(method);
        trace!("GET {}", url);
        let response =
            self.http
                .get(&url)
                .send()
                .await
                .map_err(|source| RpcClientError::Request {
                    url: url.clone(),
                    source,
                })?;

        Self::read_response(url, response).await
    }

    async fn read_response<R: DeserializeOwned>(
        url: String,
        response: reqwest::Response,
    ) -> Result<R, RpcClientError> {
        let status = response.status();
        if !status.is_success() {
            // Fall back on the HTTP status when the body is not an error object
            let (code, message) = match response.json::<ErrorResponse>().await {
                Ok(error) => (error.code, error.message),
                Err(_) => (status.as_u16(), status.to_string()),
            };
            return Err(RpcClientError::Server { code, message });
        }

        response
            .json()
            .await
            .map_err(|source| RpcClientError::InvalidResponse { url, source })
    }

    pub async fn get_info(&self) -> Result<ChainInfo, RpcClientError> {
        self.call("get_info", &json!({})).await
    }

    pub async fn get_block(&self, block_num: BlockNumber) -> Result<BlockInfo, RpcClientError> {
        self.call("get_block", &GetBlockParams { block_num }).await
    }

    pub async fn get_abi(&self) -> Result<Value, RpcClientError> {
        self.get("get_abi").await
    }

    pub async fn get_currency_balance(
        &self,
        account: &str,
        symbol: &str,
    ) -> Result<CurrencyBalance, RpcClientError> {
        let params = GetCurrencyBalanceParams {
            account: account.to_owned(),
            symbol: symbol.to_owned(),
        };
        self.call("get_currency_balance", &params).await
    }

    pub async fn get_account(&self, account_name: &str) -> Result<AccountInfo, RpcClientError> {
        let params = GetAccountParams {
            account_name: account_name.to_owned(),
        };
        self.call("get_account", &params).await
    }
}
