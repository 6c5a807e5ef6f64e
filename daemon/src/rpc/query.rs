use crate::core::engine::{ChainState, ModuleError};
use actix_web::{
    http::StatusCode,
    web::{self, Data, Json},
    HttpResponse, ResponseError,
};
use mockchain_common::{
    api::{
        CurrencyBalance, ErrorResponse, GetAccountParams, GetBlockParams,
        GetCurrencyBalanceParams,
    },
    block::BlockNumber,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Block {0} not found")]
    BlockNotFound(BlockNumber),

    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl ResponseError for QueryError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BlockNotFound(_) | Self::AccountNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(ErrorResponse {
            code: status.as_u16(),
            message: self.to_string(),
        })
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    let json = web::JsonConfig::default()
        .error_handler(|err, _| QueryError::InvalidBody(err.to_string()).into());

    cfg.app_data(json).service(
        web::scope("/v1/chain")
            .route("/get_info", web::post().to(get_info))
            .route("/get_info", web::get().to(get_info))
            .route("/get_block", web::post().to(get_block))
            .route("/get_abi", web::get().to(get_abi))
            .route("/get_currency_balance", web::post().to(get_currency_balance))
            .route("/get_account", web::post().to(get_account)),
    );
}

async fn get_info(state: Data<ChainState>) -> HttpResponse {
    HttpResponse::Ok().json(state.chain_info())
}

async fn get_block(
    state: Data<ChainState>,
    params: Json<GetBlockParams>,
) -> Result<HttpResponse, QueryError> {
    let block = state
        .get_block(params.block_num)
        .ok_or(QueryError::BlockNotFound(params.block_num))?;
    Ok(HttpResponse::Ok().json(block))
}

async fn get_abi(state: Data<ChainState>) -> HttpResponse {
    HttpResponse::Ok().json(state.abi())
}

async fn get_currency_balance(
    state: Data<ChainState>,
    params: Json<GetCurrencyBalanceParams>,
) -> Result<HttpResponse, QueryError> {
    let params = params.into_inner();
    let amount = state
        .modules()
        .currency_balance(&params.account, &params.symbol)?;
    Ok(HttpResponse::Ok().json(CurrencyBalance {
        account: params.account,
        symbol: params.symbol,
        amount,
    }))
}

async fn get_account(
    state: Data<ChainState>,
    params: Json<GetAccountParams>,
) -> Result<HttpResponse, QueryError> {
    let params = params.into_inner();
    let account = state
        .modules()
        .account(&params.account_name)?
        .ok_or(QueryError::AccountNotFound(params.account_name))?;
    Ok(HttpResponse::Ok().json(account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::EngineParams;
    use actix_web::{test, App};
    use mockchain_common::{
        api::{ChainId, ChainInfo, PacingMode},
        config::TOKEN_MODULE,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn state() -> Arc<ChainState> {
        Arc::new(ChainState::new(EngineParams {
            chain_id: ChainId::from("alpha"),
            start_time: 0,
            block_interval_ms: 500,
            start_block: 1,
            end_block: 10,
            abi: json!({ "version": "test" }),
            pacing: PacingMode::AsFastAsPossible,
        }))
    }

    #[actix_web::test]
    async fn test_query_routes() {
        let state = state();
        state.modules().enable(TOKEN_MODULE).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(Data::from(Arc::clone(&state)))
                .configure(configure),
        )
        .await;

        let request = test::TestRequest::get()
            .uri("/v1/chain/get_info")
            .to_request();
        let info: ChainInfo = test::call_and_read_body_json(&app, request).await;
        assert_eq!(info.chain_id, ChainId::from("alpha"));
        assert_eq!(info.end_block, 10);

        let request = test::TestRequest::get().uri("/v1/chain/get_abi").to_request();
        let abi: Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(abi["version"], "test");

        let request = test::TestRequest::post()
            .uri("/v1/chain/get_currency_balance")
            .set_json(json!({ "account": "alice", "symbol": "SYS" }))
            .to_request();
        let balance: CurrencyBalance = test::call_and_read_body_json(&app, request).await;
        assert_eq!(balance.amount, 0);
    }

    #[actix_web::test]
    async fn test_query_errors() {
        let app = test::init_service(
            App::new()
                .app_data(Data::from(state()))
                .configure(configure),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/v1/chain/get_block")
            .set_json(json!({ "block_num": 4 }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: ErrorResponse = test::read_body_json(response).await;
        assert_eq!(error.code, 404);
        assert_eq!(error.message, "Block 4 not found");

        let request = test::TestRequest::post()
            .uri("/v1/chain/get_block")
            .set_json(json!({ "number": 4 }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Accounts module was never initialized
        let request = test::TestRequest::post()
            .uri("/v1/chain/get_account")
            .set_json(json!({ "account_name": "alice" }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = test::read_body_json(response).await;
        assert_eq!(error.message, "Module 'accounts' is not enabled on this chain");
    }
}
