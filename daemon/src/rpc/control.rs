use super::EndpointError;
use crate::core::{ChainBackend, ChainRuntime, Controller, ControllerError, RuntimeState};
use actix_web::{
    dev::ServerHandle,
    http::StatusCode,
    web::{self, Data, Json, Path},
    App, HttpResponse, HttpServer, ResponseError,
};
use log::{info, warn};
use mockchain_common::api::{ChainDescriptor, ErrorResponse, NewChainInfo};
use serde::{Deserialize, Serialize};
use std::{net::TcpListener, sync::Arc};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl ResponseError for ControlError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Controller(e) => match e {
                ControllerError::NotFound(_) => StatusCode::NOT_FOUND,
                ControllerError::DuplicateChain(_)
                | ControllerError::PortInUse(_)
                | ControllerError::Stopping => StatusCode::CONFLICT,
                ControllerError::InvalidChainConfig(_) | ControllerError::ModuleInit { .. } => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
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

/// Public view of a registered chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatus {
    #[serde(flatten)]
    pub info: NewChainInfo,
    pub state: RuntimeState,
    pub ship_listening: bool,
    pub rpc_listening: bool,
}

impl ChainStatus {
    pub async fn of<B: ChainBackend>(runtime: &ChainRuntime<B>) -> Self {
        let (ship_listening, rpc_listening) = runtime.network().listening().await;
        Self {
            info: runtime.info().clone(),
            state: runtime.state(),
            ship_listening,
            rpc_listening,
        }
    }
}

type Shared<B> = Data<Controller<B>>;

async fn list_chains<B: ChainBackend>(controller: Shared<B>) -> Result<HttpResponse, ControlError> {
    let mut chains = Vec::new();
    for chain_id in controller.chain_ids() {
        // Skip chains destroyed since the listing
        if let Ok(runtime) = controller.get_runtime(&chain_id) {
            chains.push(ChainStatus::of(&runtime).await);
        }
    }
    Ok(HttpResponse::Ok().json(chains))
}

async fn create_chain<B: ChainBackend>(
    controller: Shared<B>,
    descriptor: Json<ChainDescriptor>,
) -> Result<HttpResponse, ControlError> {
    let info = controller.initialize_chain(descriptor.into_inner()).await?;
    Ok(HttpResponse::Created().json(info))
}

async fn get_chain<B: ChainBackend>(
    controller: Shared<B>,
    chain_id: Path<String>,
) -> Result<HttpResponse, ControlError> {
    let runtime = controller.get_runtime(chain_id.as_str())?;
    Ok(HttpResponse::Ok().json(ChainStatus::of(&runtime).await))
}

async fn destroy_chain<B: ChainBackend>(
    controller: Shared<B>,
    chain_id: Path<String>,
) -> Result<HttpResponse, ControlError> {
    controller.destroy_chain(chain_id.as_str()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn chain_up<B: ChainBackend>(
    controller: Shared<B>,
    chain_id: Path<String>,
) -> Result<HttpResponse, ControlError> {
    controller.chain_network_up(chain_id.as_str()).await?;
    get_chain(controller, chain_id).await
}

async fn chain_down<B: ChainBackend>(
    controller: Shared<B>,
    chain_id: Path<String>,
) -> Result<HttpResponse, ControlError> {
    controller.chain_network_down(chain_id.as_str()).await?;
    get_chain(controller, chain_id).await
}

async fn full_stop<B: ChainBackend>(controller: Shared<B>) -> Result<HttpResponse, ControlError> {
    controller.full_stop().await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure<B: ChainBackend>(cfg: &mut web::ServiceConfig) {
    let json = web::JsonConfig::default()
        .error_handler(|err, _| ControlError::InvalidBody(err.to_string()).into());

    cfg.app_data(json)
        .route("/chains", web::get().to(list_chains::<B>))
        .route("/chains", web::post().to(create_chain::<B>))
        .route("/chains/{id}", web::get().to(get_chain::<B>))
        .route("/chains/{id}", web::delete().to(destroy_chain::<B>))
        .route("/chains/{id}/up", web::post().to(chain_up::<B>))
        .route("/chains/{id}/down", web::post().to(chain_down::<B>))
        .route("/stop", web::post().to(full_stop::<B>));
}

/// HTTP API driving a controller from outside the process
pub struct ControlServer {
    port: u16,
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

impl ControlServer {
    pub fn start<B: ChainBackend>(
        controller: Arc<Controller<B>>,
        host: &str,
        port: u16,
    ) -> Result<Self, EndpointError> {
        let listener =
            TcpListener::bind((host, port)).map_err(|source| EndpointError::Bind { port, source })?;
        let port = listener.local_addr()?.port();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(Data::from(Arc::clone(&controller)))
                .configure(configure::<B>)
        })
        .disable_signals()
        .workers(1)
        .listen(listener)?
        .run();

        let handle = server.handle();
        let task = tokio::spawn(server);
        info!("Control server listening on {}:{}", host, port);

        Ok(Self { port, handle, task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn stop(self) {
        info!("Stopping control server...");
        self.handle.stop(true).await;
        match self.task.await {
            Ok(Ok(())) => info!("Control server is now stopped!"),
            Ok(Err(e)) => warn!("Control server stopped with error: {}", e),
            Err(e) => warn!("Control server task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SimulatedBackend;
    use actix_web::test;
    use mockchain_common::api::PacingMode;
    use serde_json::json;

    #[actix_web::test]
    async fn test_chain_lifecycle_over_http() {
        let controller = Arc::new(Controller::new());
        let app = test::init_service(
            App::new()
                .app_data(Data::from(Arc::clone(&controller)))
                .configure(configure::<SimulatedBackend>),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/chains")
            .set_json(json!({ "chain_id": "alpha", "pacing": "fast", "end_block": 20 }))
            .to_request();
        let info: NewChainInfo = test::call_and_read_body_json(&app, request).await;
        assert_eq!(info.chain_id.as_str(), "alpha");
        assert_eq!(info.pacing, PacingMode::AsFastAsPossible);

        // Same id again
        let request = test::TestRequest::post()
            .uri("/chains")
            .set_json(json!({ "chain_id": "alpha" }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let request = test::TestRequest::post().uri("/chains/alpha/up").to_request();
        let status: ChainStatus = test::call_and_read_body_json(&app, request).await;
        assert_eq!(status.state, RuntimeState::Up);
        assert!(status.ship_listening && status.rpc_listening);

        let request = test::TestRequest::get().uri("/chains").to_request();
        let chains: Vec<ChainStatus> = test::call_and_read_body_json(&app, request).await;
        assert_eq!(chains.len(), 1);

        let request = test::TestRequest::delete().uri("/chains/alpha").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let request = test::TestRequest::get().uri("/chains/alpha").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: ErrorResponse = test::read_body_json(response).await;
        assert_eq!(error.code, 404);

        let request = test::TestRequest::post()
            .uri("/chains")
            .set_json(json!({ "start_block": 10, "end_block": 5 }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = test::TestRequest::post().uri("/stop").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(controller.chain_ids().is_empty());
    }
}
