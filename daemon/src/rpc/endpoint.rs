use super::{query, stream, EndpointError, NetworkEndpoint};
use crate::core::engine::ChainState;
use actix_web::{dev::ServerHandle, web, App, HttpServer};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::{
    fmt::{Display, Formatter},
    net::TcpListener,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;

// Polling used while waiting for the OS to release a closed port
const PORT_RELEASE_ATTEMPTS: usize = 100;
const PORT_RELEASE_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    // Websocket state-history stream
    Stream,
    // HTTP JSON query interface
    Query,
}

impl Display for EndpointKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::Stream => "stream",
            Self::Query => "query",
        };
        write!(f, "{}", str)
    }
}

struct RunningServer {
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

/// actix-web server serving one interface of a simulated chain
pub struct HttpEndpoint {
    kind: EndpointKind,
    host: String,
    port: u16,
    state: Arc<ChainState>,
    server: Option<RunningServer>,
}

impl HttpEndpoint {
    pub fn new<H: Into<String>>(
        kind: EndpointKind,
        host: H,
        port: u16,
        state: Arc<ChainState>,
    ) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            state,
            server: None,
        }
    }

    pub fn stream<H: Into<String>>(host: H, port: u16, state: Arc<ChainState>) -> Self {
        Self::new(EndpointKind::Stream, host, port, state)
    }

    pub fn query<H: Into<String>>(host: H, port: u16, state: Arc<ChainState>) -> Self {
        Self::new(EndpointKind::Query, host, port, state)
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    async fn wait_port_released(&self) -> Result<(), EndpointError> {
        for _ in 0..PORT_RELEASE_ATTEMPTS {
            if TcpListener::bind((self.host.as_str(), self.port)).is_ok() {
                return Ok(());
            }
            tokio::time::sleep(PORT_RELEASE_DELAY).await;
        }
        Err(EndpointError::PortNotReleased(self.port))
    }
}

#[async_trait]
impl NetworkEndpoint for HttpEndpoint {
    async fn listen(&mut self) -> Result<(), EndpointError> {
        if self.server.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind((self.host.as_str(), self.port)).map_err(|source| {
            EndpointError::Bind {
                port: self.port,
                source,
            }
        })?;

        let state = Arc::clone(&self.state);
        let kind = self.kind;
        let server = HttpServer::new(move || {
            let app = App::new().app_data(web::Data::from(Arc::clone(&state)));
            match kind {
                EndpointKind::Stream => app.configure(stream::configure),
                EndpointKind::Query => app.configure(query::configure),
            }
        })
        .disable_signals()
        .workers(1)
        .listen(listener)?
        .run();

        // save the server handle to be able to stop it later
        let handle = server.handle();
        let task = tokio::spawn(server);
        self.server = Some(RunningServer { handle, task });

        info!(
            "Chain {}: {} endpoint listening on {}:{}",
            self.state.params().chain_id,
            self.kind,
            self.host,
            self.port
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EndpointError> {
        let Some(server) = self.server.take() else {
            debug!("{} endpoint on port {} is not running", self.kind, self.port);
            return Ok(());
        };

        server.handle.stop(false).await;
        match server.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "{} endpoint on port {} stopped with error: {}",
                self.kind, self.port, e
            ),
            Err(e) => error!(
                "{} endpoint task on port {} failed: {}",
                self.kind, self.port, e
            ),
        }

        self.wait_port_released().await?;
        info!(
            "Chain {}: {} endpoint on port {} closed",
            self.state.params().chain_id,
            self.kind,
            self.port
        );
        Ok(())
    }

    fn get_port(&self) -> u16 {
        self.port
    }

    fn is_listening(&self) -> bool {
        self.server
            .as_ref()
            .is_some_and(|server| !server.task.is_finished())
    }
}

impl Drop for HttpEndpoint {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            warn!(
                "{} endpoint on port {} dropped while listening",
                self.kind, self.port
            );
            // The stop command is sent right away, no need to poll the future
            drop(server.handle.stop(false));
        }
    }
}
