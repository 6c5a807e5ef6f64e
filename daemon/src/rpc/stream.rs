use crate::core::engine::ChainState;
use actix_web::{
    web::{self, Data, Payload},
    Error, HttpRequest, HttpResponse,
};
use actix_ws::{Message, Session};
use futures::StreamExt;
use log::{debug, warn};
use mockchain_common::api::StreamMessage;
use tokio::sync::broadcast::error::RecvError;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(subscribe));
}

async fn send_frame(session: &mut Session, frame: &StreamMessage) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("Cannot serialize stream frame: {}", e);
            return true;
        }
    };
    session.text(text).await.is_ok()
}

// Push a status frame, then every block and fork frame of the chain
async fn subscribe(
    state: Data<ChainState>,
    request: HttpRequest,
    body: Payload,
) -> Result<HttpResponse, Error> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(&request, body)?;
    // Subscribe before reading the status so no block falls in between
    let mut frames = state.subscribe();
    let status = StreamMessage::Status(state.chain_info());
    let chain_id = state.params().chain_id.clone();
    debug!("Chain {}: stream subscriber connected", chain_id);

    actix_web::rt::spawn(async move {
        if !send_frame(&mut session, &status).await {
            return;
        }

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(frame) => {
                        if !send_frame(&mut session, &frame).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Chain {}: stream subscriber lagged, {} frames skipped",
                            chain_id, skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                },
                message = msg_stream.next() => match message {
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Chain {}: stream receive error: {}", chain_id, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        let _ = session.close(None).await;
        debug!("Chain {}: stream subscriber disconnected", chain_id);
    });

    Ok(response)
}
