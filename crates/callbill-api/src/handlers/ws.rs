//! WebSocket streams for live engine events
//!
//! Each frame is the JSON envelope `{"type": ..., "data": ...}`. Clients may
//! send `ping` as text and get `{"type":"pong"}` back. A subscriber that
//! cannot keep up loses the oldest events rather than stalling publishers.

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session};
use callbill_core::models::EngineEvent;
use callbill_services::{EventHub, SessionEngine};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

const PONG: &str = r#"{"type":"pong"}"#;

/// Tenant-scoped event stream
///
/// GET /ws/tenants/{tenant_id}
pub async fn tenant_stream(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<i32>,
    engine: web::Data<SessionEngine>,
    hub: web::Data<EventHub>,
) -> Result<HttpResponse, actix_web::Error> {
    let tenant_id = path.into_inner();
    // Unknown tenants get a 404 instead of a stream that never speaks
    engine.bot(tenant_id).await?;

    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;
    let client = format!("{}/tenant-{}", client_ip(&req), tenant_id);
    info!(client = %client, "Tenant event stream opened");

    let events = hub.subscribe_tenant(tenant_id);
    actix_web::rt::spawn(async move {
        ws_session(session, msg_stream, events, client).await;
    });

    Ok(response)
}

/// Admin event stream
///
/// GET /ws/admin
pub async fn admin_stream(
    req: HttpRequest,
    body: web::Payload,
    hub: web::Data<EventHub>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;
    let client = format!("{}/admin", client_ip(&req));
    info!(client = %client, "Admin event stream opened");

    let events = hub.subscribe_admin();
    actix_web::rt::spawn(async move {
        ws_session(session, msg_stream, events, client).await;
    });

    Ok(response)
}

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

/// Pump events to the client until either side goes away
async fn ws_session(
    mut session: Session,
    mut msg_stream: MessageStream,
    mut events: broadcast::Receiver<EngineEvent>,
    client: String,
) {
    let mut ping_interval = interval(PING_INTERVAL);

    loop {
        tokio::select! {
            Some(msg) = msg_stream.next() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        debug!(client = %client, "Received text: {}", text);
                        if text.trim() == "ping" && session.text(PONG).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(msg)) => {
                        if session.pong(&msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        info!(client = %client, "Client closed connection: {:?}", reason);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(client = %client, "WebSocket error: {}", e);
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                error!(
                                    client = %client,
                                    "Failed to encode {}: {}", event.event_type, e
                                );
                                continue;
                            }
                        };
                        if session.text(json).await.is_err() {
                            warn!(client = %client, "Failed to send event, closing connection");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(client = %client, "Subscriber lagging, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = ping_interval.tick() => {
                if session.ping(b"").await.is_err() {
                    warn!(client = %client, "Failed to send ping, closing connection");
                    break;
                }
            }
        }
    }

    info!(client = %client, "Event stream closed");
    let _ = session.close(None).await;
}

/// Configure WebSocket routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/ws")
            .route("/tenants/{tenant_id}", web::get().to(tenant_stream))
            .route("/admin", web::get().to(admin_stream)),
    );
}
