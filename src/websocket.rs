//! # WebSocket Session Handler
//!
//! Clients connect to `/ws/{endpoint}` where endpoint is one of `chat`, `stt`,
//! `tts` or `s2s`. Each connection gets one actor and one session task.
//!
//! ## Actor / task split:
//! - **`VoiceSocket` actor**: owns the socket. Forwards client frames into an
//!   unbounded channel and writes whatever the session sends back.
//! - **`SessionOrchestrator` task**: owns all conversation state and talks to
//!   the socket only through the `Connection` trait (`WsConnection` here).
//!
//! When the actor stops, for whatever reason, it flips a `watch` flag so the
//! session task notices immediately instead of at its next send.
//!
//! On server shutdown the actor only ends the inbound stream and keeps the
//! socket open. The session finishes the turn in flight, ends as `completed`
//! and closes the socket itself.
//!
//! ## Query parameters:
//! - `rate`: capture sample rate of client audio in Hz (defaults to `stt.capture_rate`)

use crate::error::{AppError, SessionError};
use crate::session::orchestrator::SessionOrchestrator;
use crate::session::{ClientFrame, Connection, EndpointKind};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames the session task asks the actor to write.
#[derive(Message)]
#[rtype(result = "()")]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Stop forwarding client frames but keep the socket open.
#[derive(Message)]
#[rtype(result = "()")]
pub struct EndInput;

/// One client socket.
pub struct VoiceSocket {
    endpoint: EndpointKind,

    /// Dropped on stop, which ends the session's inbound stream
    inbound: Option<mpsc::UnboundedSender<ClientFrame>>,

    /// Set to `true` once the actor stops
    closed: watch::Sender<bool>,

    last_heartbeat: Instant,
}

impl VoiceSocket {
    fn new(
        endpoint: EndpointKind,
        inbound: mpsc::UnboundedSender<ClientFrame>,
        closed: watch::Sender<bool>,
    ) -> Self {
        Self {
            endpoint,
            inbound: Some(inbound),
            closed,
            last_heartbeat: Instant::now(),
        }
    }

    fn forward(&mut self, frame: ClientFrame) {
        let delivered = self
            .inbound
            .as_ref()
            .map(|tx| tx.send(frame).is_ok())
            .unwrap_or(false);

        if !delivered {
            debug!("Session for {} already finished, dropping frame", self.endpoint);
        }
    }

    fn end_input(&mut self) {
        if self.inbound.take().is_some() {
            info!("Ending client input on {}", self.endpoint);
        }
    }
}

impl Actor for VoiceSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started on {}", self.endpoint);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout on {}, closing connection", act.endpoint);
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection stopped on {}", self.endpoint);

        // Order matters: the session must see `closed` before its inbound ends.
        self.closed.send_replace(true);
        self.inbound.take();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(ClientFrame::Text(text.to_string()));
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.forward(ClientFrame::Binary(data.to_vec()));
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed by client: {:?}", reason);
                self.forward(ClientFrame::Close);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for VoiceSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Text(text) => ctx.text(text),
            Outbound::Binary(data) => ctx.binary(data),
            Outbound::Close => {
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
        }
    }
}

impl Handler<EndInput> for VoiceSocket {
    type Result = ();

    fn handle(&mut self, _msg: EndInput, _ctx: &mut Self::Context) {
        self.end_input();
    }
}

/// Resolves to `true` if the server starts shutting down while the socket is
/// still open, `false` once the socket closes first.
async fn shutdown_before_close(mut shutdown: watch::Receiver<bool>, mut closed: watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = closed.wait_for(|is_closed| *is_closed) => false,
        result = shutdown.wait_for(|down| *down) => result.is_ok(),
    }
}

/// `Connection` backed by a running `VoiceSocket` actor.
pub struct WsConnection {
    addr: Addr<VoiceSocket>,
    closed: watch::Receiver<bool>,
}

impl WsConnection {
    async fn deliver(&self, frame: Outbound) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected);
        }
        self.addr
            .send(frame)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&self, text: String) -> Result<(), SessionError> {
        self.deliver(Outbound::Text(text)).await
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.deliver(Outbound::Binary(data)).await
    }

    fn is_connected(&self) -> bool {
        self.addr.connected() && !*self.closed.borrow()
    }

    async fn closed(&self) {
        let mut closed = self.closed.clone();
        // A dropped sender means the actor is gone, which is closed too.
        let _ = closed.wait_for(|is_closed| *is_closed).await;
    }

    async fn close(&self) {
        if self.is_connected() {
            let _ = self.addr.send(Outbound::Close).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    rate: Option<u32>,
}

/// Upgrade `/ws/{endpoint}` and start a session on it.
///
/// Refuses with 404 for unknown endpoints, 400 for a bad `rate`, and 503 when
/// `max_concurrent_sessions` sessions are already running.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    let segment = path.into_inner();
    let endpoint = EndpointKind::from_path(&segment)
        .ok_or_else(|| AppError::NotFound(format!("Unknown session endpoint '{}'", segment)))?;

    let query = web::Query::<SessionQuery>::from_query(req.query_string())
        .map_err(|e| AppError::BadRequest(format!("Invalid query: {}", e)))?;

    let config = app_state.get_config();
    let capture_rate = match query.rate {
        Some(0) => return Err(AppError::BadRequest("rate must be greater than 0".to_string()).into()),
        Some(rate) => rate,
        None => config.stt.capture_rate,
    };
    debug!("Session on {} will capture at {} Hz", endpoint, capture_rate);

    app_state.try_begin_session(endpoint)?;

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let socket = VoiceSocket::new(endpoint, inbound_tx, closed_tx);

    let (addr, response) = match ws::start_with_addr(socket, &req, stream) {
        Ok(started) => started,
        Err(e) => {
            app_state.cancel_session(endpoint);
            return Err(e);
        }
    };

    let watcher_addr = addr.clone();
    let shutdown = app_state.shutdown_signal();
    let socket_closed = closed_rx.clone();
    actix_web::rt::spawn(async move {
        if shutdown_before_close(shutdown, socket_closed).await {
            watcher_addr.do_send(EndInput);
        }
    });

    let conn: Arc<dyn Connection> = Arc::new(WsConnection {
        addr,
        closed: closed_rx,
    });
    let orchestrator = SessionOrchestrator::new(
        endpoint,
        conn,
        Arc::clone(&app_state.services),
        &app_state.tracker,
        &config,
        capture_rate,
    );
    info!("Session {} accepted on {}", orchestrator.id(), endpoint);

    let state = app_state.clone();
    actix_web::rt::spawn(async move {
        let summary = orchestrator.run(inbound_rx).await;
        state.record_session_end(summary.reason, summary.turns);
    });

    Ok(response)
}
