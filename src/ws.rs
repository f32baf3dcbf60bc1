use std::{
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use tungstenite::{Error as WsError, Message, WebSocket, accept};

use crate::{
    bake::BakeStatus,
    diagnostics::ErrorLog,
    dsl::{self, ProjectRecord},
    protocol::{
        BakeStatusPayload, ErrorPayload, MSG_BAKE_STATUS, MSG_ERROR, MSG_PING, MSG_PONG,
        MSG_PROJECT_REQUEST, MSG_PROJECT_UPDATE, WSMessage,
    },
};

const PING_INTERVAL: Duration = Duration::from_secs(2);

fn spawn_server_ping_loop(hub: WsHub) {
    thread::spawn(move || {
        loop {
            let ping = WSMessage::<Value>::new(MSG_PING, None, None);
            if let Ok(text) = serde_json::to_string(&ping) {
                hub.broadcast(text);
            }
            thread::sleep(PING_INTERVAL);
        }
    });
}

#[derive(Debug, Clone)]
pub enum ProjectUpdate {
    Parsed {
        project: ProjectRecord,
        request_id: Option<String>,
    },
    ParseError {
        message: String,
        request_id: Option<String>,
    },
}

#[derive(Clone, Default)]
pub struct WsHub {
    clients: Arc<Mutex<Vec<Sender<String>>>>,
}

impl WsHub {
    pub fn broadcast(&self, text: String) {
        let Ok(mut clients) = self.clients.lock() else {
            return;
        };
        clients.retain(|tx| tx.send(text.clone()).is_ok());
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn register_client(&self, tx: Sender<String>) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.push(tx);
        }
    }
}

/// `bake_status` message text for broadcasting.
pub fn status_message(status: BakeStatus, errors: &ErrorLog) -> Result<String> {
    let msg = WSMessage::new(
        MSG_BAKE_STATUS,
        None,
        Some(BakeStatusPayload::new(status, errors)),
    );
    Ok(serde_json::to_string(&msg)?)
}

pub fn spawn_ws_server(
    addr: &str,
    update_tx: Sender<ProjectUpdate>,
    update_drop_rx: Receiver<ProjectUpdate>,
    hub: WsHub,
    last_good: Arc<Mutex<Option<ProjectRecord>>>,
) -> Result<thread::JoinHandle<()>> {
    let addr_str = addr.to_string();
    let server =
        TcpListener::bind(addr).with_context(|| format!("failed to bind ws server at {addr}"))?;

    spawn_server_ping_loop(hub.clone());

    Ok(thread::spawn(move || {
        if let Err(e) = run_ws_server(server, &addr_str, update_tx, update_drop_rx, hub, last_good) {
            log::error!("[ws] server failed: {e:?}");
        }
    }))
}

fn run_ws_server(
    server: TcpListener,
    addr: &str,
    update_tx: Sender<ProjectUpdate>,
    update_drop_rx: Receiver<ProjectUpdate>,
    hub: WsHub,
    last_good: Arc<Mutex<Option<ProjectRecord>>>,
) -> Result<()> {
    log::info!("[ws] listening on ws://{addr}");

    for stream in server.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[ws] accept tcp failed: {e}");
                continue;
            }
        };

        let update_tx = update_tx.clone();
        let update_drop_rx = update_drop_rx.clone();
        let hub = hub.clone();
        let last_good = last_good.clone();

        thread::spawn(move || {
            if let Err(e) = handle_client(stream, update_tx, update_drop_rx, hub, last_good) {
                log::debug!("[ws] client ended: {e:?}");
            }
        });
    }

    Ok(())
}

fn handle_client(
    stream: TcpStream,
    update_tx: Sender<ProjectUpdate>,
    update_drop_rx: Receiver<ProjectUpdate>,
    hub: WsHub,
    last_good: Arc<Mutex<Option<ProjectRecord>>>,
) -> Result<()> {
    // Handshake is easier with a blocking socket, switch to non-blocking afterwards.
    let mut ws = accept(stream).context("websocket handshake failed")?;
    ws.get_mut()
        .set_nonblocking(true)
        .context("failed to set tcp non-blocking")?;

    let (client_tx, client_rx) = crossbeam_channel::unbounded::<String>();
    hub.register_client(client_tx);

    loop {
        while let Ok(text) = client_rx.try_recv() {
            let _ = ws.send(Message::Text(text));
        }

        match ws.read() {
            Ok(Message::Text(text)) => {
                if let Err(e) =
                    handle_text_message(&mut ws, &text, &update_tx, &update_drop_rx, &last_good)
                {
                    log::warn!("[ws] handle message error: {e:?}");
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = ws.send(Message::Pong(payload));
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(WsError::Io(ref io)) if io.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(WsError::AlreadyClosed) | Err(WsError::ConnectionClosed) => break,
            Err(e) => return Err(e).context("websocket read failed"),
        }

        thread::sleep(Duration::from_millis(5));
    }

    Ok(())
}

fn reject(
    ws: &mut WebSocket<TcpStream>,
    update_tx: &Sender<ProjectUpdate>,
    update_drop_rx: &Receiver<ProjectUpdate>,
    request_id: Option<String>,
    message: String,
) {
    send_error(ws, request_id.clone(), "PARSE_ERROR", &message);
    send_project_update(
        update_tx,
        update_drop_rx,
        ProjectUpdate::ParseError {
            message,
            request_id,
        },
    );
}

fn handle_text_message(
    ws: &mut WebSocket<TcpStream>,
    text: &str,
    update_tx: &Sender<ProjectUpdate>,
    update_drop_rx: &Receiver<ProjectUpdate>,
    last_good: &Arc<Mutex<Option<ProjectRecord>>>,
) -> Result<()> {
    let msg: WSMessage<Value> = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            reject(ws, update_tx, update_drop_rx, None, format!("invalid json: {e}"));
            return Ok(());
        }
    };

    match msg.msg_type.as_str() {
        MSG_PING => {
            let pong = WSMessage::<Value>::new(MSG_PONG, msg.request_id, None);
            let _ = ws.send(Message::Text(serde_json::to_string(&pong)?));
        }
        MSG_PONG => {}
        MSG_PROJECT_REQUEST => {
            let project = last_good.lock().ok().and_then(|g| g.clone());
            if let Some(project) = project {
                let resp = WSMessage::new(MSG_PROJECT_UPDATE, msg.request_id, Some(project));
                let _ = ws.send(Message::Text(serde_json::to_string(&resp)?));
            } else {
                send_error(ws, msg.request_id, "VALIDATION_ERROR", "no last-good project");
            }
        }
        MSG_PROJECT_UPDATE => {
            let Some(payload) = msg.payload else {
                reject(ws, update_tx, update_drop_rx, msg.request_id, "missing payload".into());
                return Ok(());
            };

            let project: ProjectRecord = match serde_json::from_value(payload) {
                Ok(p) => p,
                Err(e) => {
                    let message = format!("invalid project: {e}");
                    reject(ws, update_tx, update_drop_rx, msg.request_id, message);
                    return Ok(());
                }
            };
            if let Err(e) = dsl::validate_project_record(&project) {
                reject(ws, update_tx, update_drop_rx, msg.request_id, format!("{e:#}"));
                return Ok(());
            }

            // Keep only latest: bounded(1) + drop stale message if receiver hasn't caught up.
            send_project_update(
                update_tx,
                update_drop_rx,
                ProjectUpdate::Parsed {
                    project,
                    request_id: msg.request_id,
                },
            );
        }
        other => {
            send_error(
                ws,
                msg.request_id,
                "PARSE_ERROR",
                &format!("unknown message type: {other}"),
            );
        }
    }

    Ok(())
}

fn send_error(
    ws: &mut WebSocket<TcpStream>,
    request_id: Option<String>,
    code: &str,
    message: &str,
) {
    let err = WSMessage::new(
        MSG_ERROR,
        request_id,
        Some(ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
        }),
    );

    if let Ok(text) = serde_json::to_string(&err) {
        let _ = ws.send(Message::Text(text));
    }
}

pub fn send_project_update(
    update_tx: &Sender<ProjectUpdate>,
    update_drop_rx: &Receiver<ProjectUpdate>,
    update: ProjectUpdate,
) {
    if update_tx.try_send(update.clone()).is_err() {
        while update_drop_rx.try_recv().is_ok() {}
        let _ = update_tx.try_send(update);
    }
}
