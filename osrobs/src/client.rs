//! Low-level obs-websocket connection actor.
//!
//! One task owns the socket: requests arrive over an mpsc channel, media
//! events leave over a crossbeam channel so the synchronous tick loop can
//! drain them without awaiting. The handle is cheaply cloneable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::errors::{ObsError, Result};
use crate::protocol::{
    self, EventFrame, Frame, Hello, MediaEvent, RequestResponse, opcode,
    EVENT_SUBSCRIPTION_MEDIA_INPUTS,
};

/// Hard timeout on the initial connect + identify exchange.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Hard timeout on every request round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Command {
    request_type: String,
    request_data: Option<Value>,
    reply: oneshot::Sender<Result<Value>>,
}

/// Handle to a live obs-websocket connection.
#[derive(Clone)]
pub struct ObsClient {
    cmd_tx: mpsc::Sender<Command>,
    alive: Arc<AtomicBool>,
}

impl ObsClient {
    /// Connect, authenticate and subscribe to media input events.
    ///
    /// Media playback events for `media_source_name` are normalised into
    /// `event_tx`; all other events are ignored.
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        media_source_name: &str,
        event_tx: crossbeam_channel::Sender<MediaEvent>,
    ) -> Result<Self> {
        let url = format!("ws://{}:{}", host, port);
        let connect = async {
            let (mut ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| ObsError::Transport(e.to_string()))?;

            // Hello → Identify → Identified
            let hello = loop {
                match next_text(&mut ws).await? {
                    Some(frame) if frame.op == opcode::HELLO => {
                        break serde_json::from_value::<Hello>(frame.d)
                            .map_err(|e| ObsError::Handshake(e.to_string()))?;
                    }
                    Some(frame) => trace!("Ignoring pre-hello frame op={}", frame.op),
                    None => return Err(ObsError::Handshake("socket closed during hello".into())),
                }
            };

            let identify =
                protocol::identify_frame(&hello, password, EVENT_SUBSCRIPTION_MEDIA_INPUTS);
            send_frame(&mut ws, &identify).await?;

            loop {
                match next_text(&mut ws).await? {
                    Some(frame) if frame.op == opcode::IDENTIFIED => break,
                    Some(frame) => trace!("Ignoring pre-identified frame op={}", frame.op),
                    None => {
                        return Err(ObsError::Handshake(
                            "socket closed during identify (bad password?)".into(),
                        ));
                    }
                }
            }

            Ok(ws)
        };

        let ws = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| ObsError::Timeout("connect".into()))??;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let alive = Arc::new(AtomicBool::new(true));
        let source = media_source_name.to_string();
        tokio::spawn(socket_actor(ws, cmd_rx, event_tx, source, alive.clone()));

        info!("Connected to OBS at {}", url);
        Ok(Self { cmd_tx, alive })
    }

    /// Whether the socket actor is still running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Issue a request and wait for its response (10 s timeout).
    pub async fn request(&self, request_type: &str, request_data: Option<Value>) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command {
                request_type: request_type.to_string(),
                request_data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ObsError::Disconnected)?;

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ObsError::Disconnected),
            Err(_) => Err(ObsError::Timeout(request_type.to_string())),
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_text(ws: &mut WsStream) -> Result<Option<Frame>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame: Frame = serde_json::from_str(text.as_str())
                    .map_err(|e| ObsError::Handshake(format!("bad frame: {}", e)))?;
                return Ok(Some(frame));
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ObsError::Transport(e.to_string())),
        }
    }
}

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> Result<()> {
    let encoded = serde_json::to_string(frame).expect("frames serialize");
    ws.send(Message::text(encoded))
        .await
        .map_err(|e| ObsError::Transport(e.to_string()))
}

async fn socket_actor(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: crossbeam_channel::Sender<MediaEvent>,
    media_source_name: String,
    alive: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut pending: HashMap<String, oneshot::Sender<Result<Value>>> = HashMap::new();
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id.fetch_add(1, Ordering::Relaxed).to_string();
                let frame = protocol::request_frame(&cmd.request_type, &id, cmd.request_data);
                let encoded = serde_json::to_string(&frame).expect("frames serialize");
                match sink.send(Message::text(encoded)).await {
                    Ok(()) => {
                        pending.insert(id, cmd.reply);
                    }
                    Err(e) => {
                        let _ = cmd.reply.send(Err(ObsError::Transport(e.to_string())));
                        break;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(text.as_str(), &mut pending, &event_tx, &media_source_name);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("OBS WebSocket closed by remote");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("OBS WebSocket read error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ObsError::Disconnected));
    }
    debug!("OBS socket actor stopped");
}

fn handle_frame(
    text: &str,
    pending: &mut HashMap<String, oneshot::Sender<Result<Value>>>,
    event_tx: &crossbeam_channel::Sender<MediaEvent>,
    media_source_name: &str,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Unparseable OBS frame: {}", e);
            return;
        }
    };

    match frame.op {
        opcode::REQUEST_RESPONSE => {
            let response: RequestResponse = match serde_json::from_value(frame.d) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Unparseable OBS request response: {}", e);
                    return;
                }
            };
            let Some(reply) = pending.remove(&response.request_id) else {
                debug!("Response for unknown request id {}", response.request_id);
                return;
            };
            let result = if response.request_status.result {
                Ok(response.response_data.unwrap_or(Value::Null))
            } else {
                Err(ObsError::RequestFailed {
                    request: response.request_type,
                    code: response.request_status.code,
                    comment: response.request_status.comment.unwrap_or_default(),
                })
            };
            let _ = reply.send(result);
        }
        opcode::EVENT => {
            let event: EventFrame = match serde_json::from_value(frame.d) {
                Ok(event) => event,
                Err(_) => return,
            };
            let input_name = event
                .event_data
                .as_ref()
                .and_then(|d| d.get("inputName"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if input_name != media_source_name {
                return;
            }
            let media_event = match event.event_type.as_str() {
                "MediaInputPlaybackStarted" => MediaEvent::Started,
                "MediaInputPlaybackEnded" => MediaEvent::Ended,
                _ => return,
            };
            trace!("Media event on {}: {:?}", input_name, media_event);
            let _ = event_tx.send(media_event);
        }
        other => trace!("Ignoring OBS frame op={}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_map() -> HashMap<String, oneshot::Sender<Result<Value>>> {
        HashMap::new()
    }

    #[test]
    fn test_media_events_filtered_by_source() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pending = pending_map();

        let started = r#"{"op":5,"d":{"eventType":"MediaInputPlaybackStarted","eventData":{"inputName":"OSR Playlist"}}}"#;
        let other_source = r#"{"op":5,"d":{"eventType":"MediaInputPlaybackStarted","eventData":{"inputName":"Other"}}}"#;
        let ended = r#"{"op":5,"d":{"eventType":"MediaInputPlaybackEnded","eventData":{"inputName":"OSR Playlist"}}}"#;

        handle_frame(started, &mut pending, &tx, "OSR Playlist");
        handle_frame(other_source, &mut pending, &tx, "OSR Playlist");
        handle_frame(ended, &mut pending, &tx, "OSR Playlist");

        let events: Vec<MediaEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![MediaEvent::Started, MediaEvent::Ended]);
    }

    #[test]
    fn test_failed_response_routed_as_error() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut pending = pending_map();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        pending.insert("9".to_string(), reply_tx);

        let raw = r#"{"op":7,"d":{"requestType":"SetInputSettings","requestId":"9","requestStatus":{"result":false,"code":600,"comment":"no such input"}}}"#;
        handle_frame(raw, &mut pending, &tx, "OSR Playlist");

        match reply_rx.try_recv().unwrap() {
            Err(ObsError::RequestFailed { code, comment, .. }) => {
                assert_eq!(code, 600);
                assert_eq!(comment, "no such input");
            }
            other => panic!("unexpected reply: {:?}", other.map(|_| ())),
        }
        assert!(pending.is_empty());
    }
}
