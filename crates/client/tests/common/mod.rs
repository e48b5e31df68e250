//! Loopback job worker for integration tests.
//!
//! Listens on an ephemeral localhost port, decodes request frames, and
//! either echoes them back automatically or hands them to the test so it
//! can choose what (and in which order) to reply.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jobwire_core::codec::{decode_request, encode_response};
use jobwire_core::{JobName, JobRequest, JobResponse};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// How the worker answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Forward requests to the test; reply only when told to.
    Manual,
    /// Reply immediately with `{"job": <name>, "params": <params>}`.
    Echo,
}

/// Instruction from the test to the worker's connection loop.
enum Control {
    Send(Message),
    /// Drop the TCP stream without a Close frame.
    Abort,
}

pub struct LoopbackWorker {
    pub url: String,
    requests: mpsc::UnboundedReceiver<JobRequest>,
    outbound: mpsc::UnboundedSender<Control>,
    pings: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl LoopbackWorker {
    pub async fn start(mode: WorkerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (request_tx, requests) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let pings = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(serve(
            listener,
            mode,
            request_tx,
            outbound_rx,
            Arc::clone(&pings),
        ));

        Self {
            url: format!("ws://{addr}/websocket"),
            requests,
            outbound,
            pings,
            task,
        }
    }

    /// Wait for the next request frame the worker received.
    pub async fn next_request(&mut self) -> JobRequest {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("worker stopped")
    }

    /// Reply with a binary frame echoing the request header.
    pub fn reply(&self, job_name: &JobName, response: &JobResponse) {
        self.send(Message::Binary(encode_response(job_name, response)));
    }

    /// Reply with a header-less JSON text frame.
    pub fn reply_text(&self, body: serde_json::Value) {
        self.send(Message::Text(body.to_string()));
    }

    pub fn send(&self, message: Message) {
        self.outbound.send(Control::Send(message)).unwrap();
    }

    /// Close the current connection from the worker side.
    pub fn close_connection(&self) {
        self.send(Message::Close(None));
    }

    /// Drop the current connection without a closing handshake.
    pub fn abort_connection(&self) {
        self.outbound.send(Control::Abort).unwrap();
    }

    /// Ping frames received so far, across all connections.
    pub fn pings_received(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

impl Drop for LoopbackWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    mode: WorkerMode,
    request_tx: mpsc::UnboundedSender<JobRequest>,
    mut outbound_rx: mpsc::UnboundedReceiver<Control>,
    pings: Arc<AtomicUsize>,
) {
    loop {
        let Ok((tcp, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
            continue;
        };
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        let request = decode_request(&bytes).unwrap();
                        if mode == WorkerMode::Echo {
                            let response = JobResponse::success(
                                request.correlation_id,
                                json!({"job": request.job_name.as_str(), "params": request.params.clone()}),
                            );
                            let frame = encode_response(&request.job_name, &response);
                            if sink.send(Message::Binary(frame)).await.is_err() {
                                break;
                            }
                        }
                        let _ = request_tx.send(request);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        pings.fetch_add(1, Ordering::SeqCst);
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
                out = outbound_rx.recv() => match out {
                    Some(Control::Send(message)) => {
                        let closing = matches!(message, Message::Close(_));
                        if sink.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                    // Leaving the loop drops both halves and the socket.
                    Some(Control::Abort) => break,
                    None => return,
                },
            }
        }
    }
}
