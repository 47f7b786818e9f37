//! Live reload over WebSocket.
//!
//! Browsers connect to a small `tungstenite` server running on its own
//! thread. Each call to [`Reloader::reload`] broadcasts a `"reload"` message
//! to every open tab.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tungstenite::WebSocket;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Handle to the live reload broadcaster. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Reloader {
    tx: Sender<()>,
    port: u16,
}

impl Reloader {
    /// Bind the WebSocket listener and start the broadcast threads.
    pub fn start() -> std::io::Result<Self> {
        let (tcp, port) = reserve_port()?;
        let clients = Clients::default();

        new_thread_ws_incoming(tcp, clients.clone());
        let tx = new_thread_ws_reload(clients);

        tracing::info!(port, "live reload listening");
        Ok(Self { tx, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Ask every connected browser to reload. Returns `false` once the
    /// broadcast thread is gone.
    pub fn reload(&self) -> bool {
        self.tx.send(()).is_ok()
    }

    /// Client script injected into served pages.
    pub fn refresh_script(&self) -> String {
        refresh_script(self.port)
    }
}

pub(crate) fn refresh_script(port: u16) -> String {
    format!(
        r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
    )
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) {
    thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream.map(tungstenite::accept) {
                Ok(Ok(socket)) => socket,
                Ok(Err(e)) => {
                    tracing::warn!("WebSocket handshake failed: {e}");
                    continue;
                }
                Err(e) => {
                    tracing::warn!("WebSocket connection failed: {e}");
                    continue;
                }
            };

            clients
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(socket);
        }
    });
}

fn new_thread_ws_reload(clients: Clients) -> Sender<()> {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_points_at_port() {
        let script = refresh_script(4242);
        assert!(script.contains("ws://localhost:4242"));
        assert!(script.contains("window.location.reload()"));
    }

    #[test]
    fn reloader_accepts_requests() {
        let reloader = Reloader::start().unwrap();
        assert_ne!(reloader.port(), 0);
        assert!(reloader.reload());
        assert!(reloader.clone().reload());
    }
}
