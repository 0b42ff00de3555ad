// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::commands::{
    DispatcherToListenerCmd, ListenerToDispatcherCmd, ListenerToSessionCmd, SessionToListenerCmd,
};
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::session::{Session, SessionConfig};
use crate::stream::Stream;
use crate::types::{ListenerId, SessionGid, SessionId};

pub const CHANNEL_CAPACITY: usize = 16;

/// Each Listener binds to a specific port.
enum Protocol {
    Mqtt(TcpListener),
    Mqtts(TcpListener, TlsAcceptor),
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Protocol::Mqtt(..) => "Mqtt",
            Protocol::Mqtts(..) => "Mqtts",
        };
        write!(f, "{msg}")
    }
}

/// Command channel into one session actor.
#[derive(Debug)]
struct Pipeline {
    sender: Sender<ListenerToSessionCmd>,
}

/// A Listener accepts connections on one configured endpoint, spawns a
/// session actor per connection and shuttles commands between its sessions
/// and the dispatcher.
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    protocol: Protocol,
    session_config: SessionConfig,
    current_session_id: SessionId,
    pipelines: HashMap<SessionId, Pipeline>,

    session_sender: Sender<SessionToListenerCmd>,
    session_receiver: Option<Receiver<SessionToListenerCmd>>,

    dispatcher_sender: Sender<ListenerToDispatcherCmd>,
    dispatcher_receiver: Option<Receiver<DispatcherToListenerCmd>>,
}

// Initialize Listener.
impl Listener {
    fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
        let file = File::open(path)?;
        rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to load cert file at {path:?}, got: {err:?}"),
                )
            })
    }

    fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
        let file = File::open(path)?;
        rustls_pemfile::private_key(&mut BufReader::new(file))
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to load key file at {path:?}, got: {err:?}"),
                )
            })?
            .ok_or_else(|| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("No private key found in {path:?}"),
                )
            })
    }

    fn get_tls_acceptor(listener_config: &config::Listener) -> Result<TlsAcceptor, Error> {
        let cert_file = listener_config
            .cert_file
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::CertError, "cert_file is required"))?;
        let key_file = listener_config
            .key_file
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::CertError, "key_file is required"))?;

        let certs = Self::load_certs(cert_file)?;
        let key = Self::load_key(key_file)?;
        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    /// Bind to the address in `listener_config`.
    ///
    /// # Errors
    ///
    /// Returns error if the address is unavailable or, for mqtts, the
    /// certificate material does not load.
    pub async fn bind(
        id: ListenerId,
        listener_config: &config::Listener,
        session_config: SessionConfig,
        dispatcher_sender: Sender<ListenerToDispatcherCmd>,
        dispatcher_receiver: Receiver<DispatcherToListenerCmd>,
    ) -> Result<Self, Error> {
        let protocol = match listener_config.protocol {
            config::Protocol::Mqtt => {
                log::info!("bind mqtt://{}", listener_config.address);
                let tcp_listener = TcpListener::bind(&listener_config.address).await?;
                Protocol::Mqtt(tcp_listener)
            }
            config::Protocol::Mqtts => {
                log::info!("bind mqtts://{}", listener_config.address);
                let acceptor = Self::get_tls_acceptor(listener_config)?;
                let tcp_listener = TcpListener::bind(&listener_config.address).await?;
                Protocol::Mqtts(tcp_listener, acceptor)
            }
        };

        let (session_sender, session_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        Ok(Self {
            id,
            protocol,
            session_config,
            current_session_id: 0,
            pipelines: HashMap::new(),

            session_sender,
            session_receiver: Some(session_receiver),

            dispatcher_sender,
            dispatcher_receiver: Some(dispatcher_receiver),
        })
    }

    /// Get the bound socket address; useful when the port was 0.
    ///
    /// # Errors
    ///
    /// Returns error if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        let tcp_listener = match &self.protocol {
            Protocol::Mqtt(tcp_listener) | Protocol::Mqtts(tcp_listener, _) => tcp_listener,
        };
        tcp_listener.local_addr().map_err(Into::into)
    }

    async fn accept(&mut self) -> Result<Stream, Error> {
        match &mut self.protocol {
            Protocol::Mqtt(tcp_listener) => {
                let (tcp_stream, _address) = tcp_listener.accept().await?;
                Ok(Stream::Mqtt(tcp_stream))
            }
            Protocol::Mqtts(tcp_listener, acceptor) => {
                let (tcp_stream, _address) = tcp_listener.accept().await?;
                let tls_stream = acceptor.accept(tcp_stream).await?;
                Ok(Stream::Mqtts(Box::new(tls_stream)))
            }
        }
    }
}

// Handle commands and new connections.
impl Listener {
    pub async fn run_loop(&mut self) {
        // Take ownership of mpsc receivers or else tokio select will raise
        // borrow errors.
        let mut session_receiver = self
            .session_receiver
            .take()
            .expect("Invalid session receiver");
        let mut dispatcher_receiver = self
            .dispatcher_receiver
            .take()
            .expect("Invalid dispatcher receiver");

        loop {
            tokio::select! {
                ret = self.accept() => {
                    match ret {
                        Ok(stream) => self.new_connection(stream),
                        Err(err) => log::error!("listener {}: accept failed: {err}", self.id),
                    }
                }
                Some(cmd) = session_receiver.recv() => {
                    if let Err(err) = self.handle_session_cmd(cmd).await {
                        log::error!("listener {}: session cmd failed: {err}", self.id);
                    }
                }
                Some(cmd) = dispatcher_receiver.recv() => {
                    if let Err(err) = self.handle_dispatcher_cmd(cmd).await {
                        log::error!("listener {}: dispatcher cmd failed: {err}", self.id);
                    }
                }
            }
        }
    }

    fn next_session_id(&mut self) -> SessionId {
        self.current_session_id += 1;
        self.current_session_id
    }

    fn new_connection(&mut self, stream: Stream) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let session_id = self.next_session_id();
        self.pipelines.insert(session_id, Pipeline { sender });
        let session = Session::new(
            session_id,
            self.session_config.clone(),
            stream,
            self.session_sender.clone(),
            receiver,
        );
        tokio::spawn(session.run_loop());
    }

    async fn handle_session_cmd(&mut self, cmd: SessionToListenerCmd) -> Result<(), Error> {
        match cmd {
            SessionToListenerCmd::Connect(session_id, packet) => {
                let cmd = ListenerToDispatcherCmd::Connect {
                    gid: SessionGid::new(self.id, session_id),
                    client_id: packet.client_id().to_string(),
                    clean_session: packet.connect_flags().clean_session,
                };
                self.dispatcher_sender.send(cmd).await.map_err(Into::into)
            }
            SessionToListenerCmd::Publish(_session_id, packet) => self
                .dispatcher_sender
                .send(ListenerToDispatcherCmd::Publish(packet))
                .await
                .map_err(Into::into),
            SessionToListenerCmd::Subscribe(session_id, packet) => self
                .dispatcher_sender
                .send(ListenerToDispatcherCmd::Subscribe(
                    SessionGid::new(self.id, session_id),
                    packet,
                ))
                .await
                .map_err(Into::into),
            SessionToListenerCmd::Unsubscribe(session_id, packet) => self
                .dispatcher_sender
                .send(ListenerToDispatcherCmd::Unsubscribe(
                    SessionGid::new(self.id, session_id),
                    packet,
                ))
                .await
                .map_err(Into::into),
            SessionToListenerCmd::Disconnect(session_id, will) => {
                self.on_session_disconnect(session_id, will).await
            }
        }
    }

    async fn on_session_disconnect(
        &mut self,
        session_id: SessionId,
        will: Option<codec::PublishPacket>,
    ) -> Result<(), Error> {
        if self.pipelines.remove(&session_id).is_none() {
            log::error!(
                "listener {}: no pipeline for session {session_id}",
                self.id
            );
        }
        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::SessionClosed {
                gid: SessionGid::new(self.id, session_id),
                will,
            })
            .await
            .map_err(Into::into)
    }

    async fn handle_dispatcher_cmd(&mut self, cmd: DispatcherToListenerCmd) -> Result<(), Error> {
        match cmd {
            DispatcherToListenerCmd::ConnectAck(session_id, packet) => {
                self.send_to_session(session_id, ListenerToSessionCmd::ConnectAck(packet))
                    .await
            }
            DispatcherToListenerCmd::Publish(session_id, packet) => {
                self.send_to_session(session_id, ListenerToSessionCmd::Publish(packet))
                    .await
            }
            DispatcherToListenerCmd::SubscribeAck(session_id, packet) => {
                self.send_to_session(session_id, ListenerToSessionCmd::SubscribeAck(packet))
                    .await
            }
            DispatcherToListenerCmd::UnsubscribeAck(session_id, packet) => {
                self.send_to_session(session_id, ListenerToSessionCmd::UnsubscribeAck(packet))
                    .await
            }
            DispatcherToListenerCmd::Disconnect(session_id) => {
                self.send_to_session(session_id, ListenerToSessionCmd::Disconnect)
                    .await
            }
        }
    }

    async fn send_to_session(
        &mut self,
        session_id: SessionId,
        cmd: ListenerToSessionCmd,
    ) -> Result<(), Error> {
        if let Some(pipeline) = self.pipelines.get(&session_id) {
            pipeline.sender.send(cmd).await.map_err(Into::into)
        } else {
            Err(Error::session_not_found(SessionGid::new(
                self.id, session_id,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_tls_material() {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let dir = std::env::temp_dir().join("tlaloc-listener-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        File::create(&cert_path)
            .unwrap()
            .write_all(cert.pem().as_bytes())
            .unwrap();
        File::create(&key_path)
            .unwrap()
            .write_all(key_pair.serialize_pem().as_bytes())
            .unwrap();

        let listener_config = config::Listener {
            protocol: config::Protocol::Mqtts,
            address: "127.0.0.1:0".to_string(),
            cert_file: Some(cert_path),
            key_file: Some(key_path),
            keep_alive: 60,
        };
        assert!(Listener::get_tls_acceptor(&listener_config).is_ok());
    }

    #[test]
    fn test_tls_acceptor_requires_files() {
        let listener_config = config::Listener {
            protocol: config::Protocol::Mqtts,
            address: "127.0.0.1:0".to_string(),
            cert_file: None,
            key_file: None,
            keep_alive: 60,
        };
        let err = match Listener::get_tls_acceptor(&listener_config) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.kind(), ErrorKind::CertError);
    }
}
