use super::packet::{
    Packet, AUTH_FAILED_ID, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
    SERVERDATA_RESPONSE_VALUE, SIZE_FIELD_LEN,
};
use super::Client;
use crate::net::timed;
use crate::{Config, ErrorKind};
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// RCON client for Source engine servers.
///
/// The connection is authenticated once in [`open`](Client::open); afterwards each
/// [`execute`](Client::execute) is a single request/response exchange on the same socket.
#[derive(Debug)]
pub struct Source {
    config: Config,
    stream: Option<TcpStream>,
    request_id: i32,
}

impl Source {
    pub fn new(config: Config) -> Self {
        Source {
            config,
            stream: None,
            request_id: 1,
        }
    }

    async fn authenticate(&mut self) -> crate::Result<()> {
        let id = self.request_id;
        let request = Packet::new(id, SERVERDATA_AUTH, self.config.password.as_bytes());
        self.send(request).await?;

        let mut response = self.receive().await?;

        // Source servers send an empty RESPONSE_VALUE ahead of the real auth response
        if response.id != AUTH_FAILED_ID
            && response.kind == SERVERDATA_RESPONSE_VALUE
            && response.body.is_empty()
        {
            response = self.receive().await?;
        }

        // The type field is the same on success and failure, only the ID tells them apart
        if response.id == AUTH_FAILED_ID {
            return Err(ErrorKind::AuthenticationFailed.into());
        }
        if response.id != id || response.kind != SERVERDATA_AUTH_RESPONSE {
            return Err(ErrorKind::AuthenticationFailed.into());
        }

        self.advance_request_id();
        Ok(())
    }

    async fn send(&mut self, packet: Packet) -> crate::Result<()> {
        let timeout = self.config.effective_timeout();
        let stream = self.stream.as_mut().ok_or(ErrorKind::NotConnected)?;

        let buf = packet.encode()?;
        timed(timeout, "write packet", stream.write_all(&buf)).await
    }

    async fn receive(&mut self) -> crate::Result<Packet> {
        let timeout = self.config.effective_timeout();
        let stream = self.stream.as_mut().ok_or(ErrorKind::NotConnected)?;

        let mut size_field = [0u8; SIZE_FIELD_LEN];
        timed(timeout, "read packet size", stream.read_exact(&mut size_field)).await?;
        let size = Packet::decode_size(&size_field)?;

        let mut payload = vec![0u8; size];
        timed(timeout, "read packet", stream.read_exact(&mut payload)).await?;

        Packet::decode(&payload)
    }

    fn advance_request_id(&mut self) {
        self.request_id = match self.request_id.checked_add(1) {
            Some(id) => id,
            None => 1,
        };
    }
}

#[async_trait]
impl Client for Source {
    async fn open(&mut self) -> crate::Result<()> {
        let timeout = self.config.effective_timeout();
        let dial = TcpStream::connect(self.config.address.as_str());
        let stream = timed(timeout, "dial", dial).await?;
        self.stream = Some(stream);

        if let Err(err) = self.authenticate().await {
            self.stream = None;
            return Err(err);
        }

        debug!("authenticated source rcon session with {}", self.config.address);
        Ok(())
    }

    async fn close(&mut self) -> crate::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            timed(self.config.effective_timeout(), "close", stream.shutdown()).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> crate::Result<String> {
        let id = self.request_id;
        self.send(Packet::new(id, SERVERDATA_EXECCOMMAND, command)).await?;

        let response = self.receive().await?;
        if response.id != id {
            return Err(ErrorKind::InvalidPacket("response id does not match request").into());
        }
        if response.kind != SERVERDATA_RESPONSE_VALUE {
            return Err(ErrorKind::InvalidPacket("unexpected response type").into());
        }

        self.advance_request_id();
        Ok(response.body_text())
    }
}
