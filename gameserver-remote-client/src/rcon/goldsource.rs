use super::Client;
use crate::net::{connect_udp, timed};
use crate::{Config, ErrorKind};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::UdpSocket;

const PACKET_HEADER: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
const CHALLENGE_REQUEST: &[u8] = b"\xff\xff\xff\xffchallenge rcon";
const RECEIVE_BUFFER_LEN: usize = 1024;

/// Replies shorter than this carry no payload.
const MIN_REPLY_LEN: usize = 5;

/// The engine cuts long output into reply bodies of this many symbols.
const PACKET_SYMBOLS_THRESHOLD: usize = 256;

/// Upper bound on "keep sending" round-trips for a single command.
const MAX_CONTINUATION_PACKETS: usize = 32;

/// Marker byte of an `S2A_PRINT` reply.
const PRINT_MARKER: u8 = b'l';

/// RCON client for GoldSource (HLDS) servers.
///
/// There is no session on the wire: [`open`](Client::open) only fetches a challenge number,
/// which is then repeated together with the password in every command.
#[derive(Debug)]
pub struct GoldSource {
    config: Config,
    socket: Option<UdpSocket>,
    challenge: String,
}

impl GoldSource {
    pub fn new(config: Config) -> Self {
        GoldSource {
            config,
            socket: None,
            challenge: String::new(),
        }
    }

    async fn read_output(&self, command: &str) -> crate::Result<String> {
        let mut body = self.exchange(&self.command_packet(command)).await?;
        check_rejection(&body)?;
        let mut output = body.clone();

        let mut continuations = 0;
        while body.len() >= PACKET_SYMBOLS_THRESHOLD {
            if continuations == MAX_CONTINUATION_PACKETS {
                warn!(
                    "{} kept sending full packets, truncating output after {} continuations",
                    self.config.address, MAX_CONTINUATION_PACKETS
                );
                break;
            }
            continuations += 1;

            body = self.exchange(&self.command_packet("")).await?;
            output.extend_from_slice(&body);
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    fn command_packet(&self, command: &str) -> Vec<u8> {
        let mut buf = PACKET_HEADER.to_vec();
        buf.extend_from_slice(
            format!(
                "rcon {} \"{}\" {}",
                self.challenge, self.config.password, command
            )
            .as_bytes(),
        );
        buf
    }

    /// Sends one datagram and waits for one reply, returning the reply body.
    async fn exchange(&self, packet: &[u8]) -> crate::Result<Vec<u8>> {
        let timeout = self.config.effective_timeout();
        let socket = self.socket.as_ref().ok_or(ErrorKind::NotConnected)?;

        timed(timeout, "send datagram", socket.send(packet)).await?;

        let mut buf = [0u8; RECEIVE_BUFFER_LEN];
        let len = timed(timeout, "receive datagram", socket.recv(&mut buf)).await?;

        Ok(reply_body(&buf[..len]).to_vec())
    }
}

/// Strips the `0xff` header and trailing NUL padding from a reply.
pub(crate) fn reply_body(datagram: &[u8]) -> &[u8] {
    if datagram.len() < MIN_REPLY_LEN {
        return &[];
    }

    let mut body = &datagram[PACKET_HEADER.len()..];
    if body.first() == Some(&PRINT_MARKER) {
        body = &body[1..];
    }

    let end = body.iter().rposition(|b| *b != 0).map_or(0, |pos| pos + 1);
    &body[..end]
}

/// Extracts the challenge number from a `challenge rcon <number>` reply.
pub(crate) fn parse_challenge(body: &[u8]) -> crate::Result<String> {
    let text = String::from_utf8_lossy(body);
    text.split_whitespace()
        .nth(2)
        .map(str::to_string)
        .ok_or_else(|| ErrorKind::InvalidChallengeResponse.into())
}

fn check_rejection(body: &[u8]) -> crate::Result<()> {
    if body.starts_with(b"Bad rcon_password") {
        return Err(ErrorKind::AuthenticationFailed.into());
    }
    if body.starts_with(b"Bad challenge") {
        return Err(ErrorKind::InvalidChallengeResponse.into());
    }
    Ok(())
}

#[async_trait]
impl Client for GoldSource {
    async fn open(&mut self) -> crate::Result<()> {
        let timeout = self.config.effective_timeout();
        self.socket = Some(connect_udp(self.config.address.as_str(), timeout).await?);

        let challenge = self
            .exchange(CHALLENGE_REQUEST)
            .await
            .and_then(|body| parse_challenge(&body));

        match challenge {
            Ok(challenge) => {
                debug!("received rcon challenge from {}", self.config.address);
                self.challenge = challenge;
                Ok(())
            }
            Err(err) => {
                self.socket = None;
                Err(err)
            }
        }
    }

    async fn close(&mut self) -> crate::Result<()> {
        self.socket = None;
        self.challenge.clear();
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> crate::Result<String> {
        let result = self.read_output(command).await;

        // A late reply would be read as the next command's output; the client must be reopened
        if let Err(err) = &result {
            if err.is_transport() && self.socket.take().is_some() {
                debug!(
                    "dropped rcon socket to {} after transport error",
                    self.config.address
                );
            }
        }
        result
    }
}
