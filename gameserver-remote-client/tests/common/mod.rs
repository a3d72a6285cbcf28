//! Fake game servers speaking just enough of each protocol to exercise the client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

pub const PASSWORD: &str = "hunter2";

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBehaviour {
    /// Authenticates like a real server and echoes every command back.
    Echo,
    /// Answers authentication with the request ID -1 but the normal auth response type.
    RejectAuth,
    /// Authenticates, then answers commands with a packet claiming to be huge.
    OversizedResponse,
}

pub struct FakeSourceServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl FakeSourceServer {
    /// Total number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Number of connections the peer has not closed yet.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

pub fn encode_source_packet(id: i32, kind: i32, body: &[u8]) -> Vec<u8> {
    let mut buf = ((body.len() + 10) as i32).to_le_bytes().to_vec();
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(body);
    buf.extend_from_slice(&[0, 0]);
    buf
}

async fn read_source_packet(stream: &mut TcpStream) -> Option<(i32, i32, Vec<u8>)> {
    let size = stream.read_i32_le().await.ok()? as usize;
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).await.ok()?;

    let id = i32::from_le_bytes(payload[0..4].try_into().unwrap());
    let kind = i32::from_le_bytes(payload[4..8].try_into().unwrap());
    Some((id, kind, payload[8..size - 2].to_vec()))
}

pub async fn spawn_source_server(behaviour: SourceBehaviour) -> FakeSourceServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicUsize::new(0));

    let server = FakeSourceServer {
        addr,
        accepted: accepted.clone(),
        open: open.clone(),
    };

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepted.fetch_add(1, Ordering::SeqCst);
            open.fetch_add(1, Ordering::SeqCst);

            let open = open.clone();
            tokio::spawn(async move {
                serve_source_connection(stream, behaviour).await;
                open.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    server
}

async fn serve_source_connection(mut stream: TcpStream, behaviour: SourceBehaviour) {
    while let Some((id, kind, body)) = read_source_packet(&mut stream).await {
        let reply = match (kind, behaviour) {
            (SERVERDATA_AUTH, SourceBehaviour::RejectAuth) => {
                encode_source_packet(-1, SERVERDATA_AUTH_RESPONSE, b"")
            }
            (SERVERDATA_AUTH, _) => {
                let id = if body == PASSWORD.as_bytes() { id } else { -1 };
                let mut reply = encode_source_packet(id, SERVERDATA_RESPONSE_VALUE, b"");
                reply.extend(encode_source_packet(id, SERVERDATA_AUTH_RESPONSE, b""));
                reply
            }
            (SERVERDATA_EXECCOMMAND, SourceBehaviour::OversizedResponse) => {
                let mut reply = 1_000_000i32.to_le_bytes().to_vec();
                reply.extend_from_slice(&id.to_le_bytes());
                reply
            }
            (SERVERDATA_EXECCOMMAND, _) if body == b"crash" => return,
            (SERVERDATA_EXECCOMMAND, _) => {
                encode_source_packet(id, SERVERDATA_RESPONSE_VALUE, &body)
            }
            _ => return,
        };

        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

pub const GOLDSOURCE_CHALLENGE: &str = "3056193481";

/// Body of each datagram `cvarlist` produces; the first fills a whole packet.
pub const GOLDSOURCE_LONG_OUTPUT: [&str; 2] = [
    "sv_cheats 0\n\
     sv_gravity 800\n\
     sv_maxspeed 320\n\
     sv_airaccelerate 10\n\
     mp_timelimit 20\n\
     mp_friendlyfire 0\n\
     mp_footsteps 1\n\
     mp_flashlight 0\n\
     mp_autoteambalance 1\n\
     mp_limitteams 2\n\
     mp_roundtime 5\n\
     mp_freezetime 6\n\
     mp_buytime 1.5\n\
     mp_c4timer 35\n\
     mp_startmoney 800\n\
     mp_tkpunish 0\n\
     mp_hostagepenalty 13\n\
     allow_spectators 1\n",
    "sv_region 255\n18 total convars\n",
];

/// Serves GoldSource RCON. `short_challenge` makes the challenge reply miss its number.
pub async fn spawn_goldsource_server(short_challenge: bool) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let mut pending: Vec<&str> = Vec::new();

        loop {
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[4..len]).into_owned();

            let body = if request.starts_with("challenge rcon") {
                if short_challenge {
                    "challenge rcon\n".to_string()
                } else {
                    format!("challenge rcon {}\n", GOLDSOURCE_CHALLENGE)
                }
            } else {
                let parts: Vec<&str> = request.splitn(4, ' ').collect();
                let (challenge, password, command) = (parts[1], parts[2], parts[3]);

                if challenge != GOLDSOURCE_CHALLENGE {
                    "lBad challenge.\n".to_string()
                } else if password != format!("\"{}\"", PASSWORD) {
                    "lBad rcon_password.\n".to_string()
                } else if command == "cvarlist" {
                    pending = GOLDSOURCE_LONG_OUTPUT[1..].to_vec();
                    format!("l{}", GOLDSOURCE_LONG_OUTPUT[0])
                } else if command.is_empty() && !pending.is_empty() {
                    format!("l{}", pending.remove(0))
                } else {
                    format!("l{}\n", command)
                }
            };

            let mut reply = vec![0xff; 4];
            reply.extend_from_slice(body.as_bytes());
            reply.push(0);
            socket.send_to(&reply, peer).await.unwrap();
        }
    });

    addr
}

/// Body length of the oversized replies sent by [`spawn_scripted_goldsource_server`].
pub const FULL_BODY_LEN: usize = 300;

#[derive(Debug, Clone, Copy)]
pub enum GoldSourceScript {
    /// Answers `big` with a full packet, then answers the continuation request only after the
    /// delay with `LATE`. Other commands are echoed.
    SlowContinuation(Duration),
    /// Answers every command, continuations included, with a full packet.
    Endless,
    /// Answers every command with a body one byte short of a full packet, in a datagram that is
    /// longer than 256 bytes once framing is counted.
    JustUnderThreshold,
}

pub struct FakeGoldSourceServer {
    pub addr: SocketAddr,
    commands: Arc<AtomicUsize>,
}

impl FakeGoldSourceServer {
    /// Number of `rcon` datagrams received, continuations included.
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }
}

pub async fn spawn_scripted_goldsource_server(script: GoldSourceScript) -> FakeGoldSourceServer {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let commands = Arc::new(AtomicUsize::new(0));

    let server = FakeGoldSourceServer {
        addr,
        commands: commands.clone(),
    };

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let full = format!("l{}", "x".repeat(FULL_BODY_LEN));

        loop {
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[4..len]).into_owned();

            let body = if request.starts_with("challenge rcon") {
                format!("challenge rcon {}\n", GOLDSOURCE_CHALLENGE)
            } else {
                commands.fetch_add(1, Ordering::SeqCst);
                let command = request.splitn(4, ' ').nth(3).unwrap_or_default().to_string();

                match script {
                    GoldSourceScript::Endless => full.clone(),
                    GoldSourceScript::JustUnderThreshold => format!("l{}", "y".repeat(255)),
                    GoldSourceScript::SlowContinuation(_) if command == "big" => full.clone(),
                    GoldSourceScript::SlowContinuation(delay) if command.is_empty() => {
                        tokio::time::sleep(delay).await;
                        "lLATE\n".to_string()
                    }
                    GoldSourceScript::SlowContinuation(_) => format!("l{}\n", command),
                }
            };

            let mut reply = vec![0xff; 4];
            reply.extend_from_slice(body.as_bytes());
            reply.push(0);
            // The client may have dropped its socket in the meantime
            let _ = socket.send_to(&reply, peer).await;
        }
    });

    server
}

pub const MINECRAFT_CHALLENGE: i32 = 9513307;

pub fn minecraft_full_stat(session: &[u8]) -> Vec<u8> {
    let mut response = vec![0x00];
    response.extend_from_slice(session);
    response.extend_from_slice(b"splitnum\x00\x80\x00");
    response.extend_from_slice(
        b"hostname\x00A Minecraft Server\x00gametype\x00SMP\x00game_id\x00MINECRAFT\x00\
          version\x001.20.4\x00plugins\x00\x00map\x00world\x00numplayers\x002\x00\
          maxplayers\x0020\x00hostport\x0025565\x00hostip\x00127.0.0.1\x00\x00\
          \x01player_\x00\x00Notch\x00Dinnerbone\x00\x00",
    );
    response
}

pub async fn spawn_minecraft_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = &buf[..len];
            if len < 7 || request[..2] != [0xfe, 0xfd] {
                continue;
            }
            let session = &request[3..7];

            let reply = match request[2] {
                0x09 => {
                    let mut reply = vec![0x09];
                    reply.extend_from_slice(session);
                    reply.extend_from_slice(format!("{}\0", MINECRAFT_CHALLENGE).as_bytes());
                    reply
                }
                0x00 if len == 15 && request[7..11] == MINECRAFT_CHALLENGE.to_be_bytes() => {
                    minecraft_full_stat(session)
                }
                _ => continue,
            };
            socket.send_to(&reply, peer).await.unwrap();
        }
    });

    addr
}

const A2S_CHALLENGE: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

fn a2s_info_payload() -> Vec<u8> {
    let mut payload = vec![0xff, 0xff, 0xff, 0xff, 0x49, 17];
    payload.extend_from_slice(b"Test Server\0de_inferno\0cstrike\0Counter-Strike: Source\0");
    payload.extend_from_slice(&240i16.to_le_bytes());
    payload.extend_from_slice(&[2, 32, 0, b'd', b'l', 0, 1]);
    payload
}

fn a2s_player_payload() -> Vec<u8> {
    let mut payload = vec![0xff, 0xff, 0xff, 0xff, 0x44, 2];
    for (index, (name, score)) in [("alice", 14i32), ("bob", 3)].iter().enumerate() {
        payload.push(index as u8);
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&score.to_le_bytes());
        payload.extend_from_slice(&61.5f32.to_le_bytes());
    }
    payload
}

fn split(payload: &[u8], id: i32) -> Vec<Vec<u8>> {
    let chunks: Vec<&[u8]> = payload.chunks(24).collect();
    chunks
        .iter()
        .enumerate()
        .map(|(number, chunk)| {
            let mut datagram = (-2i32).to_le_bytes().to_vec();
            datagram.extend_from_slice(&id.to_le_bytes());
            datagram.extend_from_slice(&[chunks.len() as u8, number as u8]);
            datagram.extend_from_slice(&1248u16.to_le_bytes());
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect()
}

/// Serves A2S, demanding a challenge for both requests and splitting the info response.
pub async fn spawn_a2s_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = &buf[..len];
            if len < 5 {
                continue;
            }

            let challenged = request.ends_with(&A2S_CHALLENGE);
            let datagrams = match (request[4], challenged) {
                (0x54 | 0x55, false) => {
                    let mut reply = vec![0xff, 0xff, 0xff, 0xff, 0x41];
                    reply.extend_from_slice(&A2S_CHALLENGE);
                    vec![reply]
                }
                (0x54, true) => split(&a2s_info_payload(), 42),
                (0x55, true) => vec![a2s_player_payload()],
                _ => continue,
            };

            for datagram in datagrams.iter().rev() {
                socket.send_to(datagram, peer).await.unwrap();
            }
        }
    });

    addr
}
