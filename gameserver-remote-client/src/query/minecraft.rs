use super::{latin1_to_string, QueryPlayer, QueryResult};
use crate::net::{connect_udp, timed};
use crate::ErrorKind;
use futures::future::BoxFuture;
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;

const MAGIC: [u8; 2] = [0xfe, 0xfd];
const TYPE_HANDSHAKE: u8 = 0x09;
const TYPE_STAT: u8 = 0x00;

/// Minecraft only reads the low four bits of each session byte.
const SESSION_ID: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

/// type(1) + session(4)
const HANDSHAKE_HEADER_LEN: usize = 5;

/// type(1) + session(4) + "splitnum\0\x80\0"(11)
const FULL_STAT_HEADER_LEN: usize = 16;

const SECTION_SEPARATOR: &[u8] = b"\x00\x00\x01";
const RECEIVE_BUFFER_LEN: usize = 8192;

pub(super) fn query(
    host: &str,
    port: u16,
    timeout: Duration,
) -> BoxFuture<'_, crate::Result<QueryResult>> {
    Box::pin(async move {
        let socket = connect_udp((host, port), timeout).await?;

        let challenge = handshake(&socket, timeout).await?;
        let response = exchange(&socket, timeout, &full_stat_request(challenge)).await?;

        parse_full_stat(&response)
    })
}

async fn handshake(socket: &UdpSocket, timeout: Duration) -> crate::Result<[u8; 4]> {
    let mut request = MAGIC.to_vec();
    request.push(TYPE_HANDSHAKE);
    request.extend_from_slice(&SESSION_ID);

    let response = exchange(socket, timeout, &request).await?;
    parse_challenge(&response)
}

async fn exchange(
    socket: &UdpSocket,
    timeout: Duration,
    request: &[u8],
) -> crate::Result<Vec<u8>> {
    timed(timeout, "send query", socket.send(request)).await?;

    let mut buf = vec![0u8; RECEIVE_BUFFER_LEN];
    let len = timed(timeout, "receive query response", socket.recv(&mut buf)).await?;
    buf.truncate(len);
    Ok(buf)
}

fn full_stat_request(challenge: [u8; 4]) -> Vec<u8> {
    let mut request = MAGIC.to_vec();
    request.push(TYPE_STAT);
    request.extend_from_slice(&SESSION_ID);
    request.extend_from_slice(&challenge);
    // Padding turns a basic stat request into a full stat request
    request.extend_from_slice(&[0, 0, 0, 0]);
    request
}

/// Reads the decimal challenge token and encodes it as the four big-endian bytes the stat request
/// expects.
pub(crate) fn parse_challenge(response: &[u8]) -> crate::Result<[u8; 4]> {
    let payload = response
        .get(HANDSHAKE_HEADER_LEN..)
        .ok_or(ErrorKind::InvalidChallengeResponse)?;
    let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());

    let challenge: i32 = std::str::from_utf8(&payload[..end])
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or(ErrorKind::InvalidChallengeResponse)?;

    Ok(challenge.to_be_bytes())
}

pub(crate) fn parse_full_stat(response: &[u8]) -> crate::Result<QueryResult> {
    if response.len() < FULL_STAT_HEADER_LEN {
        return Err(ErrorKind::InvalidPacket("truncated full stat response").into());
    }
    if response[0] != TYPE_STAT {
        return Err(ErrorKind::InvalidPacket("unexpected full stat response type").into());
    }

    let body = &response[FULL_STAT_HEADER_LEN..];
    let (variables, players) = match find(body, SECTION_SEPARATOR) {
        Some(pos) => (&body[..pos], Some(&body[pos + SECTION_SEPARATOR.len()..])),
        None => (body, None),
    };

    let mut result = QueryResult {
        query_time: SystemTime::now(),
        online: true,
        name: String::new(),
        map: String::new(),
        players_num: 0,
        max_players_num: 0,
        players: Vec::new(),
    };

    let mut fields = variables.split(|b| *b == 0);
    while let Some(key) = fields.next() {
        if key.is_empty() {
            break;
        }
        let value = latin1_to_string(fields.next().unwrap_or_default());

        match key {
            b"hostname" => result.name = value,
            b"mapname" | b"map" => result.map = value,
            b"numplayers" => result.players_num = value.trim().parse().unwrap_or(0),
            b"maxplayers" => result.max_players_num = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }

    if let Some(players) = players {
        result.players = players
            .split(|b| *b == 0)
            .filter(|name| !name.is_empty() && !name.ends_with(b"_"))
            .map(|name| QueryPlayer {
                name: latin1_to_string(name),
                score: 0,
            })
            .collect();
    }

    Ok(result)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
