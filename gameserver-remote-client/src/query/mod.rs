mod minecraft;
mod source;

use crate::ErrorKind;
use futures::future::BoxFuture;
use serde::Serialize;
use std::time::{Duration, SystemTime};

/// Timeout applied to each send and receive of a status query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Live status of a game server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query_time: SystemTime,
    /// `false` when the server did not answer; the remaining fields are then empty.
    pub online: bool,
    pub name: String,
    pub map: String,
    pub players_num: usize,
    pub max_players_num: usize,
    pub players: Vec<QueryPlayer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPlayer {
    pub name: String,
    /// Always 0 for protocols that do not report scores.
    pub score: i64,
}

impl QueryResult {
    pub(crate) fn offline() -> Self {
        QueryResult {
            query_time: SystemTime::now(),
            online: false,
            name: String::new(),
            map: String::new(),
            players_num: 0,
            max_players_num: 0,
            players: Vec::new(),
        }
    }

    /// Player count in `online/max` form.
    pub fn players_label(&self) -> String {
        format!("{}/{}", self.players_num, self.max_players_num)
    }
}

/// A failed status query.
///
/// The error still carries an offline [`QueryResult`], so a status page can render the server
/// as offline instead of failing.
#[derive(Debug, thiserror::Error)]
#[error("server query failed")]
pub struct QueryError {
    pub result: QueryResult,
    #[source]
    error: crate::Error,
}

impl QueryError {
    fn offline(error: crate::Error) -> Self {
        QueryError {
            result: QueryResult::offline(),
            error,
        }
    }

    pub fn error(&self) -> &crate::Error {
        &self.error
    }

    pub fn into_parts(self) -> (QueryResult, crate::Error) {
        (self.result, self.error)
    }
}

type QueryFn = for<'a> fn(&'a str, u16, Duration) -> BoxFuture<'a, crate::Result<QueryResult>>;

const QUERY_ADAPTERS: &[(&str, QueryFn)] = &[
    ("source", source::query),
    ("minecraft", minecraft::query),
];

/// Names of the supported query protocols.
pub fn query_protocols() -> impl Iterator<Item = &'static str> {
    QUERY_ADAPTERS.iter().map(|(name, _)| *name)
}

/// Queries a server's status with [`DEFAULT_QUERY_TIMEOUT`].
///
/// `protocol` is one of [`query_protocols`]: `source` for Valve's A2S, `minecraft` for the
/// Minecraft query protocol (which must be enabled in the server's `server.properties`).
pub async fn query(host: &str, port: u16, protocol: &str) -> Result<QueryResult, QueryError> {
    query_with_timeout(host, port, protocol, DEFAULT_QUERY_TIMEOUT).await
}

/// Queries a server's status, bounding each network operation by `timeout`.
pub async fn query_with_timeout(
    host: &str,
    port: u16,
    protocol: &str,
    timeout: Duration,
) -> Result<QueryResult, QueryError> {
    let adapter = QUERY_ADAPTERS
        .iter()
        .find(|(name, _)| *name == protocol)
        .map(|(_, adapter)| *adapter)
        .ok_or_else(|| {
            QueryError::offline(ErrorKind::UnsupportedQueryProtocol(protocol.to_string()).into())
        })?;

    adapter(host, port, timeout).await.map_err(QueryError::offline)
}

/// Decodes ISO-8859-1 text. Every byte maps to the code point of the same value.
pub(crate) fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_protocol_yields_offline_result() {
        let err = query("127.0.0.1", 27015, "quake3").await.unwrap_err();

        assert!(!err.result.online);
        assert!(matches!(
            err.error().kind(),
            ErrorKind::UnsupportedQueryProtocol(name) if name == "quake3"
        ));
    }

    #[test]
    fn lists_protocols() {
        assert_eq!(query_protocols().collect::<Vec<_>>(), ["source", "minecraft"]);
    }

    #[test]
    fn formats_player_label() {
        let result = QueryResult {
            players_num: 3,
            max_players_num: 20,
            ..QueryResult::offline()
        };
        assert_eq!(result.players_label(), "3/20");
    }

    #[test]
    fn decodes_latin1() {
        assert_eq!(latin1_to_string(b"Caf\xe9 \xbb PvP"), "Café » PvP");
    }
}
