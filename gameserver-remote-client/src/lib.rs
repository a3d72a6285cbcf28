//! This crate provides the remote control and status query layer of a game-server management
//! panel: a pooled RCON client for [Source] and [GoldSource] servers, plus one-shot server status
//! queries over Valve's [A2S] protocol and Minecraft's GameSpy4-style [query] protocol.
//!
//! Everything is asynchronous and requires a [Tokio](https://tokio.rs/) runtime.
//!
//! Administrative commands go through a [`Pool`], which keeps a handful of authenticated
//! connections per server and evicts the ones that sit idle. Status queries are stateless and go
//! through [`query`].
//!
//! # Example
//! ```rust,no_run
//! use gameserver_remote_client::{Client, Config, Pool, RconProtocol};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::new("127.0.0.1:27015", "password123", RconProtocol::Source);
//!     let pool = Pool::new(config).unwrap();
//!
//!     let mut client = pool.acquire().await.unwrap();
//!     let status = client.execute("status").await.unwrap();
//!     println!("{}", status);
//!     client.close().await.unwrap();
//!
//!     let result = gameserver_remote_client::query("127.0.0.1", 27015, "source").await;
//!     match result {
//!         Ok(result) => println!("{} on {}, {}", result.name, result.map, result.players_label()),
//!         Err(err) => println!("offline: {}", err),
//!     }
//!
//!     pool.close().await;
//! }
//! ```
//!
//! [Source]: https://developer.valvesoftware.com/wiki/Source_RCON_Protocol
//! [GoldSource]: https://developer.valvesoftware.com/wiki/Goldsource
//! [A2S]: https://developer.valvesoftware.com/wiki/Server_queries
//! [query]: https://wiki.vg/Query

mod config;
mod net;
mod pool;
mod query;
mod rcon;

pub use self::config::{Config, RconProtocol, DEFAULT_TIMEOUT};
pub use self::pool::{Pool, PoolOptions, PoolStat, PooledClient};
pub use self::query::{
    query, query_with_timeout, QueryError, QueryPlayer, QueryResult, DEFAULT_QUERY_TIMEOUT,
    query_protocols,
};
pub use self::rcon::{new_client, Client, GoldSource, Source};

/// Error type for RCON and query operations.
///
/// Use [`Error::kind`] to tell a rejected request apart from a broken network.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

/// The category of an [`Error`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("unsupported RCON protocol `{0}`")]
    UnsupportedRconProtocol(String),

    #[error("unsupported query protocol `{0}`")]
    UnsupportedQueryProtocol(String),

    #[error("invalid server address `{0}`")]
    InvalidAddress(String),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: timed out")]
    Timeout { context: &'static str },

    #[error("client is not connected")]
    NotConnected,

    #[error("invalid challenge response")]
    InvalidChallengeResponse,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("no pooled connection is available")]
    PoolExhausted,

    #[error("connection pool panicked: {0}")]
    PoolPanic(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("pooled client has already been released")]
    ClientReleased,
}

/// [`Result`] alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Returns `true` if the error was caused by the network rather than by the server's answer.
    pub fn is_transport(&self) -> bool {
        matches!(self.0, ErrorKind::Io { .. } | ErrorKind::Timeout { .. })
    }
}

impl<T> From<T> for Error
where
    T: Into<ErrorKind>,
{
    fn from(inner: T) -> Self {
        Error(inner.into())
    }
}
