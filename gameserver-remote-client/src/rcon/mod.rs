mod goldsource;
mod packet;
mod source;

pub use self::goldsource::GoldSource;
pub use self::source::Source;

use crate::{Config, RconProtocol};
use async_trait::async_trait;

/// A connection to a game server's remote console.
///
/// A client is single-connection: `execute` takes `&mut self`, so commands on one client always
/// run one after another. Share connections between tasks through a [`Pool`](crate::Pool).
#[async_trait]
pub trait Client: Send {
    /// Connects and authenticates.
    async fn open(&mut self) -> crate::Result<()>;

    /// Releases the connection.
    async fn close(&mut self) -> crate::Result<()>;

    /// Runs a console command and returns its output.
    async fn execute(&mut self, command: &str) -> crate::Result<String>;
}

/// Creates an unopened client for the protocol named in `config`.
///
/// The config is validated here, so a bad address fails before any network traffic.
pub fn new_client(config: &Config) -> crate::Result<Box<dyn Client>> {
    config.validate()?;

    let client: Box<dyn Client> = match config.protocol {
        RconProtocol::Source => Box::new(Source::new(config.clone())),
        RconProtocol::GoldSource => Box::new(GoldSource::new(config.clone())),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn creates_client_for_each_protocol() {
        for protocol in [RconProtocol::Source, RconProtocol::GoldSource] {
            assert!(new_client(&Config::new("127.0.0.1:27015", "pw", protocol)).is_ok());
        }
    }

    #[test]
    fn rejects_bad_address_without_connecting() {
        let err = new_client(&Config::new("not an address", "pw", RconProtocol::Source))
            .err()
            .unwrap();
        assert!(matches!(err.kind(), ErrorKind::InvalidAddress(_)));
    }
}
