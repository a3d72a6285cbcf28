use crate::rcon::{new_client, Client};
use crate::{Config, ErrorKind};
use async_trait::async_trait;
use deadpool::managed::{self, Object, PoolError, TimeoutType, Timeouts};
use deadpool::Runtime;
use log::{debug, info, warn};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default number of connections kept open to one server.
pub const DEFAULT_MAX_SIZE: usize = 3;

/// Default period of the idle eviction scan.
pub const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default time an idle connection may sit in the pool before it is closed.
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(10);

/// Sizing and eviction settings for a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of connections open at the same time.
    pub max_size: usize,
    pub idle_check_interval: Duration,
    pub max_idle_time: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            max_size: DEFAULT_MAX_SIZE,
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
        }
    }
}

/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStat {
    /// Connections currently checked out.
    pub acquired: usize,
    /// Connections open and waiting in the pool.
    pub idle: usize,
    /// All open connections.
    pub total: usize,
    pub max_size: usize,
}

/// An authenticated client owned by the pool.
pub(crate) struct Resource {
    client: Box<dyn Client>,
    last_used_at: Mutex<Instant>,
}

impl Resource {
    fn new(client: Box<dyn Client>) -> Self {
        Resource {
            client,
            last_used_at: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used_at.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last_used_at = *self.last_used_at.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_used_at)
    }

    /// Closes the connection. Failures are only logged, they must not hold up pool bookkeeping.
    async fn destroy(mut self, address: &str) {
        match self.client.close().await {
            Ok(()) => debug!("closed pooled connection to {}", address),
            Err(err) => warn!("failed to close pooled connection to {}: {}", address, err),
        }
    }
}

pub(crate) struct Manager {
    config: Config,
}

impl managed::Manager for Manager {
    type Type = Resource;
    type Error = crate::Error;

    async fn create(&self) -> crate::Result<Resource> {
        let mut client = new_client(&self.config)?;
        client.open().await?;

        debug!("opened pooled connection to {}", self.config.address);
        Ok(Resource::new(client))
    }

    async fn recycle(
        &self,
        _: &mut Resource,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<crate::Error> {
        Ok(())
    }
}

struct EvictionTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A bounded pool of authenticated RCON connections to a single server.
///
/// Connections are opened on demand, handed out exclusively through [`PooledClient`], and closed
/// by a background task once they have been idle for longer than
/// [`PoolOptions::max_idle_time`]. Create one pool per server.
pub struct Pool {
    inner: managed::Pool<Manager>,
    address: String,
    eviction: tokio::sync::Mutex<Option<EvictionTask>>,
}

impl Pool {
    /// Creates a pool with the default [`PoolOptions`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config) -> crate::Result<Self> {
        Self::with_options(config, PoolOptions::default())
    }

    /// Creates a pool with explicit sizing and eviction settings.
    ///
    /// The config is checked up front by building a throwaway client, so a bad config fails here
    /// rather than on the first [`acquire`](Pool::acquire). Must be called from within a Tokio
    /// runtime.
    pub fn with_options(config: Config, options: PoolOptions) -> crate::Result<Self> {
        drop(new_client(&config)?);

        if options.max_size == 0 {
            return Err(ErrorKind::Pool("max_size must be at least 1".to_string()).into());
        }

        let address = config.address.clone();
        let inner = managed::Pool::builder(Manager { config })
            .max_size(options.max_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|err| ErrorKind::Pool(err.to_string()))?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(evict_idle(
            inner.clone(),
            address.clone(),
            options,
            shutdown_rx,
        ));

        info!(
            "created rcon pool for {} with max {} connections",
            address, options.max_size
        );

        Ok(Pool {
            inner,
            address,
            eviction: tokio::sync::Mutex::new(Some(EvictionTask { shutdown, handle })),
        })
    }

    /// Checks out a connection, waiting for one to be returned or opened.
    ///
    /// Opening a connection is bounded by the config's timeout; to bound the wait for a busy
    /// pool, wrap the call in [`tokio::time::timeout`].
    pub async fn acquire(&self) -> crate::Result<PooledClient> {
        let object = self.inner.get().await.map_err(pool_error)?;
        Ok(PooledClient::new(object, self.address.clone()))
    }

    /// Checks out a connection without waiting for a busy one to come back.
    ///
    /// Fails with [`ErrorKind::PoolExhausted`] when every connection is checked out. If the pool
    /// still has room, a new connection is opened.
    pub async fn try_acquire(&self) -> crate::Result<PooledClient> {
        let mut timeouts = Timeouts::new();
        timeouts.wait = Some(Duration::ZERO);

        let object = self
            .inner
            .timeout_get(&timeouts)
            .await
            .map_err(pool_error)?;
        Ok(PooledClient::new(object, self.address.clone()))
    }

    pub fn stat(&self) -> PoolStat {
        let status = self.inner.status();
        PoolStat {
            acquired: status.size.saturating_sub(status.available),
            idle: status.available,
            total: status.size,
            max_size: status.max_size,
        }
    }

    /// Stops the eviction task, closes every idle connection and closes the pool.
    ///
    /// Connections still checked out are closed when they are returned. Later calls to
    /// [`acquire`](Pool::acquire) fail with [`ErrorKind::PoolClosed`]. Calling this again is a
    /// no-op.
    pub async fn close(&self) {
        if let Some(task) = self.eviction.lock().await.take() {
            let _ = task.shutdown.send(());
            if let Err(err) = task.handle.await {
                warn!("idle eviction task for {} failed: {}", self.address, err);
            }
        }

        for resource in self.inner.retain(|_, _| false).removed {
            resource.destroy(&self.address).await;
        }
        self.inner.close();

        info!("closed rcon pool for {}", self.address);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(task) = self.eviction.get_mut().take() {
            task.handle.abort();
        }
    }
}

async fn evict_idle(
    pool: managed::Pool<Manager>,
    address: String,
    options: PoolOptions,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(options.idle_check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => break,
        }

        // retain holds the idle slots for the whole scan, so no acquire can race with it
        let now = Instant::now();
        let evicted = pool
            .retain(|resource, _| resource.idle_for(now) <= options.max_idle_time)
            .removed;

        if !evicted.is_empty() {
            debug!(
                "evicting {} idle connections to {}",
                evicted.len(),
                address
            );
        }
        for resource in evicted {
            resource.destroy(&address).await;
        }
    }

    debug!("idle eviction task for {} stopped", address);
}

fn pool_error(err: PoolError<crate::Error>) -> crate::Error {
    match err {
        PoolError::Backend(err) => err,
        PoolError::Closed => ErrorKind::PoolClosed.into(),
        PoolError::Timeout(TimeoutType::Wait) => ErrorKind::PoolExhausted.into(),
        other => ErrorKind::Pool(other.to_string()).into(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A connection checked out of a [`Pool`].
///
/// [`open`](Client::open) does nothing because the connection is already authenticated, and
/// [`close`](Client::close) hands it back to the pool instead of disconnecting. Dropping a
/// `PooledClient` also hands it back.
///
/// If [`execute`](Client::execute) fails the connection may be out of sync with the server, so
/// it is closed and removed from the pool; later calls on this checkout fail with
/// [`ErrorKind::ClientReleased`].
pub struct PooledClient {
    resource: Option<Object<Manager>>,
    address: String,
}

impl PooledClient {
    fn new(object: Object<Manager>, address: String) -> Self {
        object.touch();
        PooledClient {
            resource: Some(object),
            address,
        }
    }
}

#[async_trait]
impl Client for PooledClient {
    async fn open(&mut self) -> crate::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> crate::Result<()> {
        let Some(object) = self.resource.take() else {
            return Ok(());
        };
        object.touch();

        // Returning the object runs the pool's own bookkeeping, which must not unwind into callers
        std::panic::catch_unwind(AssertUnwindSafe(move || drop(object)))
            .map_err(|payload| ErrorKind::PoolPanic(panic_message(payload.as_ref())).into())
    }

    async fn execute(&mut self, command: &str) -> crate::Result<String> {
        let object = self.resource.as_mut().ok_or(ErrorKind::ClientReleased)?;
        let result = object.client.execute(command).await;

        match result {
            Ok(output) => Ok(output),
            Err(err) => {
                if let Some(object) = self.resource.take() {
                    debug!(
                        "discarding pooled connection to {} after error: {}",
                        self.address, err
                    );
                    Object::take(object).destroy(&self.address).await;
                }
                Err(err)
            }
        }
    }
}
