//! The Coco metrics router.
//!
//! Coco receives collectd datagrams over UDP and forwards every data set to one backend of each
//! configured tier. Within a tier, the backend is chosen by consistent hashing of the originating
//! host name, so all metrics of a host end up on the same backend and adding a backend only moves
//! a small share of hosts.
//!
//! The server is made up of the following stages, each running on its own thread:
//!
//! ```text
//!   UDP ──▶ Listener ──raw──▶ Filter × N ──filtered──▶ Router ──▶ tier1 target
//!                                                              └──▶ tier2 target
//! ```
//!
//! - The [`Listener`](services::listener::Listener) decodes datagrams with `coco-protocol`.
//! - A pool of [`FilterService`](services::filter::FilterService) workers drops packets whose
//!   `host/metric` name matches the blacklist.
//! - The [`Router`](services::router::Router) encodes every accepted packet once and sends it to
//!   the responsible target of every tier.
//!
//! Next to the data path, the [`Measure`](services::measure::Measure) service samples queue depths
//! and an HTTP API exposes shard lookups, the accounting maps and all counters.
#![warn(missing_docs)]

use std::io;
use std::sync::Arc;
use std::thread;

use coco_config::Config;
use coco_protocol::{Packet, TypesDb, TypesDbError};
use coco_telemetry::Registry;
use tokio::sync::oneshot;

use crate::accounting::Accounting;
use crate::counters::{ErrorCounters, QueueGauges};
use crate::queue::queue;
use crate::service::ServiceState;
use crate::services::filter::{Blacklist, FilterService};
use crate::services::listener::Listener;
use crate::services::measure::Measure;
use crate::services::router::{Router, RouterError};
use crate::services::server::HttpServer;
use crate::tier::Tiers;
use crate::upstream::UdpDialer;

pub mod accounting;
pub mod counters;
mod endpoints;
pub mod queue;
pub mod ring;
pub mod service;
pub mod services;
pub mod tier;
pub mod upstream;

#[cfg(test)]
mod testutils;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The type definitions could not be loaded.
    #[error("could not load types.db")]
    TypesDb(#[from] TypesDbError),

    /// The blacklist is not a valid regular expression.
    #[error("invalid blacklist pattern")]
    Blacklist(#[from] regex::Error),

    /// Binding the UDP listen socket failed.
    #[error("bind to listen address failed")]
    ListenFailed(#[source] io::Error),

    /// Binding the introspection API failed.
    #[error("bind to api address failed")]
    BindFailed(#[source] io::Error),

    /// No tier has a single reachable target.
    #[error("no reachable targets in any tier")]
    NoTargets,

    /// A worker thread could not be started.
    #[error("could not spawn {0} thread")]
    SpawnFailed(String, #[source] io::Error),

    /// The async runtime for the introspection API could not be created.
    #[error("could not start runtime")]
    Runtime(#[source] io::Error),

    /// The introspection API stopped serving.
    #[error("api server failed")]
    Api(#[source] io::Error),

    /// Routing failed fatally.
    #[error("router failed")]
    Router(#[from] RouterError),
}

fn spawn<F>(name: String, f: F) -> Result<(), ServerError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map(drop)
        .map_err(|error| ServerError::SpawnFailed(name, error))
}

/// Runs the router and spawns all worker threads.
///
/// This blocks the current thread until the introspection API fails or the router hits a fatal
/// error. Startup fails if the type definitions or the blacklist cannot be loaded, the sockets
/// cannot be bound, or no tier has a reachable target.
pub fn run(config: Config) -> Result<(), ServerError> {
    let registry = Arc::new(Registry::new());
    registry.declare(ErrorCounters::SendDial);
    registry.declare(ErrorCounters::LookupHashGet);

    let types = TypesDb::from_path(config.types_db_path())?;
    coco_log::info!(
        "loaded {} type definitions from {}",
        types.len(),
        config.types_db_path().display()
    );

    let blacklist = Blacklist::new(config.blacklist())?;

    let dialer = UdpDialer::new(config.write_timeout());
    let tiers = Arc::new(Tiers::build(config.tiers(), &dialer, &registry)?);
    let accounting = Arc::new(Accounting::new(&tiers));

    let capacity = config.queue_capacity();
    let policy = config.queue_policy();
    let (raw_tx, raw_rx) = queue::<Packet>("raw", capacity, policy, &registry);
    let (filtered_tx, filtered_rx) = queue::<Packet>("filtered", capacity, policy, &registry);

    let listener = Listener::bind(
        config.listen_addr(),
        Arc::new(types),
        Arc::clone(&registry),
        config.max_datagram_size(),
    )
    .map_err(ServerError::ListenFailed)?;
    coco_log::info!("listening for collectd datagrams on {}", config.listen_addr());

    spawn("listener".to_owned(), move || {
        if let Err(error) = listener.run(raw_tx) {
            coco_log::error!(error = &error as &dyn std::error::Error, "listener stopped");
        }
    })?;

    let filter = FilterService::new(
        blacklist,
        accounting.filtered().clone(),
        Arc::clone(&registry),
    );
    for id in 0..config.filter_workers() {
        let filter = filter.clone();
        let rx = raw_rx.clone();
        let tx = filtered_tx.clone();
        spawn(format!("filter-{id}"), move || {
            if let Err(error) = filter.run(rx, tx) {
                coco_log::error!(error = &error as &dyn std::error::Error, "filter stopped");
            }
        })?;
    }
    drop(filtered_tx);

    let (fatal_tx, fatal_rx) = oneshot::channel();
    let router = Router::new(Arc::clone(&tiers), Arc::clone(&registry));
    let router_rx = filtered_rx.clone();
    spawn("router".to_owned(), move || {
        if let Err(error) = router.run(router_rx) {
            fatal_tx.send(error).ok();
        }
    })?;

    let measure = Measure::new(
        config.measure_interval(),
        Arc::clone(&tiers),
        Arc::clone(&accounting),
        Arc::clone(&registry),
    )
    .queue(QueueGauges::Raw, raw_rx)
    .queue(QueueGauges::Filtered, filtered_rx)
    .max_age(config.accounting_max_age());
    spawn("measure".to_owned(), move || measure.run())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("coco-api")
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;

    let state = ServiceState::new(tiers, accounting, registry);

    runtime.block_on(async move {
        let server = HttpServer::new(config.api_addr(), config.api_timeout(), state);
        let handle = server.handle();
        let serve = server.serve();
        tokio::pin!(serve);

        // The handle reports no address if binding failed.
        let addr = tokio::select! {
            Some(addr) = handle.listening() => addr,
            result = &mut serve => {
                let error = result.err().unwrap_or_else(|| io::Error::other("server stopped"));
                return Err(ServerError::BindFailed(error));
            }
        };
        coco_log::info!("introspection api listening on http://{addr}/");

        tokio::select! {
            result = serve => result.map_err(ServerError::Api),
            Ok(error) = fatal_rx => {
                coco_log::error!(
                    error = &error as &dyn std::error::Error,
                    "routing failed, shutting down"
                );
                Err(ServerError::Router(error))
            }
        }
    })
}
