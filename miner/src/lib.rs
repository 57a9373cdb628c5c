//! Round-driven key mining.
//!
//! [`engine::Engine`] is the entry point: build [`controller::MinerSettings`]
//! with [`config::MinerConfig::settings`], hand it a ledger client and a store,
//! then drive it with [`engine::Engine::run`].
//!
//! ```ignore
//! let settings = load_config_file("miner.json")?.settings(ledger.signer(), num_cpus::get())?;
//! let store = Arc::new(FileStore::open(".miner")?);
//! let (events_tx, mut events) = unbounded_channel();
//! let engine = Engine::new(ledger, settings, store, events_tx);
//! tokio::spawn(engine.run(shutdown_rx));
//! ```

pub mod block_source;
pub mod config;
pub mod controller;
pub mod difficulty;
pub mod engine;
pub mod errors;
pub mod round_clock;
pub mod sink;
pub mod submitter;

#[cfg(test)]
mod mock;
