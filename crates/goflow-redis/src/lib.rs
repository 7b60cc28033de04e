//! Redis backend for goflow.
//!
//! - `RedisListStore`: Redis lists (LPUSH / BRPOP / RPUSH) as the list store
//!   behind goflow's list broker
//! - `producer_brokers` / `worker_brokers`: ready-made brokers on the
//!   `tasks` and `results` keys for each half of a distributed deployment

mod brokers;
mod client;
mod config;
mod list_store;

pub use brokers::{producer_brokers, worker_brokers, RedisBroker};
pub use client::{RedisClient, RedisClientError};
pub use config::RedisConfig;
pub use list_store::RedisListStore;
