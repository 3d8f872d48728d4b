//! Configuration for the periweb gateway: schema, discovery, and the
//! `host:port` listen address the server binds to.

pub mod env_subst;
pub mod listen;
pub mod loader;
pub mod schema;

pub use {
    listen::ListenAddr,
    loader::{clear_config_dir, discover_and_load, load_config, set_config_dir},
    schema::{PeriwebConfig, ServerConfig},
};
