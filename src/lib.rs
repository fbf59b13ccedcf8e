pub mod config;
pub mod db;
pub mod endpoint;
pub mod model;
pub mod notify;
pub mod region;
pub mod signals;
pub mod snapshot;
pub mod store;

pub mod util {
    pub mod env;
}
