pub mod bundle;
pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod metrics;
pub mod planning;
pub mod schema;
pub mod state;
pub mod util;
