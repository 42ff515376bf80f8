pub mod cache;
pub mod dispatcher;
pub mod enrich;
pub mod events;
pub mod session_api;
pub mod store;
pub mod sync;

pub mod models {
    pub mod frame;
    pub mod session;
    pub mod telemetry;
}

pub mod helpers {
    pub mod logging;
    pub mod math;
}
