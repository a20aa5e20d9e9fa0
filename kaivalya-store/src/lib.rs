pub mod app_config;
pub mod error;
pub mod events;
pub mod http_backend;
pub mod preference_store;
pub mod state;
pub mod telemetry;

pub use app_config::Config;
pub use error::StoreError;
pub use events::{EventRecord, JsonlEventSink};
pub use http_backend::HttpBackend;
pub use preference_store::FilePreferenceStore;
pub use state::{CheckoutState, GatewaySdks};
