pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod types;

pub use backend::{backend_channel, BackendHandle, BackendRequest};
pub use config::{KeyManagement, SupplicantConfig};
pub use dispatcher::{DispatchReport, Dispatcher, Observer, ObserverResult, SubscriptionId};
pub use registry::SessionRegistry;
pub use session::Session;
pub use types::*;
