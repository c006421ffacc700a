pub mod dbus_proxies;
pub mod link;

pub use link::{LinkEvent, SupplicantLink};
