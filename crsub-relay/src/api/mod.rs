//! HTTP API handlers for crsub-relay

pub mod buildinfo;
pub mod drafts;
pub mod health;
pub mod listing;
pub mod submit;

pub use buildinfo::get_build_info;
pub use drafts::{clear_draft, load_draft, save_draft};
pub use health::health_routes;
pub use listing::{list_escadrons, list_records};
pub use submit::submit_records;
