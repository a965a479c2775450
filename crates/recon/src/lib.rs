//! `schoolmatch-recon`: school and district entity resolution engine.
//!
//! Pure engine crate: receives pre-loaded record sets, returns matched and
//! quarantined sets with a summary. No CLI dependencies; CSV helpers live in
//! [`table`].

pub mod config;
pub mod crosswalk;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod geo;
pub mod model;
pub mod normalize;
pub mod proximity;
pub mod quarantine;
pub mod similarity;
pub mod standardize;
pub mod table;

pub use config::ReconConfig;
pub use engine::run;
pub use error::ReconError;
pub use model::{Record, RecordSet, ReconInput, ReconResult, Value};
pub use proximity::{proximity_join, JoinMode};
pub use quarantine::QuarantineReason;
