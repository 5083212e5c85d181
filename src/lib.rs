pub mod clock;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod gate;
pub mod handlers;
pub mod health;
pub mod key;
pub mod metrics;
pub mod middleware;
pub mod outcome;
pub mod response;
pub mod routes;
pub mod server;
pub mod store;
pub mod tier;

pub use config::{Config, Settings};
pub use error::{ThrottlerError, ThrottlerResult};
pub use gate::{Admission, AdmissionGate, Decision, FailurePolicy};
pub use outcome::Outcome;
pub use server::{create_app, throttled};
pub use tier::{Tier, TierSet};
