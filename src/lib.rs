pub mod boundary;
pub mod cli;
pub mod config;
pub mod error;
pub mod facade;
mod fast;
pub mod hamming;
pub mod handle;
pub mod image;
pub mod ivf;
pub mod kmodes;
pub mod matcher;
mod metrics;
pub mod orb;
pub mod store;
pub mod types;
pub mod utils;

pub use boundary::{BoundaryError, BoundaryResult, ErrorCategory, Runtime};
pub use config::{DataDir, IndexConfig, Opts};
pub use error::{ErrorKind, IndexError, NO_MATCH, STATUS_OK};
pub use facade::{IqIndex, IqIndexBuilder};
pub use types::{Candidate, Descriptor, FeatureSet};
