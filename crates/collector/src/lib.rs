//! pstrace - Collector
//!
//! Receives remote tracer streams over TCP and stores the events in a
//! length-delimited trace file that `pstrace_sinks::read_delimited` can read
//! back.
//!
//! ```text
//! [RemoteTracer] --gzip batches--> [Collector] --RawDelimited--> [traces.pb]
//! ```

mod error;
mod metrics;
mod server;

pub use error::CollectorError;
pub use metrics::{CollectorMetrics, CollectorSnapshot};
pub use server::Collector;
