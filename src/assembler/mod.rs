//! Output formatting for fetched log text.

pub mod scrub;
pub mod slow_query;

use crate::config::{Config, DbType};
use std::sync::Arc;

pub use scrub::Scrubber;
pub use slow_query::{SlowQueryAssembler, SlowQueryRecord};

/// Turns one fetched blob into the pieces written to a sink.
pub trait Formatter: Send + Sync {
    fn format<'a>(&'a self, blob: &'a str) -> Box<dyn Iterator<Item = String> + Send + 'a>;
}

/// Emits the blob unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Formatter for Passthrough {
    fn format<'a>(&'a self, blob: &'a str) -> Box<dyn Iterator<Item = String> + Send + 'a> {
        Box::new((!blob.is_empty()).then(|| blob.to_string()).into_iter())
    }
}

/// Record assembly only applies to the MySQL slow log; everything else passes through.
pub fn build_formatter(config: &Config) -> Result<Arc<dyn Formatter>, regex::Error> {
    if config.formatter && config.db_type == DbType::MySql {
        let scrubber = Scrubber::new(config.scrub_query)?;
        Ok(Arc::new(SlowQueryAssembler::new(scrubber)?))
    } else {
        Ok(Arc::new(Passthrough))
    }
}
