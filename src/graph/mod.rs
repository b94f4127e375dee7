pub mod node;
pub mod options;
pub mod processor;

pub use node::*;
pub use options::*;
pub use processor::*;

use serde::{Deserialize, Serialize};

/// Kind of graph write the processed data is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GraphWriteMode {
    Insert,
    Upsert,
    Patch,
}

impl GraphWriteMode {
    /// Options a write of this kind starts from before the caller's options
    /// are merged on top.
    pub fn default_options(&self) -> GraphOptions {
        match self {
            GraphWriteMode::Insert => GraphOptions::new().relate(true),
            GraphWriteMode::Upsert => GraphOptions::new()
                .relate(true)
                .unrelate(true)
                .insert_missing(true),
            GraphWriteMode::Patch => GraphOptions::new()
                .relate(true)
                .unrelate(true)
                .insert_missing(true)
                .no_delete(true),
        }
    }
}
