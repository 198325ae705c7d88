#![doc(html_root_url = "https://docs.rs/row-window/0.0.3")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod active;
pub mod communicator;
pub mod config;
pub mod error;
pub mod hierarchical;
pub mod hierarchy;
pub mod key_mapper;
pub mod provider;
pub mod shared;
pub mod sink;
mod temp_set;

pub use communicator::{DataCommunicator, RoundOutcome, RowRequest};
pub use config::CommunicatorConfig;
pub use error::{HierarchyError, ProviderError, SyncError};
pub use hierarchical::HierarchicalDataCommunicator;
pub use hierarchy::HierarchyMapper;
pub use key_mapper::{Key, KeyMapper};
pub use shared::SharedCommunicator;
