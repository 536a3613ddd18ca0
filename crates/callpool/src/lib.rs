#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod completions;
mod config;
mod error;
mod ingress;
mod payload;
mod pool;
mod producer;
mod remote;
mod request;
mod retry;
mod sequencer;
mod sink;
mod tracker;

pub use crate::client::*;
pub use crate::completions::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::payload::*;
pub use crate::producer::{ProducerHandle, ProducerOptions, ProducerOutcome};
pub use crate::remote::*;
pub use crate::request::Request;
pub use crate::sequencer::*;
pub use crate::tracker::TrackerSnapshot;
