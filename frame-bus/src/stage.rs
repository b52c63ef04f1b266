//! Boxed pull streams passed between pipeline stages.
//!
//! A stage yields `Ok(item)` until its input is exhausted, then ends. A
//! stage that fails yields a single `Err` and ends.

use std::pin::Pin;

use futures::Stream;

use crate::{chunk::EncodedChunk, error::Result, frame::Frame};

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<EncodedChunk>> + Send>>;
