//! # annidx
//!
//! Embedded approximate-nearest-neighbor vector index engine.
//!
//! `annidx` is a local, in-process vector index library: no server, no
//! network protocol. It provides three index kinds behind a common
//! [`index::Index`] trait — exact brute-force ([`index::flat::FlatIndex`]),
//! graph-based approximate search ([`index::hnsw::HnswIndex`]), and
//! cluster-based approximate search ([`index::ivfpq::IvfPqIndex`]) — plus
//! optional vector quantization and durable binary persistence.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use annidx::config::HnswConfig;
//! use annidx::entry::VectorEntry;
//! use annidx::index::{hnsw::HnswIndex, Index};
//! use annidx::cancel::CancellationToken;
//!
//! let index = HnswIndex::new(HnswConfig { dimension: 3, ..Default::default() });
//! let ctx = CancellationToken::none();
//! index.insert(&ctx, VectorEntry::without_metadata("doc-1", vec![0.1, 0.2, 0.3]))?;
//! let results = index.search(&ctx, &[0.1, 0.2, 0.3], 10)?;
//! # Ok::<(), annidx::error::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod distance;
pub mod entry;
pub mod error;
pub mod heap;
pub mod index;
pub mod quantization;

pub use cancel::CancellationToken;
pub use config::{AnnidxConfig, FlatConfig, HnswConfig, IvfPqConfig, QuantizerConfig, QuantizerKind};
pub use distance::DistanceMetric;
pub use entry::{Metadata, MetadataValue, SearchResult, VectorEntry};
pub use error::{Error, ErrorKind, Result};
pub use index::flat::FlatIndex;
pub use index::hnsw::HnswIndex;
pub use index::ivfpq::IvfPqIndex;
pub use index::Index;
