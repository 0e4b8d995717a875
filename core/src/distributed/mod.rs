//! # Distributed Arrays
//!
//! This is where one logical array is spread over many workers.
//!
//! ## 🎓 The "Why" of Decomposition
//!
//! Imagine a spreadsheet too big for one desk. You cut it into strips of rows and hand one strip
//! to each colleague. When someone asks for "rows 200 to 900", you do not collect every strip:
//! you work out which colleagues hold those rows and which lines of *their* strip to read.
//!
//! That bookkeeping is all the coordinator does here. It keeps:
//! 1.  A [`Decomposition`](crate::decomposition::Decomposition): which worker holds which block.
//! 2.  A [`RemoteHandle`]: the name every worker uses for its block.
//!
//! Indexing a [`DistributedArray`] projects the request onto each block and sends each involved
//! worker a small command. Data only moves when a result has to come back.
//!
//! ## 🧩 Array Kinds
//!
//! *   [`DistributedArray`]: Split into blocks along one or more axes. Selections stay
//!     distributed while a split axis survives.
//! *   [`ClonedArray`]: A whole copy on every worker. Useful for per-worker accumulators that
//!     are merged at the end.
//!
//! ## 📦 Module Contents
//!
//! *   [`RemoteContext`]: The interface to the workers. Swap it to change transport.
//! *   [`CpuCluster`]: One thread per worker, talking over `crossbeam` channels.
//! *   [`algorithm`]: `map`, `reduce` and `remote` over the workers of an array.
//! *   [`OpRegistry`]: Named operations workers can run on their local arrays.
//!
//! ## 🚀 Quick Start
//!
//! ```rust
//! use distarray::distributed::{algorithm, CpuCluster, DistributedArray, Params};
//! use distarray::{ClusterConfig, ReduceOp};
//!
//! let cluster = CpuCluster::<f64>::new(ClusterConfig::new(4)).unwrap();
//! let a = DistributedArray::ones(&cluster, &[8, 8], &[0, 1], &[0, 1, 2, 3]).unwrap();
//! let b = algorithm::map("scale", &[&a], &Params::new().with("factor", 0.5))
//!     .unwrap()
//!     .unwrap();
//!
//! assert_eq!(algorithm::reduce(&b, ReduceOp::Sum, None).unwrap(), 32.0);
//! ```

pub mod algorithm;
pub mod array;
pub mod backend;
pub mod cloned;
pub mod command;
pub mod cpu_backend;
pub mod handle;
pub mod registry;
pub mod targets;
pub mod worker;

pub use algorithm::Operand;
pub use array::{DistributedArray, Selection, Value};
pub use backend::RemoteContext;
pub use cloned::{ClonedArray, ClonedValue};
pub use command::{Assignment, Command, Fill, HandleId, Params, Reply, Request};
pub use cpu_backend::CpuCluster;
pub use handle::RemoteHandle;
pub use registry::OpRegistry;
pub use targets::TargetScope;
pub use worker::Worker;
