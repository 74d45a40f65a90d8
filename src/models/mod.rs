//! Model artifacts, inference backends and signature metadata

pub mod backend;
pub mod convert;
pub mod descriptions;
pub mod ensemble;
pub mod graph;
pub mod onnx;
pub mod signature;

pub use backend::{Backend, BackendKind};
pub use convert::convert;
pub use descriptions::FieldDescriptions;
pub use ensemble::ObliviousForest;
pub use graph::{GraphLoader, GraphSession};
pub use signature::SignatureResolver;
