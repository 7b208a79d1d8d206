//! Stateright model checking for the upload protocol
//!
//! Exhaustive state-space exploration complements the DST harness in
//! [`crate::uploader::dst`]: DST runs the real code under random faults,
//! the model explores every interleaving of a small abstraction.
//!
//! ```text
//!     ┌──────────────────────────────────────┐
//!     │   Stateright  │   DST Tests  │ Unit  │
//!     │  (Exhaustive) │ (Simulation) │       │
//!     └──────────────────────────────────────┘
//! ```
//!
//! ## Running Model Checks
//!
//! ```bash
//! # Marked #[ignore] for CI speed
//! cargo test stateright_upload_protocol -- --ignored --nocapture
//! ```

pub mod upload_protocol;

pub use upload_protocol::{UploadProtocolConfig, UploadProtocolModel};
