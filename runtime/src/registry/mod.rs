//! Ephemeral single-image registry.
//!
//! An import cycle synthesizes a manifest for one image, serves it from a
//! short-lived child process on a loopback port, and lets the engine pull
//! it as if from a real registry.
//!
//! ```text
//!  loader ──spawn──▶ layerload-registry ──bind 127.0.0.1:0──┐
//!    ▲                     │                                 │
//!    └── poll output file ◀┘ "127.0.0.1:<port>/<repo>@<dig>" │
//!  engine pull ─────────────── GET /v2/<repo>/... ───────────┘
//! ```

pub mod manifest;
pub mod process;
pub mod server;

pub use manifest::{Descriptor, ImageManifest, ServedImage};
pub use process::{EphemeralRegistry, RegistryCommand};
pub use server::{announce, RegistryServer};
