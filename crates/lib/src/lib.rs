//! frontbuild-lib: build container images from front-matter build files
//!
//! An input file carries a build matrix as YAML front matter followed by the
//! Dockerfile instructions. This crate turns that into an image:
//! - `matrix`: reading the input file into a `BuildSpec` and the build file
//! - `inputs`: concurrent shallow clones into in-memory repository stores
//! - `context`: the deterministic tar build context
//! - `daemon`: the build daemon interface and its Docker Engine client
//! - `build`: the orchestrator and the build/tag/cleanup protocol

pub mod build;
pub mod consts;
pub mod context;
pub mod daemon;
pub mod inputs;
pub mod matrix;
pub mod platform;
pub mod util;
