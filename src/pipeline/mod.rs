//! Pipeline stages around the cache.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ fingerprint ──▶ parse ──▶ extract ──▶ postprocess
//! (path/URL)  (SHA-256)    (remote)   (remote)    (tag strip)
//!                  │           ▲          ▲
//!                  └─ cache ───┴──────────┘
//! ```
//!
//! 1. [`input`] reads a local file or downloads a URL into memory
//! 2. [`remote`] drives the ADE parse and extract calls with timeout and
//!    retry; the only stage with network I/O to the service
//! 3. [`inflight`] serialises work on the same fingerprint
//! 4. [`postprocess`] strips inline anchors from Markdown on the way out
//!
//! Orchestration lives in [`crate::process`].

pub mod inflight;
pub mod input;
pub mod postprocess;
pub mod remote;
