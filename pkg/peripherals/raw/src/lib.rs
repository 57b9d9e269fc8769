//! Minimal stand-in for the embedded-target register/interrupt bindings the
//! real crate generates from SVD files. Nothing in this workspace's Linux
//! build calls into it directly; it exists only so `sys`/`executor`'s path
//! dependency resolves (see DESIGN.md).
#![cfg_attr(not(feature = "std"), no_std)]
