// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The core of a code-signing subsystem for Mach-O executables and
//! application bundles.
//!
//! This crate produces, embeds, and verifies cryptographic signatures that
//! bind an executable's on-disk identity (page hashes, bundled resources,
//! metadata) to a signer's certificate chain, and evaluates declarative
//! trust policies ("code requirements") against a signature and certificate
//! chain.
//!
//! # Components
//!
//! * [embedded_signature] and [embedded_signature_builder] define and build
//!   the `Blob`/`SuperBlob` binary container format that aggregates all
//!   other signing data.
//! * [code_directory] is the canonical, versioned manifest of page hashes
//!   and metadata that is the atomic unit of sealing. See [CodeDirectoryBlob]
//!   and its [CodeDirectoryBuilder].
//! * [code_requirement] implements the requirement expression language: a
//!   parser from text to bytecode, a bytecode [code_requirement::CodeRequirementExpression]
//!   representation, an interpreter evaluating requirements against an
//!   [code_requirement::EvaluationContext], and a decompiler back to text.
//! * [code_resources] builds and verifies the resource-seal dictionary used
//!   to seal non-code bundle resources.
//! * [macho] parses universal (fat) and thin Mach-O files into per-architecture
//!   slices. [macho_signing] implements the allocate/finalize passes that
//!   rewrite a Mach-O file with room for a signature.
//! * [bundle_signing] implements the `Bundle` disk representation and the
//!   pipeline for signing an application bundle and its nested code.
//! * [disk_rep] classifies a path into one of the Mach-O, bundle, or
//!   extended-attribute-backed disk representations via the
//!   [disk_rep::DiskRep] enum, and exposes the signing range, page size, and
//!   recommended identifier queries common to all three.
//! * [signing_settings] and [signing] implement the `Signer` configuration
//!   and orchestration described in the specification.
//! * [reader] implements static verification: re-walking an already-signed
//!   Mach-O or bundle and validating it against its own embedded signature.
//! * [policy] synthesizes a designated requirement from a certificate chain
//!   when the caller doesn't supply one explicitly.
//! * [certificate] and [apple_certificates] model certificate chains and the
//!   well-known Apple certificate authorities used during requirement
//!   evaluation and designated-requirement synthesis.
//! * [entitlements] wraps the entitlements property list blob.
//!
//! Cryptographic Message Syntax (the signature format wrapping the
//! CodeDirectory digest) is treated as an opaque primitive provided by the
//! `cryptographic-message-syntax` crate; this crate does not reimplement
//! PKCS#7/CMS.
//!
//! # Getting Started
//!
//! [MachOSigner] signs a single Mach-O (or universal Mach-O) file.
//! [BundleSigner] signs an application bundle, including nested code.
//! [UnifiedSigner] wraps both behind a single entry point that picks the
//! right one for a given path.
//!
//! [StaticCode] re-derives the facts an embedded signature attests to from
//! the raw bytes and compares them against what [reader]'s [FileEntity] tree
//! reports, independent of host/kernel trust.

mod apple_certificates;
pub use apple_certificates::*;
mod bundle_signing;
pub use bundle_signing::*;
mod certificate;
pub use certificate::*;
mod code_directory;
pub use code_directory::*;
mod code_hash;
pub use code_hash::*;
pub mod code_requirement;
pub use code_requirement::*;
mod code_resources;
pub use code_resources::*;
mod cryptography;
pub use cryptography::*;
pub mod embedded_signature;
pub use embedded_signature::*;
pub mod embedded_signature_builder;
pub use embedded_signature_builder::*;
pub mod entitlements;
mod error;
pub use error::*;
mod macho;
pub use macho::*;
mod macho_signing;
pub use macho_signing::*;
mod policy;
pub use policy::*;
mod reader;
pub use reader::*;
mod signing_settings;
pub use signing_settings::*;
mod signing;
pub use signing::*;
pub mod specification;
mod static_code;
pub use static_code::*;
mod disk_rep;
pub use disk_rep::*;
