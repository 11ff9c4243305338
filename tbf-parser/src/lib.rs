// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Parsing, mutation and re-emission of Tock Binary Format (TBF) objects.
//!
//! The entry points mirror how apps are discovered on a board: first the
//! 8-byte length preamble ([`parse::parse_tbf_header_lengths`]), then the
//! full header ([`parse::parse_tbf_header`]) and, for `Program` apps, the
//! credentials footer ([`parse::parse_tbf_footer`]). Parsed headers are
//! owned values and can be edited and serialized back with
//! [`types::TbfHeader::generate`].

pub mod parse;
pub mod types;
