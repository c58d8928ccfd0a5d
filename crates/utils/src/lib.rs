// SPDX-FileCopyrightText: 2026 Forwardcore Project
//
// SPDX-License-Identifier: Apache-2.0

//! Small, dependency-light helpers shared by every crate in the forwarding
//! core: RFC 5321 address parsing, opaque id generation, and the SRS-style
//! bounce-address codec used to rewrite envelope senders (spec §4.6, Step 2).

pub mod addr;
pub mod bounce;
pub mod ids;

pub use addr::{AddrError, EmailAddress};
pub use bounce::{BounceCodec, BounceTokenError};
pub use ids::new_id;
