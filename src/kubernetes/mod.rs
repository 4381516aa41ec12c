// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, link resolution and Service publication.

pub mod crd;
pub mod link;

pub use crd::wait_for_crd;
pub use link::{KubeLinkDiscovery, Link, LinkDiscovery, LinkKind};
