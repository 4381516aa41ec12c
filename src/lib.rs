// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod kubernetes;
pub mod orchestrator;
pub mod processors;
pub mod provider;
pub mod reconcilers;
pub mod render;
pub mod stack;
pub mod sync;
pub mod types;

#[cfg(test)]
pub mod test_utils;
