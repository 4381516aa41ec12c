// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Period between two provider poll cycles
    pub poll_period: Duration,
    /// Period between two link service sync passes
    pub link_sync_period: Duration,
    /// Requeue interval of a reconciled VirtualMachine
    pub resync_period: Duration,
    /// Deadline of a single provider request
    pub provider_timeout: Duration,
    /// Orchestration timeout handed to the provider with every create/update
    pub stack_timeout_mins: u32,
    /// CNI network whose addresses are used as load balancer members for pod links
    pub secondary_network: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(120),
            link_sync_period: Duration::from_secs(60),
            resync_period: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(30),
            stack_timeout_mins: 60,
            secondary_network: "kuryr".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let poll_period = secs_var("PROVIDER_POLL_SECS", defaults.poll_period)?;
        let link_sync_period = secs_var("LINK_SYNC_SECS", defaults.link_sync_period)?;
        let resync_period = secs_var("RESYNC_SECS", defaults.resync_period)?;
        let provider_timeout = secs_var("PROVIDER_TIMEOUT_SECS", defaults.provider_timeout)?;
        let stack_timeout_mins = match env::var("STACK_TIMEOUT_MINS") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("STACK_TIMEOUT_MINS is not a number: {}", v))?,
            Err(_) => defaults.stack_timeout_mins,
        };
        let secondary_network =
            env::var("SECONDARY_NETWORK").unwrap_or(defaults.secondary_network);

        Ok(Config {
            poll_period,
            link_sync_period,
            resync_period,
            provider_timeout,
            stack_timeout_mins,
            secondary_network,
        })
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(v) => {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("{} is not a number of seconds: {}", name, v))?;
            anyhow::ensure!(secs > 0, "{} must be greater than zero", name);
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
