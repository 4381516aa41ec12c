// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource and status types.

pub mod status;
pub mod virtual_machine;

pub use status::{Condition, EndpointStatus, ResourceStatus, ServerStat, StackPhase};
pub use virtual_machine::{VirtualMachine, VirtualMachineSpec, VirtualMachineStatus};
