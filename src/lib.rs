// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod follower;
pub mod framing;
pub mod router;
pub mod sinks;
