// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod fleet_parser;
pub mod in_memory;

pub use config::ClientConfig;
pub use fleet_parser::FleetParser;
pub use in_memory::InMemoryRemoteClient;
