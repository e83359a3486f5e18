// SPDX-License-Identifier: Apache-2.0
pub mod memory;
pub mod shell;

pub use memory::{MemoryGetTool, MemorySearchTool, MemoryWriteTool};
pub use shell::{ShellJobTool, ShellMode, ShellTool};
