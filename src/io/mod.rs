//! I/O operations module
//!
//! Contains the per-job scratch file used by the disk workload and the
//! external command execution facility.

pub mod command;
pub mod disk;

pub use command::{find_program, run_command, terminate, CommandOutput};
pub use disk::{drop_page_cache, scratch_file_path, ScratchFile};
