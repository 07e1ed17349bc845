//! Subcommands of the `gigetool` binary.

pub mod cmd_forceip;
pub mod cmd_info;
pub mod cmd_list;
pub mod cmd_rescue;
pub mod cmd_set;
pub mod cmd_upload;
pub mod common;
