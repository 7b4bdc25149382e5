//! Remote Host Adapters
//!
//! Concrete implementations of the execution, service and formatting ports,
//! all built on shell commands run over SSH.

pub mod block_device;
pub mod format;
pub mod service;
pub mod ssh;

pub use block_device::BlockDevice;
pub use format::RemoteFormatter;
pub use service::ContainerServiceController;
pub use ssh::SshExecutor;

/// Quote a value for a POSIX shell command line
pub(crate) fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/_.:-=@,+".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
