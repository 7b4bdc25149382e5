//! Block Device Queries
//!
//! Reads identity, size and filesystem type of a device with `lsblk`, and
//! performs the few mutations the workflow needs (UUID rewrite, unmount).

use super::shell_quote;
use crate::domain::ports::RemoteExecutor;
use crate::error::{Error, Result};
use tracing::{debug, info};

/// One device on one host
pub struct BlockDevice<'a> {
    executor: &'a dyn RemoteExecutor,
    host: &'a str,
    device: &'a str,
}

impl<'a> BlockDevice<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, host: &'a str, device: &'a str) -> Self {
        Self {
            executor,
            host,
            device,
        }
    }

    async fn lsblk(&self, column: &str, extra: &str) -> Result<String> {
        let command = format!(
            "lsblk --nodeps --noheadings {}-o {} {}",
            extra,
            column,
            shell_quote(self.device)
        );
        let output = self.executor.run(self.host, &command).await?;
        if !output.success() {
            return Err(Error::ListBlockDevice(format!(
                "{}:{}: {}",
                self.host,
                self.device,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Filesystem UUID, `None` when the device has no filesystem
    pub async fn uuid(&self) -> Result<Option<String>> {
        let uuid = self.lsblk("UUID", "").await?;
        Ok((!uuid.is_empty()).then_some(uuid))
    }

    /// Size in bytes
    pub async fn size(&self) -> Result<u64> {
        let raw = self.lsblk("SIZE", "--bytes ").await?;
        raw.parse::<u64>().map_err(|_| {
            Error::ListBlockDevice(format!(
                "{}:{}: unexpected size '{}'",
                self.host, self.device, raw
            ))
        })
    }

    /// Filesystem type, `None` when the device is empty
    pub async fn fs_type(&self) -> Result<Option<String>> {
        let fs_type = self.lsblk("FSTYPE", "").await?;
        Ok((!fs_type.is_empty()).then_some(fs_type))
    }

    /// Give the filesystem a fresh random UUID
    pub async fn randomize_uuid(&self, tool: &str) -> Result<()> {
        let command = format!("{} -U random {}", tool, shell_quote(self.device));
        self.executor
            .run(self.host, &command)
            .await?
            .into_stdout(self.host, &command)?;
        info!("Randomized filesystem UUID of {}:{}", self.host, self.device);
        Ok(())
    }
}

/// Unmount `mount_point` on `host`; an already unmounted path is not an error
pub async fn unmount(executor: &dyn RemoteExecutor, host: &str, mount_point: &str) -> Result<()> {
    let command = format!("umount {}", shell_quote(mount_point));
    let output = executor.run(host, &command).await?;
    if output.success() {
        debug!("Unmounted {}:{}", host, mount_point);
        return Ok(());
    }

    let stderr = output.stderr.to_lowercase();
    if stderr.contains("not mounted") || stderr.contains("no mount point") || stderr.contains("not found") {
        debug!("{}:{} was not mounted", host, mount_point);
        return Ok(());
    }
    output.into_stdout(host, &command).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ExecOutput;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replies by the first matching command prefix
    struct Scripted {
        replies: Vec<(&'static str, ExecOutput)>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<(&'static str, ExecOutput)>) -> Self {
            Self {
                replies,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for Scripted {
        async fn run(&self, _host: &str, command: &str) -> Result<ExecOutput> {
            self.seen.lock().push(command.to_string());
            Ok(self
                .replies
                .iter()
                .find(|(prefix, _)| command.contains(prefix))
                .map(|(_, out)| out.clone())
                .unwrap_or_else(|| ExecOutput::failed(127, "unexpected command")))
        }
    }

    #[tokio::test]
    async fn test_queries() {
        let exec = Scripted::new(vec![
            ("-o UUID", ExecOutput::ok("1b9e-77\n")),
            ("-o SIZE", ExecOutput::ok("1000000000000\n")),
            ("-o FSTYPE", ExecOutput::ok("\n")),
        ]);
        let dev = BlockDevice::new(&exec, "h1", "/dev/sdc");

        assert_eq!(dev.uuid().await.unwrap().as_deref(), Some("1b9e-77"));
        assert_eq!(dev.size().await.unwrap(), 1_000_000_000_000);
        assert_eq!(dev.fs_type().await.unwrap(), None);
        assert!(exec
            .seen
            .lock()
            .contains(&"lsblk --nodeps --noheadings --bytes -o SIZE /dev/sdc".to_string()));
    }

    #[tokio::test]
    async fn test_lsblk_failure() {
        let exec = Scripted::new(vec![(
            "lsblk",
            ExecOutput::failed(32, "lsblk: /dev/sdz: not a block device"),
        )]);
        let dev = BlockDevice::new(&exec, "h1", "/dev/sdz");
        assert_matches!(dev.size().await, Err(Error::ListBlockDevice(msg)) if msg.contains("/dev/sdz"));
    }

    #[tokio::test]
    async fn test_unmount_tolerates_not_mounted() {
        let exec = Scripted::new(vec![(
            "umount",
            ExecOutput::failed(32, "umount: /data/cs0: not mounted."),
        )]);
        assert!(unmount(&exec, "h1", "/data/cs0").await.is_ok());

        let busy = Scripted::new(vec![("umount", ExecOutput::failed(32, "target is busy"))]);
        assert_matches!(
            unmount(&busy, "h1", "/data/cs0").await,
            Err(Error::RemoteCommand { exit_code: 32, .. })
        );
    }
}
