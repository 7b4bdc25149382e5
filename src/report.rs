//! Status Table
//!
//! Renders replacement tickets for `csdr replace-disk status`: one row per
//! ticket with the host, the new device, the chunkserver, the formatting
//! progress and the lifecycle state.

use crate::records::Replacement;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Device Path")]
    device: String,
    #[tabled(rename = "Service ID")]
    service_id: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&Replacement> for StatusRow {
    fn from(ticket: &Replacement) -> Self {
        Self {
            host: ticket.host.clone(),
            device: ticket.new_device.clone(),
            service_id: ticket.service_id.clone(),
            progress: format!("{}%", ticket.progress),
            status: ticket.status.to_string(),
        }
    }
}

/// Render tickets as an aligned text table
pub fn render_status(tickets: &[Replacement]) -> String {
    let mut table = Table::new(tickets.iter().map(StatusRow::from));
    table.with(Style::blank());
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DiskRecord, ReplacementStatus};

    fn words(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn test_render_status() {
        let old = DiskRecord::new("h1", "/dev/sdb", "/data/cs0", "img", 90);
        let mut ticket = Replacement::new("cs-1", old, "/dev/sdc");
        ticket.status = ReplacementStatus::Running;
        ticket.progress = 45;

        let table = render_status(&[ticket]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            words(lines[0]),
            vec!["Host", "Device", "Path", "Service", "ID", "Progress", "Status"]
        );
        assert_eq!(words(lines[1]), vec!["h1", "/dev/sdc", "cs-1", "45%", "running"]);

        // columns line up
        assert_eq!(lines[0].find("Device Path"), lines[1].find("/dev/sdc"));
        assert_eq!(lines[0].find("Status"), lines[1].find("running"));
    }

    #[test]
    fn test_render_empty() {
        let table = render_status(&[]);
        assert_eq!(table.lines().count(), 1);
        assert!(table.contains("Service ID"));
    }
}
