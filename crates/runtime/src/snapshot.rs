//! Point-in-time view of a scheduler
//!
//! [`SchedulerSnapshot`] is what the SIGQUIT dump prints and what tests and
//! host tooling inspect. The output format follows `POSCTX_REPORT`:
//! - Unset or `1` → human-readable
//! - `json` → one line of JSON (needs the `report-json` feature)

use serde::Serialize;

/// Output format for rendered snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

impl ReportFormat {
    /// Parse from the POSCTX_REPORT environment variable
    pub fn from_env() -> Self {
        Self::parse(std::env::var("POSCTX_REPORT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("") | Some("1") | Some("human") => ReportFormat::Human,
            Some("json") => ReportFormat::Json,
            Some(other) => {
                tracing::warn!("POSCTX_REPORT='{other}' not recognized, using human format");
                ReportFormat::Human
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSnapshot {
    pub role: &'static str,
    pub status: &'static str,
    /// Times the role has been started
    pub generation: u64,
    pub send_depth: usize,
    pub recv_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub slot: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub roles: Vec<RoleSnapshot>,
    pub table_records: usize,
    pub pending_commands: usize,
    pub ready_responses: usize,
    pub subscriber_capacity: usize,
    /// Active subscriber slots only
    pub subscribers: Vec<SlotSnapshot>,
}

impl SchedulerSnapshot {
    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Human => self.to_human(),
            ReportFormat::Json => self.to_json(),
        }
    }

    pub fn to_human(&self) -> String {
        let mut out = String::new();
        out.push_str("[Roles]\n");
        for role in &self.roles {
            out.push_str(&format!(
                "  {:<14} {:<16} gen {:<4} send {:<5} recv {}\n",
                role.role, role.status, role.generation, role.send_depth, role.recv_depth
            ));
        }
        out.push_str("\n[Execution Table]\n");
        out.push_str(&format!("  Records:   {}\n", self.table_records));
        out.push_str(&format!("  Commands:  {} pending\n", self.pending_commands));
        out.push_str(&format!("  Responses: {} ready\n", self.ready_responses));
        out.push_str("\n[Pub/Sub]\n");
        out.push_str(&format!(
            "  Slots: {}/{} active\n",
            self.subscribers.len(),
            self.subscriber_capacity
        ));
        for slot in &self.subscribers {
            out.push_str(&format!("    [{:2}] {} queued\n", slot.slot, slot.depth));
        }
        out
    }

    #[cfg(feature = "report-json")]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    #[cfg(not(feature = "report-json"))]
    pub fn to_json(&self) -> String {
        tracing::warn!("POSCTX_REPORT=json requires the 'report-json' feature, using human format");
        self.to_human()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchedulerSnapshot {
        SchedulerSnapshot {
            roles: vec![RoleSnapshot {
                role: "communication",
                status: "alive",
                generation: 1,
                send_depth: 2,
                recv_depth: 0,
            }],
            table_records: 1,
            pending_commands: 1,
            ready_responses: 0,
            subscriber_capacity: 10,
            subscribers: vec![SlotSnapshot { slot: 3, depth: 4 }],
        }
    }

    #[test]
    fn test_report_format_parse() {
        assert_eq!(ReportFormat::parse(None), ReportFormat::Human);
        assert_eq!(ReportFormat::parse(Some("1")), ReportFormat::Human);
        assert_eq!(ReportFormat::parse(Some("json")), ReportFormat::Json);
        assert_eq!(ReportFormat::parse(Some("xml")), ReportFormat::Human);
    }

    #[test]
    fn test_human_format() {
        let text = sample().to_human();
        assert!(text.contains("communication"));
        assert!(text.contains("Commands:  1 pending"));
        assert!(text.contains("Slots: 1/10 active"));
        assert!(text.contains("[ 3] 4 queued"));
    }

    #[cfg(feature = "report-json")]
    #[test]
    fn test_json_format() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json()).unwrap();
        assert_eq!(json["roles"][0]["status"], "alive");
        assert_eq!(json["pending_commands"], 1);
        assert_eq!(json["subscribers"][0]["slot"], 3);
    }
}
