use super::FlowConfig;

pub const RPS_VAR: &str = "FLOWLINK_THROTTLER_RPS";
pub const MSG_KEY_VAR: &str = "FLOWLINK_THROTTLER_MSG_KEY";
pub const REPORT_INTERVAL_VAR: &str = "FLOWLINK_REPORT_INTERVAL_SECONDS";

impl FlowConfig {
    /// Override file settings from env vars. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(RPS_VAR) {
            if let Ok(n) = v.parse::<u64>() {
                self.throttler.rps = n;
            }
        }
        if let Some(v) = lookup(MSG_KEY_VAR) {
            self.throttler.msg_key = Some(v);
        }
        if let Some(v) = lookup(REPORT_INTERVAL_VAR) {
            if let Ok(n) = v.parse::<u64>() {
                self.pipeline.report_interval_seconds = n;
            }
        }
    }
}
