pub mod ledger;
pub mod restore;
pub mod run;
pub mod status;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            data: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

#[cfg(test)]
mod tests {
    use super::CommandReport;

    #[test]
    fn issues_flip_ok_and_merge_carries_them() {
        let mut outer = CommandReport::new("run");
        outer.detail("company=acme");
        let mut inner = CommandReport::new("run");
        inner.issue("lease held");
        outer.merge(inner);
        assert!(!outer.ok);
        assert_eq!(outer.details, vec!["company=acme".to_string()]);
        assert_eq!(outer.issues, vec!["lease held".to_string()]);
    }
}
