use std::collections::HashMap;

use tracing::{info, warn};

use crate::traits::ActionSink;
use crate::types::ActionRequest;

/// Execute hook commands with environment variables.
/// Fire-and-forget: errors are logged, not propagated.
pub async fn run_hooks(commands: &[String], env_vars: &[(&str, &str)]) {
    for cmd in commands {
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", cmd]);
        for (key, val) in env_vars {
            command.env(key, val);
        }
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());
        match command.status().await {
            Ok(s) if !s.success() => warn!(hook = %cmd, code = s.code(), "Hook exited non-zero"),
            Err(e) => warn!(hook = %cmd, error = %e, "Hook failed to execute"),
            _ => {}
        }
    }
}

/// Action sink that logs every request and runs the shell hooks
/// configured for its action name on a detached task.
#[derive(Debug, Clone, Default)]
pub struct HookActionSink {
    hooks: HashMap<String, Vec<String>>,
}

impl HookActionSink {
    pub fn new(hooks: HashMap<String, Vec<String>>) -> Self {
        Self { hooks }
    }
}

impl ActionSink for HookActionSink {
    fn submit(&self, request: ActionRequest) {
        info!(
            trace_id = %request.trace_id,
            action = %request.action,
            "Action requested"
        );

        let Some(commands) = self.hooks.get(&request.action).cloned() else {
            return;
        };
        if commands.is_empty() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(action = %request.action, "No async runtime, action hooks skipped");
            return;
        };

        handle.spawn(async move {
            let payload = match &request.payload {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let trace_id = request.trace_id.to_string();
            run_hooks(
                &commands,
                &[
                    ("WEFT_ACTION", request.action.as_str()),
                    ("WEFT_TRACE_ID", trace_id.as_str()),
                    ("WEFT_PAYLOAD", payload.as_str()),
                ],
            )
            .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TraceId;

    #[tokio::test]
    async fn test_hook_receives_action_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let cmd = format!("printf '%s:%s' \"$WEFT_ACTION\" \"$WEFT_PAYLOAD\" > {}", out.display());

        run_hooks(
            &[cmd],
            &[("WEFT_ACTION", "send_sms_alert"), ("WEFT_PAYLOAD", "urgent")],
        )
        .await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "send_sms_alert:urgent");
    }

    #[test]
    fn test_submit_without_hooks_is_noop() {
        let sink = HookActionSink::default();
        sink.submit(ActionRequest::new(
            "page_oncall",
            serde_json::Value::Null,
            TraceId::new(),
        ));
    }
}
