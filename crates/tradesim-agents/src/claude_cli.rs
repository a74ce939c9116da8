use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;

/// How to reach the `claude` CLI for one trading session.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    /// Executable name or path.
    pub program: String,
    pub model: String,
    /// Upper bound on the whole session, process startup included.
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// The model's answer plus session metadata from the CLI's JSON envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct CliReply {
    pub text: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub num_turns: Option<u32>,
}

#[derive(Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    num_turns: Option<u32>,
}

/// Interpret CLI stdout. A JSON result envelope is unwrapped; anything else is taken as
/// the plain-text answer.
pub fn parse_reply(stdout: &str) -> Result<CliReply, AgentError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(AgentError::Cli("Claude returned empty response".to_string()));
    }

    let Ok(envelope) = serde_json::from_str::<ResultEnvelope>(trimmed) else {
        return Ok(CliReply {
            text: trimmed.to_string(),
            session_id: None,
            cost_usd: None,
            num_turns: None,
        });
    };
    let text = envelope.result.unwrap_or_default();
    if envelope.is_error {
        return Err(AgentError::Cli(format!("Claude session failed: {text}")));
    }
    if text.trim().is_empty() {
        return Err(AgentError::Cli("Claude returned empty result".to_string()));
    }
    Ok(CliReply {
        text,
        session_id: envelope.session_id,
        cost_usd: envelope.total_cost_usd,
        num_turns: envelope.num_turns,
    })
}

/// Run one print-mode session and return the parsed reply.
///
/// The child is killed if the timeout fires.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<CliReply, AgentError> {
    debug!(program = %config.program, model = %config.model, "Invoking claude CLI");

    let output = tokio::time::timeout(config.timeout, async {
        Command::new(&config.program)
            .args([
                "-p",
                user_prompt,
                "--system-prompt",
                system_prompt,
                "--model",
                &config.model,
                "--output-format",
                "json",
            ])
            .kill_on_drop(true)
            .output()
            .await
    })
    .await
    .map_err(|_| AgentError::Timeout(config.timeout.as_secs()))?
    .map_err(|e| AgentError::Cli(format!("Failed to spawn {}: {e}", config.program)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(status = %output.status, stderr = %stderr, "Claude CLI failed");
        return Err(AgentError::Cli(format!(
            "{} exited {}: {}",
            config.program,
            output.status,
            stderr.trim()
        )));
    }

    let reply = parse_reply(&String::from_utf8_lossy(&output.stdout))?;
    debug!(
        session_id = reply.session_id.as_deref().unwrap_or("-"),
        cost_usd = reply.cost_usd.unwrap_or_default(),
        turns = reply.num_turns.unwrap_or_default(),
        "Claude session finished"
    );
    Ok(reply)
}

/// Whether `program --version` runs successfully.
pub async fn check_cli_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_unwrapped() {
        let stdout = r#"{"type":"result","subtype":"success","is_error":false,
            "result":"{\"actions\":[]}","session_id":"abc","total_cost_usd":0.012,"num_turns":1}"#;
        let reply = parse_reply(stdout).unwrap();
        assert_eq!(reply.text, r#"{"actions":[]}"#);
        assert_eq!(reply.session_id.as_deref(), Some("abc"));
        assert_eq!(reply.num_turns, Some(1));
    }

    #[test]
    fn error_envelope_is_a_cli_error() {
        let stdout = r#"{"type":"result","is_error":true,"result":"credit balance too low"}"#;
        let err = parse_reply(stdout).unwrap_err();
        assert!(matches!(err, AgentError::Cli(msg) if msg.contains("credit balance")));
    }

    #[test]
    fn plain_text_passes_through() {
        let reply = parse_reply("Holding today.\n```json\n{\"actions\":[]}\n```\n").unwrap();
        assert!(reply.text.starts_with("Holding today."));
        assert!(reply.session_id.is_none());
    }

    #[test]
    fn blank_output_is_rejected() {
        assert!(matches!(parse_reply("  \n"), Err(AgentError::Cli(_))));
        assert!(matches!(
            parse_reply(r#"{"is_error":false,"result":""}"#),
            Err(AgentError::Cli(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let config = ClaudeCliConfig {
            program: "tradesim-no-such-claude".to_string(),
            ..ClaudeCliConfig::default()
        };
        let err = invoke_claude("sys", "user", &config).await.unwrap_err();
        assert!(matches!(err, AgentError::Cli(msg) if msg.starts_with("Failed to spawn")));
        assert!(!check_cli_available("tradesim-no-such-claude").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_cli_error() {
        let config = ClaudeCliConfig {
            program: "false".to_string(),
            ..ClaudeCliConfig::default()
        };
        let err = invoke_claude("sys", "user", &config).await.unwrap_err();
        assert!(matches!(err, AgentError::Cli(msg) if msg.starts_with("false exited")));
    }
}
