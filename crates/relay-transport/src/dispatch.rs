//! Maps client messages onto registry operations.

use relay_session::SessionRegistry;

use crate::protocol::{ClientMessage, Route, ServerMessage, route_text};

/// Execute one client message and build the reply.
pub async fn dispatch(registry: &SessionRegistry, msg: ClientMessage, max_output_chars: usize) -> ServerMessage {
    match msg {
        ClientMessage::Ping => ServerMessage::Pong,
        ClientMessage::Command {
            conversation_id,
            text,
            mode,
        } => match route_text(&text, mode) {
            Route::Reject(message) => ServerMessage::Error {
                conversation_id: Some(conversation_id),
                message,
            },
            Route::Run { mode, text } => {
                let result = match mode {
                    Some(mode) => registry.handle(&conversation_id, mode, &text).await,
                    None => registry.handle_default(&conversation_id, &text).await,
                };
                ServerMessage::result(conversation_id, result, max_output_chars)
            }
        },
        ClientMessage::Bind { conversation_id, target } => {
            registry.bind(&conversation_id, target.clone()).await;
            ServerMessage::Binding {
                conversation_id,
                target: Some(target),
            }
        }
        ClientMessage::Unbind { conversation_id } => {
            registry.unbind(&conversation_id).await;
            ServerMessage::Binding {
                conversation_id,
                target: None,
            }
        }
        ClientMessage::SetMode { conversation_id, mode } => {
            registry.set_mode(&conversation_id, mode).await;
            ServerMessage::ModeChanged { conversation_id, mode }
        }
        ClientMessage::Reset { conversation_id } => {
            registry.reset(&conversation_id).await;
            ServerMessage::Ack {
                conversation_id,
                message: "Session reset.".into(),
            }
        }
        ClientMessage::Env { conversation_id } => {
            let vars = registry.env(&conversation_id).await.into_iter().collect();
            ServerMessage::Env { conversation_id, vars }
        }
        ClientMessage::Cwd { conversation_id } => {
            let cwd = registry.cwd(&conversation_id).await.display().to_string();
            ServerMessage::Cwd { conversation_id, cwd }
        }
        ClientMessage::Remove { conversation_id } => {
            let message = if registry.remove(&conversation_id).await {
                "Conversation removed."
            } else {
                "No such conversation."
            };
            ServerMessage::Ack {
                conversation_id,
                message: message.into(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use relay_core::{
        BridgeConfig, EnvStore, Mode, PaneDriver, RelayError, ShellConfig, TerminalTarget, WorkspaceContext,
    };
    use relay_terminal::TerminalBridge;

    use super::*;

    struct NoPane;

    #[async_trait]
    impl PaneDriver for NoPane {
        async fn send_text(&self, target: &TerminalTarget, _text: &str) -> Result<(), RelayError> {
            Err(RelayError::TargetNotFound {
                target: target.to_string(),
            })
        }

        async fn send_key(&self, target: &TerminalTarget, _key: &str) -> Result<(), RelayError> {
            Err(RelayError::TargetNotFound {
                target: target.to_string(),
            })
        }

        async fn capture(&self, target: &TerminalTarget, _lines: usize) -> Result<String, RelayError> {
            Err(RelayError::TargetNotFound {
                target: target.to_string(),
            })
        }
    }

    fn registry(root: PathBuf) -> SessionRegistry {
        let env: EnvStore = [("PATH", "/usr/bin:/bin"), ("GITHUB_TOKEN", "ghp_secret")]
            .into_iter()
            .collect();
        let shell = ShellConfig {
            command_timeout: Duration::from_secs(10),
            max_output_chars: 1000,
            shell: Some(PathBuf::from("/bin/sh")),
        };
        let bridge = TerminalBridge::new(Arc::new(NoPane), BridgeConfig::default());
        SessionRegistry::new(WorkspaceContext::with_env(root, env), shell, bridge)
    }

    #[tokio::test]
    async fn test_command_flow() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        let registry = registry(root.clone());

        let command = |text: &str| ClientMessage::Command {
            conversation_id: "c1".into(),
            text: text.into(),
            mode: None,
        };

        dispatch(&registry, command("cd sub"), 100).await;
        let reply = dispatch(&registry, command("```sh\npwd\n```"), 100).await;
        let ServerMessage::Result { chunks, result, .. } = reply else {
            panic!("Wrong message type");
        };
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(chunks.concat().trim(), root.join("sub").display().to_string());

        let reply = dispatch(&registry, ClientMessage::Cwd { conversation_id: "c1".into() }, 100).await;
        assert_eq!(
            reply,
            ServerMessage::Cwd {
                conversation_id: "c1".into(),
                cwd: root.join("sub").display().to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_env_listing_is_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path().to_path_buf());
        let ServerMessage::Env { vars, .. } =
            dispatch(&registry, ClientMessage::Env { conversation_id: "c1".into() }, 100).await
        else {
            panic!("Wrong message type");
        };
        assert_eq!(vars.keys().collect::<Vec<_>>(), vec!["GITHUB_TOKEN", "PATH"]);
        assert_eq!(vars["GITHUB_TOKEN"], "***");
    }

    #[tokio::test]
    async fn test_term_errors_are_results() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path().to_path_buf());

        let bind = ClientMessage::Bind {
            conversation_id: "c1".into(),
            target: TerminalTarget::session("gone"),
        };
        assert!(matches!(dispatch(&registry, bind, 100).await, ServerMessage::Binding { target: Some(_), .. }));

        let reply = dispatch(
            &registry,
            ClientMessage::SetMode {
                conversation_id: "c1".into(),
                mode: Mode::Term,
            },
            100,
        )
        .await;
        assert!(matches!(reply, ServerMessage::ModeChanged { mode: Mode::Term, .. }));

        let reply = dispatch(
            &registry,
            ClientMessage::Command {
                conversation_id: "c1".into(),
                text: "ls".into(),
                mode: None,
            },
            100,
        )
        .await;
        let ServerMessage::Result { result, chunks, .. } = reply else {
            panic!("Wrong message type");
        };
        assert_eq!(result.error, Some(relay_core::ErrorKind::TargetNotFound));
        assert!(chunks[0].contains("gone:0.0"));
    }

    #[tokio::test]
    async fn test_reject_and_ping() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path().to_path_buf());
        assert_eq!(dispatch(&registry, ClientMessage::Ping, 100).await, ServerMessage::Pong);
        let reply = dispatch(
            &registry,
            ClientMessage::Command {
                conversation_id: "c1".into(),
                text: "   ".into(),
                mode: Some(Mode::Shell),
            },
            100,
        )
        .await;
        assert!(matches!(reply, ServerMessage::Error { conversation_id: Some(_), .. }));
    }
}
