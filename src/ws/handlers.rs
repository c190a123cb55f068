//! WebSocket message dispatch.
//!
//! Client payloads are parsed into `ClientMessage` before they get here, so
//! round-state code only ever sees typed input. Host authorization is checked
//! at this boundary; unauthorized host commands are dropped without a reply
//! so probing connections learn nothing about which commands exist.

use super::ConnCtx;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::RejoinError;
use crate::state::AppState;
use std::time::Instant;

/// Drop a host-only command from a connection that never authenticated
macro_rules! require_host {
    ($ctx:expr, $action:expr) => {
        if !$ctx.is_host {
            tracing::warn!(
                "Unauthorized {} attempt from connection {}",
                $action,
                $ctx.connection_id
            );
            return None;
        }
    };
}

/// Handle one client message, returning an optional direct reply.
/// State changes reach everyone else through the broadcast channel.
pub async fn handle_message(
    msg: ClientMessage,
    ctx: &mut ConnCtx,
    state: &AppState,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::JoinGame { name, ad_content } => {
            if ctx.joined {
                tracing::debug!("Duplicate join from connection {}", ctx.connection_id);
                return None;
            }
            match state.join_game(&ctx.connection_id, name, ad_content).await {
                Ok((token, player)) => {
                    ctx.joined = true;
                    Some(ServerMessage::Joined { token, player })
                }
                Err(msg) => Some(ServerMessage::Error {
                    code: "GAME_FULL".to_string(),
                    msg,
                }),
            }
        }

        ClientMessage::RejoinGame { token } => {
            if ctx.joined {
                return Some(ServerMessage::Error {
                    code: "REJOIN_FAILED".to_string(),
                    msg: "This connection already has a player".to_string(),
                });
            }
            match state.rejoin_game(&ctx.connection_id, &token).await {
                Ok(player) => {
                    ctx.joined = true;
                    Some(ServerMessage::Rejoined { player })
                }
                Err(e) => Some(ServerMessage::Error {
                    code: rejoin_code(&e).to_string(),
                    msg: e.to_string(),
                }),
            }
        }

        ClientMessage::Click => {
            // Clicks outside a clickable phase are dropped silently; a
            // counted click reaches the client through the state push
            state.handle_click(&ctx.connection_id, Instant::now()).await;
            None
        }

        ClientMessage::StartAuction {
            duration,
            countdown,
        } => {
            require_host!(ctx, "auction start");
            state.start_auction(duration, countdown).await;
            None
        }

        ClientMessage::ResetAuction => {
            require_host!(ctx, "auction reset");
            state.reset_auction().await;
            None
        }

        ClientMessage::ResetAllTimeStats => {
            require_host!(ctx, "stats reset");
            state.reset_all_time_stats().await;
            None
        }

        ClientMessage::AuthenticateHost { token } => {
            if state.host_tokens.verify(&token).await {
                ctx.is_host = true;
                tracing::info!("Connection {} authenticated as host", ctx.connection_id);
                Some(ServerMessage::HostAuthenticated)
            } else {
                Some(ServerMessage::Error {
                    code: "AUTH_FAILED".to_string(),
                    msg: "Invalid or expired host token".to_string(),
                })
            }
        }
    }
}

fn rejoin_code(e: &RejoinError) -> &'static str {
    match e {
        RejoinError::InvalidToken => "INVALID_TOKEN",
        RejoinError::Expired => "SESSION_EXPIRED",
        RejoinError::InUse => "SESSION_IN_USE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;

    fn ctx(id: &str) -> ConnCtx {
        ConnCtx {
            connection_id: id.to_string(),
            is_host: false,
            joined: false,
        }
    }

    #[tokio::test]
    async fn test_join_replies_with_token_and_player() {
        let state = AppState::default();
        let mut ctx = ctx("conn-1");

        let reply = handle_message(
            ClientMessage::JoinGame {
                name: Some("alice".to_string()),
                ad_content: None,
            },
            &mut ctx,
            &state,
        )
        .await;

        match reply {
            Some(ServerMessage::Joined { token, player }) => {
                assert_eq!(token.len(), 32);
                assert_eq!(player.name, "alice");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(ctx.joined);
    }

    #[tokio::test]
    async fn test_duplicate_join_is_dropped() {
        let state = AppState::default();
        let mut ctx = ctx("conn-1");

        let join = ClientMessage::JoinGame {
            name: Some("alice".to_string()),
            ad_content: None,
        };
        assert!(handle_message(join.clone(), &mut ctx, &state).await.is_some());
        assert!(handle_message(join, &mut ctx, &state).await.is_none());
        assert_eq!(state.game.read().await.players.len(), 1);
    }

    #[tokio::test]
    async fn test_join_when_full_replies_game_full() {
        let mut config = crate::types::GameConfig::default();
        config.max_players = 1;
        let state = AppState::with_config(config);

        let mut first = ctx("conn-1");
        handle_message(
            ClientMessage::JoinGame {
                name: None,
                ad_content: None,
            },
            &mut first,
            &state,
        )
        .await;

        let mut second = ctx("conn-2");
        let reply = handle_message(
            ClientMessage::JoinGame {
                name: None,
                ad_content: None,
            },
            &mut second,
            &state,
        )
        .await;

        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "GAME_FULL"),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(!second.joined);
    }

    #[tokio::test]
    async fn test_rejoin_error_codes() {
        let state = AppState::default();
        let mut ctx = ctx("conn-1");

        let reply = handle_message(
            ClientMessage::RejoinGame {
                token: "not-hex".to_string(),
            },
            &mut ctx,
            &state,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "INVALID_TOKEN"),
            other => panic!("unexpected reply: {other:?}"),
        }

        let reply = handle_message(
            ClientMessage::RejoinGame {
                token: "f".repeat(32),
            },
            &mut ctx,
            &state,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "SESSION_EXPIRED"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_host_commands_require_authentication() {
        let state = AppState::default();
        let mut ctx = ctx("conn-1");

        let reply = handle_message(
            ClientMessage::StartAuction {
                duration: Some(30),
                countdown: Some(3),
            },
            &mut ctx,
            &state,
        )
        .await;

        // Silent no-op: no reply, no phase change
        assert!(reply.is_none());
        assert_eq!(state.game.read().await.phase, Phase::Waiting);
    }

    #[tokio::test]
    async fn test_authenticate_host_with_issued_token() {
        let state = AppState::default();
        let mut ctx = ctx("conn-1");

        let (token, _expires) = state.host_tokens.issue().await;
        let reply = handle_message(
            ClientMessage::AuthenticateHost { token },
            &mut ctx,
            &state,
        )
        .await;

        assert!(matches!(reply, Some(ServerMessage::HostAuthenticated)));
        assert!(ctx.is_host);

        // Now the start goes through
        handle_message(
            ClientMessage::StartAuction {
                duration: None,
                countdown: None,
            },
            &mut ctx,
            &state,
        )
        .await;
        let game = state.game.read().await;
        assert_eq!(game.phase, Phase::AuctionCountdown);
        assert_eq!(game.round, 1);
    }

    #[tokio::test]
    async fn test_authenticate_host_with_bogus_token() {
        let state = AppState::default();
        let mut ctx = ctx("conn-1");

        let reply = handle_message(
            ClientMessage::AuthenticateHost {
                token: "made-up".to_string(),
            },
            &mut ctx,
            &state,
        )
        .await;

        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "AUTH_FAILED"),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(!ctx.is_host);
    }

    #[tokio::test]
    async fn test_stats_reset_is_host_gated() {
        let state = AppState::default();
        {
            let mut all_time = state.all_time.write().await;
            all_time.total_rounds = 5;
        }

        let mut ctx = ctx("conn-1");
        handle_message(ClientMessage::ResetAllTimeStats, &mut ctx, &state).await;
        assert_eq!(state.all_time.read().await.total_rounds, 5);

        ctx.is_host = true;
        handle_message(ClientMessage::ResetAllTimeStats, &mut ctx, &state).await;
        assert_eq!(state.all_time.read().await.total_rounds, 0);
    }
}
