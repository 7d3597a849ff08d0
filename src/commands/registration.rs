//! Handlers for the upstream registration burst.
//!
//! The numerics a server sends between connect and end-of-MOTD are buffered
//! into `registration_lines` so they can be replayed to clients that attach
//! later.

use super::{Dispatch, HandlerResult, UpstreamCommand, UpstreamContext};
use async_trait::async_trait;
use slbnc_proto::Message;
use tracing::debug;

/// RPL_WELCOME: the network accepted our registration.
pub struct WelcomeHandler;

#[async_trait]
impl UpstreamCommand for WelcomeHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        ctx.state.net_registered = true;

        // The server tells us our nick in the first parameter; it may have
        // been truncated or renamed during registration.
        if let Some(nick) = msg.arg(0) {
            ctx.state.nick = nick.to_string();
        }

        ctx.state.registration_lines.push(msg.clone());
        ctx.state.save().await?;

        debug!(id = %ctx.state.con_id(), nick = %ctx.state.nick, "Upstream registration complete");

        // Get back into the channels we were in before the connection died
        let rejoin: Vec<String> = ctx
            .state
            .buffers
            .values()
            .filter(|buffer| buffer.joined)
            .map(|buffer| buffer.name.clone())
            .collect();
        for channel in rejoin {
            ctx.upstream.write_line(&["JOIN", &channel]).await?;
        }

        Ok(Dispatch::Relay)
    }
}

/// Buffers a registration numeric for replay to attaching clients.
pub struct RegistrationLineHandler;

#[async_trait]
impl UpstreamCommand for RegistrationLineHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        ctx.state.registration_lines.push(msg.clone());
        Ok(Dispatch::Relay)
    }
}

/// RPL_ISUPPORT: collect the server's capability tokens.
pub struct IsupportHandler;

#[async_trait]
impl UpstreamCommand for IsupportHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        // params: <nick> <token>... :are supported by this server
        if msg.params.len() > 2 {
            let tokens = &msg.params[1..msg.params.len() - 1];
            ctx.state
                .isupports
                .extend(tokens.iter().cloned());
        }

        ctx.state.registration_lines.push(msg.clone());
        ctx.state.save().await?;
        Ok(Dispatch::Relay)
    }
}

/// RPL_ENDOFMOTD / ERR_NOMOTD: registration traffic is over.
pub struct MotdEndHandler;

#[async_trait]
impl UpstreamCommand for MotdEndHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, _msg: &Message) -> HandlerResult {
        ctx.state.received_motd = true;
        ctx.state.save().await?;
        Ok(Dispatch::Relay)
    }
}
