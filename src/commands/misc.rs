//! PING and NICK handlers.

use super::{Dispatch, HandlerResult, UpstreamCommand, UpstreamContext};
use async_trait::async_trait;
use slbnc_proto::Message;

/// Server keepalive. Answered here; clients never see upstream PINGs.
pub struct PingHandler;

#[async_trait]
impl UpstreamCommand for PingHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        match msg.arg(0) {
            Some(token) => ctx.upstream.write_line(&["PONG", token]).await?,
            None => ctx.upstream.write_line(&["PONG"]).await?,
        }
        Ok(Dispatch::Suppress)
    }
}

/// NICK: track our own nick changes.
pub struct NickHandler;

#[async_trait]
impl UpstreamCommand for NickHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        let from_self = msg
            .source_nick()
            .is_some_and(|n| n.eq_ignore_ascii_case(&ctx.state.nick));

        if from_self && let Some(new_nick) = msg.arg(0) {
            ctx.state.nick = new_nick.to_string();
            ctx.state.save().await?;
        }
        Ok(Dispatch::Relay)
    }
}
