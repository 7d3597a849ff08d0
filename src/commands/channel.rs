//! Channel membership tracking for the upstream session.
//!
//! Only our own JOIN/PART/KICK moves the buffer state; everyone else's
//! membership traffic relays through untouched.

use super::{Dispatch, HandlerResult, UpstreamCommand, UpstreamContext};
use async_trait::async_trait;
use slbnc_proto::Message;

fn is_own_nick(ctx: &UpstreamContext<'_>, nick: Option<&str>) -> bool {
    nick.is_some_and(|n| n.eq_ignore_ascii_case(&ctx.state.nick))
}

/// JOIN: mark the buffer joined when it is us joining.
pub struct JoinHandler;

#[async_trait]
impl UpstreamCommand for JoinHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        if is_own_nick(ctx, msg.source_nick())
            && let Some(channel) = msg.arg(0)
        {
            let channel = channel.to_string();
            ctx.state.get_or_add_buffer(&channel).joined = true;
            ctx.state.save().await?;
        }
        Ok(Dispatch::Relay)
    }
}

/// PART: mark the buffer unjoined when it is us leaving.
pub struct PartHandler;

#[async_trait]
impl UpstreamCommand for PartHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        if is_own_nick(ctx, msg.source_nick())
            && let Some(channel) = msg.arg(0)
            && let Some(buffer) = ctx.state.buffers.get_mut(channel)
        {
            buffer.joined = false;
            ctx.state.save().await?;
        }
        Ok(Dispatch::Relay)
    }
}

/// KICK: mark the buffer unjoined when we are the one kicked.
pub struct KickHandler;

#[async_trait]
impl UpstreamCommand for KickHandler {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult {
        if is_own_nick(ctx, msg.arg(1))
            && let Some(channel) = msg.arg(0)
            && let Some(buffer) = ctx.state.buffers.get_mut(channel)
        {
            buffer.joined = false;
            ctx.state.save().await?;
        }
        Ok(Dispatch::Relay)
    }
}
