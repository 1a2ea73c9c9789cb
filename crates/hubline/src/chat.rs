//! The demo `Chat` hub.

use std::time::Duration;

use hubline_server::{Hub, HubBuilder, HubContext, HubError};
use serde_json::json;
use tracing::debug;

/// Largest `Counter` a client may ask for.
const MAX_COUNT: u32 = 10_000;

/// Build the `Chat` hub, served at `/chat`.
///
/// | Method | Arguments | Result |
/// |---|---|---|
/// | `Send` | name, message | broadcasts `Receive(name, message)` |
/// | `Do` | message | broadcasts `Receive("<message> from hubline")` |
/// | `Echo` | text | text |
/// | `Add` | a, b | a + b |
/// | `JoinGroup` / `LeaveGroup` | group | none |
/// | `SendToGroup` | group, message | connections reached |
/// | `Counter` | count, delay ms | stream `0..count` |
pub fn hub() -> Hub {
    HubBuilder::new("Chat", ())
        .method(
            "Send",
            |_, ctx: HubContext, (name, message): (String, String)| async move {
                let reached = ctx.clients().all().send("Receive", &[json!(name), json!(message)]);
                debug!(from = %ctx.connection_id(), reached, "chat message");
                Ok(())
            },
        )
        .method("Do", |_, ctx: HubContext, (message,): (String,)| async move {
            let text = format!("{message} from hubline");
            let _ = ctx.clients().all().send("Receive", &[json!(text)]);
            Ok(())
        })
        .method("Echo", |_, _, (text,): (String,)| async move { Ok(text) })
        .method("Add", |_, _, (a, b): (i64, i64)| async move {
            a.checked_add(b)
                .ok_or_else(|| HubError::new("integer overflow"))
        })
        .method("JoinGroup", |_, ctx: HubContext, (group,): (String,)| async move {
            ctx.add_to_group(&group)?;
            Ok::<(), HubError>(())
        })
        .method("LeaveGroup", |_, ctx: HubContext, (group,): (String,)| async move {
            ctx.remove_from_group(&group)?;
            Ok::<(), HubError>(())
        })
        .method(
            "SendToGroup",
            |_, ctx: HubContext, (group, message): (String, String)| async move {
                Ok(ctx.clients().group(&group).send("Receive", &[json!(message)]))
            },
        )
        .stream(
            "Counter",
            |_, ctx: HubContext, (count, delay_ms): (u32, u64)| async move {
                if count > MAX_COUNT {
                    return Err(HubError::new(format!("count must be at most {MAX_COUNT}")));
                }
                let delay = Duration::from_millis(delay_ms);
                Ok(async_stream::stream! {
                    for i in 0..count {
                        if ctx.cancellation().is_cancelled() {
                            break;
                        }
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        yield i;
                    }
                })
            },
        )
        .build()
}
