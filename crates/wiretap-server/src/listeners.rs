use crate::config::{InteractTarget, ServerConfig};
use crate::interact::LineSelector;
use crate::tick::{LocationCache, TickContext};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use wiretap::{inbound, PacketDispatcher, PacketEvent, SubscriberId, TextComponent};
use wiretap_scheduler::TaskScheduler;

pub type Scheduler = TaskScheduler<TickContext>;

/// Register the host's subscribers on the interception dispatcher.
pub fn install(
    dispatcher: &PacketDispatcher,
    config: &ServerConfig,
    scheduler: &Scheduler,
    locations: &LocationCache,
    selector: Arc<dyn LineSelector>,
) -> Vec<SubscriberId> {
    let mut ids = Vec::new();
    if config.log_packets {
        ids.push(packet_log(dispatcher));
    }
    ids.extend(chat_filter(
        dispatcher,
        &config.blocked_words,
        scheduler.clone(),
    ));
    ids.extend(interact(
        dispatcher,
        &config.interact_targets,
        selector,
        Arc::clone(locations),
        scheduler.clone(),
    ));
    info!("Installed {} packet subscriber(s)", ids.len());
    ids
}

/// Log every packet in both directions.
pub fn packet_log(dispatcher: &PacketDispatcher) -> SubscriberId {
    dispatcher.subscribe_all("packet-log", |event: &mut PacketEvent| {
        info!(
            player = %event.player().name,
            direction = ?event.direction(),
            "{} (0x{:02X}, {} bytes)",
            event.shape_name(),
            event.packet().id(),
            event.packet().payload().len()
        );
        Ok(())
    })
}

/// Drop chat messages containing a blocked word and tell the sender.
pub fn chat_filter(
    dispatcher: &PacketDispatcher,
    blocked_words: &[String],
    scheduler: Scheduler,
) -> Option<SubscriberId> {
    if blocked_words.is_empty() {
        return None;
    }
    let blocked: Vec<String> = blocked_words.iter().map(|w| w.to_lowercase()).collect();

    let id = dispatcher
        .listen("chat-filter")
        .filter(inbound("ChatMessage"))
        .consume(move |event| {
            let Some(message) = event.field("message") else {
                return;
            };
            let lower = message.as_str().unwrap_or_default().to_lowercase();
            let Some(word) = blocked.iter().find(|w| lower.contains(w.as_str())) else {
                return;
            };

            event.cancel();
            let player = event.player().uuid;
            info!("Blocked chat from {} ({:?})", event.player().name, word);
            scheduler.run_sync(move |ctx| {
                ctx.tell(
                    &player,
                    TextComponent::colored("Your message was not sent.", "red"),
                );
            });
        });
    Some(id)
}

/// Resolve clicks on configured stacked-line entities to a line and tell the player
/// which one they hit. Selection runs off the transport thread.
pub fn interact(
    dispatcher: &PacketDispatcher,
    targets: &[InteractTarget],
    selector: Arc<dyn LineSelector>,
    locations: LocationCache,
    scheduler: Scheduler,
) -> Option<SubscriberId> {
    if targets.is_empty() {
        return None;
    }
    let targets: Arc<HashMap<i32, InteractTarget>> = Arc::new(
        targets
            .iter()
            .map(|t| (t.entity_id, t.clone()))
            .collect(),
    );
    let known = Arc::clone(&targets);

    let id = dispatcher
        .listen("interact")
        .filter(inbound("InteractEntity"))
        .filter(move |event| {
            event
                .field("entity_id")
                .and_then(|v| v.as_i32())
                .is_some_and(|id| known.contains_key(&id))
        })
        .consume(move |event| {
            let Some(target) = event
                .field("entity_id")
                .and_then(|v| v.as_i32())
                .and_then(|id| targets.get(&id))
                .cloned()
            else {
                return;
            };
            // The entity only exists on the client.
            event.cancel();

            let player = event.player().uuid;
            let Some(location) = locations.get(&player).map(|l| *l) else {
                debug!("No location yet for {}, ignoring click", event.player().name);
                return;
            };

            let selector = Arc::clone(&selector);
            let reply = scheduler.clone();
            scheduler.run_async(move || {
                let Some(line) = selector.select(&location.eye(), &target) else {
                    return;
                };
                let Some(clicked) = target.lines.get(line) else {
                    debug!("Selector picked line {} of {} on {}", line, target.lines.len(), target.name);
                    return;
                };
                let text = format!("You clicked line {}: {}", line + 1, clicked);
                reply.run_sync(move |ctx| {
                    ctx.tell(&player, TextComponent::plain(text));
                });
            });
        });
    Some(id)
}
