//! Event blocks: hat blocks that register listeners, and `broadcast`.
//!
//! Hat blocks (`can_run`) do their work at registration time: when the
//! engine launches them as root tasks they install a per-run listener
//! capturing the spawn descriptor of their successor, then finish. The
//! chain under the hat only runs when a matching broadcast arrives and the
//! listener returns that spawn to the scheduler.

use crate::registry::{BlockDefinition, ParamSpec, Registry};
use crate::task::Outcome;

pub fn register(registry: &mut Registry) {
    registry.register(
        BlockDefinition::new("event_whenflagclicked", |ctx, _args| {
            let next = ctx.next_spawn();
            ctx.listen(Box::new(move |topic, message| {
                if topic == "executor" && message == "start" {
                    Ok(next.clone())
                } else {
                    Ok(None)
                }
            }));
            Ok(Outcome::Done)
        })
        .category("events")
        .predefined()
        .can_run(),
    );

    registry.register(
        BlockDefinition::new("event_whenkeypressed", |ctx, args| {
            let key_option = args.text("key_option")?;
            let next = ctx.next_spawn();
            ctx.listen(Box::new(move |topic, message| {
                // The editor labels arrow keys "left arrow" etc. while the
                // keyboard plugin reports bare key names.
                let listen_key = key_option.replace(" arrow", "");
                if topic == "keyboard" && (key_option == "any" || message == listen_key) {
                    Ok(next.clone())
                } else {
                    Ok(None)
                }
            }));
            Ok(Outcome::Done)
        })
        .category("events")
        .predefined()
        .can_run()
        .params(vec![ParamSpec::value("key_option")]),
    );

    registry.register(
        BlockDefinition::new("event_whenbroadcastreceived", |ctx, args| {
            // The channel name is resolved once, at registration.
            let channel = ctx.get_variable(args.reference("broadcast_option")?)?.to_text();
            let next = ctx.next_spawn();
            ctx.listen(Box::new(move |topic, message| {
                if topic == "broadcast" && message == channel {
                    Ok(next.clone())
                } else {
                    Ok(None)
                }
            }));
            Ok(Outcome::Done)
        })
        .category("events")
        .predefined()
        .can_run()
        .params(vec![ParamSpec::reference("broadcast_option")]),
    );

    registry.register(
        BlockDefinition::new("event_broadcast", |ctx, args| {
            let channel = ctx.get_variable(args.reference("broadcast_input")?)?.to_text();
            ctx.broadcast("broadcast", &channel);
            Ok(Outcome::next())
        })
        .category("events")
        .predefined()
        .params(vec![ParamSpec::reference("broadcast_input")]),
    );
}
