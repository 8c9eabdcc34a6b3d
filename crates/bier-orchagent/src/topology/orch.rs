//! TopologyController - learns adjacencies and keeps domain graphs current.
//!
//! - Topology packets from connected switches add neighbours to the observer's
//!   port map. Neighbours that are not configured switches are hosts and get
//!   a reverse adjacency on port 1.
//! - Port messages take links down or restore them.
//! - Every `topology_change` rebuilds all domain graphs before the forwarding
//!   controllers (registered later) recompute.

use anyhow::Context;
use bier_orch_common::Controller;
use log::{debug, info, warn};

use crate::context::ControllerContext;
use crate::events::{
    ControlEvent, PortMessage, TopologyChange, TopologyPacket, PORT_MESSAGE, TOPOLOGY_CHANGE, TOPOLOGY_PACKET_IN,
};
use crate::topology::Device;

/// Port hosts use towards their switch.
const HOST_UPLINK_PORT: u32 = 1;

pub struct TopologyController {
    ctx: ControllerContext,
}

impl TopologyController {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    fn handle_packet(&self, packet: &TopologyPacket) -> anyhow::Result<()> {
        if !self.ctx.config.is_switch(&packet.switch) || !self.ctx.is_connected(&packet.switch) {
            debug!("Ignoring topology packet from unconnected {}", packet.switch);
            return Ok(());
        }

        debug!(
            "Topology packet: {} ({}) seen by {} on port {}",
            packet.name, packet.ip, packet.switch, packet.port
        );

        let changed = {
            let mut topology = self.ctx.topology.write();
            if !self.ctx.config.is_switch(&packet.name) {
                topology.add_device(Device::host(&packet.name, packet.ip, &packet.mac))?;
                topology
                    .device_mut(&packet.name)?
                    .add_device_to_port(&packet.switch, HOST_UPLINK_PORT);
            }
            topology
                .device_mut(&packet.switch)
                .with_context(|| format!("observer {} not registered", packet.switch))?
                .add_device_to_port(&packet.name, packet.port)
        };

        if changed {
            info!("New adjacency {} -> {} on port {}", packet.switch, packet.name, packet.port);
            self.ctx.trigger(ControlEvent::TopologyChange(TopologyChange::adjacency(
                &packet.switch,
                &packet.name,
                packet.port,
            )));
        }
        Ok(())
    }

    fn handle_port(&self, message: &PortMessage) -> anyhow::Result<()> {
        let changed = {
            let mut topology = self.ctx.topology.write();
            if message.up {
                topology.port_up(&message.switch, message.port)?
            } else {
                topology.port_down(&message.switch, message.port)?
            }
        };

        match changed {
            Some(link) => {
                info!(
                    "Port {} on {} {}, link to {}",
                    message.port,
                    message.switch,
                    if message.up { "up" } else { "down" },
                    link.neighbor
                );
                self.ctx.trigger(ControlEvent::TopologyChange(TopologyChange::port_update(
                    &message.switch,
                    message.port,
                )));
            }
            None => debug!("Port {} on {} has no link to update", message.port, message.switch),
        }
        Ok(())
    }

    fn rebuild(&self, change: &TopologyChange) {
        let mut topology = self.ctx.topology.write();
        topology.build_all_domains();
        debug!("Rebuilt domains after {:?}", change);
        for line in topology.summary() {
            debug!("{}", line);
        }
    }
}

impl Controller<ControlEvent> for TopologyController {
    fn name(&self) -> &str {
        "TopologyController"
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[TOPOLOGY_PACKET_IN, PORT_MESSAGE, TOPOLOGY_CHANGE]
    }

    fn handle(&self, event: &ControlEvent) -> anyhow::Result<()> {
        match event {
            ControlEvent::TopologyPacketIn(packet) => self.handle_packet(packet),
            ControlEvent::PortMessage(message) => self.handle_port(message),
            ControlEvent::TopologyChange(change) => {
                self.rebuild(change);
                Ok(())
            }
            other => {
                warn!("TopologyController got unexpected {:?}", other);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerConfig, SwitchConfig};
    use bier_driver::MemoryDriver;
    use bier_orch_common::EventBus;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn switch(name: &str, id: u8) -> SwitchConfig {
        SwitchConfig {
            name: name.into(),
            ip: Ipv4Addr::new(10, 0, id, 0),
            mac: format!("00:00:00:0{}:00:00", id),
            bfr_id: u32::from(id),
            ingress: false,
            domains: Default::default(),
            static_rules: None,
        }
    }

    struct Fixture {
        bus: Arc<EventBus<ControlEvent>>,
        ctx: ControllerContext,
        changes: Arc<Mutex<Vec<TopologyChange>>>,
    }

    fn fixture() -> Fixture {
        let config = ControllerConfig {
            switches: vec![switch("s1", 1), switch("s2", 2)],
            ..Default::default()
        };
        let bus = Arc::new(EventBus::new());
        let ctx = ControllerContext::new(config, Arc::new(MemoryDriver::new()), &bus);
        bus.register_controller(Arc::new(TopologyController::new(ctx.clone())));

        let changes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&changes);
        bus.on(TOPOLOGY_CHANGE, move |e| {
            if let ControlEvent::TopologyChange(c) = e {
                seen.lock().push(c.clone());
            }
            Ok(())
        });
        bus.activate();

        for s in ["s1", "s2"] {
            let cfg = ctx.config.switch(s).cloned().unwrap();
            ctx.topology
                .write()
                .add_device(Device::switch(&cfg.name, cfg.ip, &cfg.mac, cfg.bfr_id))
                .unwrap();
            ctx.mark_connected(s);
        }
        Fixture { bus, ctx, changes }
    }

    fn packet(switch: &str, name: &str, port: u32, ip: [u8; 4]) -> ControlEvent {
        ControlEvent::TopologyPacketIn(TopologyPacket {
            switch: switch.into(),
            name: name.into(),
            port,
            ip: Ipv4Addr::from(ip),
            mac: "00:00:00:00:00:01".into(),
        })
    }

    #[test]
    fn test_switch_adjacency_triggers_change_once() {
        let f = fixture();
        f.bus.trigger(&packet("s1", "s2", 2, [10, 0, 2, 0]));
        f.bus.trigger(&packet("s1", "s2", 2, [10, 0, 2, 0]));

        assert_eq!(*f.changes.lock(), vec![TopologyChange::adjacency("s1", "s2", 2)]);
        assert_eq!(f.ctx.topology.read().device("s1").unwrap().port_to("s2").unwrap(), 2);
    }

    #[test]
    fn test_host_is_registered() {
        let f = fixture();
        f.bus.trigger(&packet("s1", "h1", 1, [10, 0, 1, 1]));

        let topology = f.ctx.topology.read();
        let h1 = topology.device("h1").unwrap();
        assert!(h1.is_host());
        assert_eq!(h1.port_to("s1").unwrap(), 1);
        // the change rebuilt the graph
        assert_eq!(topology.next_hop("s1", "h1", 0).unwrap().name, "h1");
    }

    #[test]
    fn test_unconnected_observer_ignored() {
        let f = fixture();
        f.bus.trigger(&packet("s9", "h1", 1, [10, 0, 9, 1]));
        assert!(f.changes.lock().is_empty());
        assert!(!f.ctx.topology.read().exists_device("h1"));
    }

    #[test]
    fn test_port_down_and_up() {
        let f = fixture();
        f.bus.trigger(&packet("s1", "s2", 2, [10, 0, 2, 0]));
        f.bus.trigger(&packet("s2", "s1", 1, [10, 0, 1, 0]));
        f.changes.lock().clear();

        let down = PortMessage {
            switch: "s1".into(),
            port: 2,
            up: false,
        };
        f.bus.trigger(&ControlEvent::PortMessage(down.clone()));
        assert!(f.ctx.topology.read().next_hop("s1", "s2", 0).is_err());

        // nothing left to take down
        f.bus.trigger(&ControlEvent::PortMessage(down));
        assert_eq!(f.changes.lock().len(), 1);

        f.bus.trigger(&ControlEvent::PortMessage(PortMessage {
            switch: "s1".into(),
            port: 2,
            up: true,
        }));
        assert_eq!(
            *f.changes.lock(),
            vec![TopologyChange::port_update("s1", 2), TopologyChange::port_update("s1", 2)]
        );
        assert_eq!(f.ctx.topology.read().next_hop("s1", "s2", 0).unwrap().name, "s2");
    }
}
