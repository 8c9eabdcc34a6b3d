//! ControllerDaemon implementation.
//!
//! The daemon owns the event bus and the shared stores. It:
//! - registers every controller in dispatch order
//! - connects the configured switches
//! - turns feed messages into bus events
//! - reports installed state for `--dump`

use std::sync::Arc;

use bier_driver::DeviceDriver;
use bier_orch_common::{Controller, EventBus, ManagerRegistry};
use log::{debug, info};

use crate::bier::BierController;
use crate::config::ControllerConfig;
use crate::context::ControllerContext;
use crate::error::{ControllerError, ControllerResult};
use crate::events::{ControlEvent, FeedMessage};
use crate::group::GroupController;
use crate::ipv4::Ipv4Controller;
use crate::mac::MacController;
use crate::port::PortController;
use crate::topology::{Device, TopologyController};
use crate::tunnel::TunnelController;

/// The controller process: bus, stores and controllers.
pub struct ControllerDaemon {
    bus: Arc<EventBus<ControlEvent>>,
    ctx: ControllerContext,
}

impl ControllerDaemon {
    /// Wires every controller onto a fresh bus and activates it.
    ///
    /// Handlers for one event run in registration order: the port controller
    /// records port status before the topology controller reacts to it, and
    /// domain graphs are rebuilt before any forwarding controller recomputes.
    pub fn new(config: ControllerConfig, driver: Arc<dyn DeviceDriver>) -> Self {
        let bus = Arc::new(EventBus::new());
        let ctx = ControllerContext::new(config, driver, &bus);
        let daemon = Self { bus, ctx };

        daemon.register(PortController::new(daemon.ctx.clone()));
        daemon.register(TopologyController::new(daemon.ctx.clone()));
        daemon.register(GroupController::new(daemon.ctx.clone()));
        daemon.register(BierController::new(daemon.ctx.clone()));
        daemon.register(Ipv4Controller::new(daemon.ctx.clone()));
        daemon.register(TunnelController::new(daemon.ctx.clone()));
        daemon.register(MacController::new(daemon.ctx.clone()));

        daemon.bus.activate();
        daemon
    }

    fn register<C: Controller<ControlEvent> + 'static>(&self, controller: C) {
        let controller = Arc::new(controller);
        let name = controller.name().to_string();
        let handlers = self.bus.register_controller(controller);
        info!("Registered {} ({} handlers)", name, handlers.len());
    }

    /// Registers every configured switch and announces its connection.
    pub fn connect_switches(&self) -> ControllerResult<()> {
        let config = Arc::clone(&self.ctx.config);
        {
            let mut topology = self.ctx.topology.write();
            for switch in &config.switches {
                let mut device = Device::switch(&switch.name, switch.ip, &switch.mac, switch.bfr_id);
                for (&domain, &bfr_id) in &switch.domains {
                    device = device.with_domain(domain, bfr_id);
                }
                topology.add_device(device)?;
            }
            topology.build_all_domains();
        }

        for switch in &config.switches {
            if self.ctx.mark_connected(&switch.name) {
                info!("Connected {} ({})", switch.name, switch.ip);
                self.ctx.trigger(ControlEvent::SwitchConnected {
                    name: switch.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Delivers one feed message. Returns false if no handler took it.
    pub fn ingest(&self, message: FeedMessage) -> ControllerResult<bool> {
        if let Some(port) = message.port() {
            if !self.ctx.config.fits_bitstring(port) {
                return Err(ControllerError::InvalidPacket(format!(
                    "port {} beyond bitstring length {}",
                    port, self.ctx.config.bitstring_length
                )));
            }
        }
        let event = ControlEvent::try_from(message)?;
        debug!("Ingest {:?}", event);
        Ok(self.bus.trigger(&event))
    }

    pub fn trigger(&self, event: ControlEvent) -> bool {
        self.bus.trigger(&event)
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    pub fn bus(&self) -> &Arc<EventBus<ControlEvent>> {
        &self.bus
    }

    pub fn registry(&self) -> &ManagerRegistry {
        &self.ctx.registry
    }

    /// Topology, groups and every installed entry, one line each.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = {
            let topology = self.ctx.topology.read();
            let mut lines = topology.summary();
            lines.extend(self.ctx.groups.read().summary(&topology));
            lines
        };

        let registry = self.registry();
        for name in registry.names() {
            let Ok(tables) = registry.show_tables(&name) else {
                continue;
            };
            for (table, entries) in tables {
                lines.push(format!("[{}] {} ({} entries)", name, table, entries.len()));
                lines.extend(entries.iter().map(|e| format!("  {}", e)));
            }
        }
        lines
    }

    /// Stops delivering events and drops every subscription.
    pub fn shutdown(&self) {
        self.bus.deactivate();
        info!("Controller daemon stopped");
    }
}
