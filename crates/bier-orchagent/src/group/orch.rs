//! GroupController - applies IGMP joins and leaves to the [`GroupStore`].
//!
//! [`GroupStore`]: super::GroupStore

use bier_orch_common::Controller;
use log::{info, warn};

use crate::context::ControllerContext;
use crate::events::{ControlEvent, IgmpPacket, IgmpType, IGMP_PACKET_IN};

pub struct GroupController {
    ctx: ControllerContext,
}

impl GroupController {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    fn handle_packet(&self, packet: &IgmpPacket) {
        info!(
            "IGMP {:?} from {} for {} on {}",
            packet.igmp_type, packet.src_ip, packet.mc_address, packet.switch
        );
        {
            let mut groups = self.ctx.groups.write();
            match packet.igmp_type {
                IgmpType::Join => {
                    groups.join(&packet.switch, packet.mc_address, packet.src_ip);
                }
                IgmpType::Leave => {
                    if !groups.leave(&packet.switch, packet.mc_address, packet.src_ip) {
                        warn!(
                            "{} left {} on {} without being a member",
                            packet.src_ip, packet.mc_address, packet.switch
                        );
                    }
                }
            }
        }
        self.ctx.trigger(ControlEvent::GroupUpdate);
    }
}

impl Controller<ControlEvent> for GroupController {
    fn name(&self) -> &str {
        "GroupController"
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[IGMP_PACKET_IN]
    }

    fn handle(&self, event: &ControlEvent) -> anyhow::Result<()> {
        match event {
            ControlEvent::IgmpPacketIn(packet) => self.handle_packet(packet),
            other => warn!("GroupController got unexpected {:?}", other),
        }
        Ok(())
    }
}
