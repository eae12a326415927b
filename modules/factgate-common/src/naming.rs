//! Reserved channel names per domain.

/// Channel carrying only processing-unit presence announcements.
pub fn presence_channel(domain: &str) -> String {
    format!("{}_pu_presence_announcing", domain.trim())
}

/// Channel carrying routing-plan-changed notifications for dependent gateways.
pub fn routing_plan_evolution_channel(domain: &str) -> String {
    format!("{}_io_gateway_dynamic_routing_plan_evolution", domain.trim())
}

/// Channel a domain gateway takes facts from before routing them to PUs.
pub fn gateway_inbound_channel(domain: &str) -> String {
    format!("{}_in", domain.trim())
}
