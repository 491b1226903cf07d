use crate::format::FourCc;
use crate::port::PortType;

/// Composes a port's stable debug name: `"<component>:<kind><index>(<fourcc>)"`
/// (spec §4.9), refreshed on every format change.
pub fn format_name(component: &str, port_type: PortType, index: u32, encoding: FourCc) -> String {
    let kind = match port_type {
        PortType::Control => "ctr",
        PortType::Input => "in",
        PortType::Output => "out",
    };
    format!("{}:{}{}({})", component, kind, index, encoding)
}
