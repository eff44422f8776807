use crate::Packet;

/// Separator between the components of a metric name.
pub const NAME_SEPARATOR: char = '/';

/// Joins the non-empty name components of a data set with `/`.
///
/// # Example
///
/// ```
/// assert_eq!(coco_protocol::metric_name("cpu", "", "idle", "0"), "cpu/idle/0");
/// assert_eq!(coco_protocol::metric_name("", "", "", ""), "");
/// ```
pub fn metric_name(
    plugin: &str,
    plugin_instance: &str,
    type_name: &str,
    type_instance: &str,
) -> String {
    let mut name = String::with_capacity(
        plugin.len() + plugin_instance.len() + type_name.len() + type_instance.len() + 3,
    );

    for part in [plugin, plugin_instance, type_name, type_instance] {
        if part.is_empty() {
            continue;
        }
        if !name.is_empty() {
            name.push(NAME_SEPARATOR);
        }
        name.push_str(part);
    }

    name
}

impl Packet {
    /// Returns the canonical metric name, for example `cpu/0/cpu/idle`.
    pub fn metric_name(&self) -> String {
        metric_name(
            &self.plugin,
            &self.plugin_instance,
            &self.type_name,
            &self.type_instance,
        )
    }

    /// Returns the metric name prefixed with the host, as evaluated by the blacklist.
    pub fn qualified_name(&self) -> String {
        let name = self.metric_name();
        let mut qualified = String::with_capacity(self.host.len() + 1 + name.len());
        qualified.push_str(&self.host);
        qualified.push(NAME_SEPARATOR);
        qualified.push_str(&name);
        qualified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(plugin: &str, plugin_instance: &str, type_name: &str, type_instance: &str) -> Packet {
        Packet {
            host: "web-01".to_owned(),
            plugin: plugin.to_owned(),
            plugin_instance: plugin_instance.to_owned(),
            type_name: type_name.to_owned(),
            type_instance: type_instance.to_owned(),
            ..Packet::default()
        }
    }

    #[test]
    fn test_skips_empty_components() {
        assert_eq!(packet("cpu", "", "idle", "0").metric_name(), "cpu/idle/0");
        assert_eq!(packet("cpu", "0", "cpu", "idle").metric_name(), "cpu/0/cpu/idle");
        assert_eq!(packet("", "", "", "").metric_name(), "");
        assert_eq!(packet("", "", "", "rx").metric_name(), "rx");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(
            packet("interface", "eth0", "if_octets", "").qualified_name(),
            "web-01/interface/eth0/if_octets"
        );
        assert_eq!(packet("", "", "", "").qualified_name(), "web-01/");
    }
}
