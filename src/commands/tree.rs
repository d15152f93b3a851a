//! Register map dump

use pwrctl_core::register::Encoding;
use pwrctl_core::{DeviceTree, Node};

fn describe_encoding(encoding: &Encoding) -> String {
    match encoding {
        Encoding::UnsignedInt => "uint".to_string(),
        Encoding::Bool => "bool".to_string(),
        Encoding::EnumMap(map) => {
            let labels: Vec<&str> = map.iter().map(|(_, label)| label).collect();
            format!("enum {{{}}}", labels.join(", "))
        }
        Encoding::FixedString(len) => format!("string[{}]", len),
    }
}

/// One line per node
pub fn node_line(node: &Node) -> String {
    match node {
        Node::Device(dev) => format!("{:<28} @ 0x{:08X}", dev.name(), dev.address()),
        Node::Register(reg) => format!(
            "{:<28}   0x{:08X} [{}:{}] {} {}",
            reg.name(),
            reg.address(),
            reg.bit_offset(),
            reg.bit_size(),
            reg.access(),
            describe_encoding(reg.encoding())
        ),
        Node::Command(cmd) => format!(
            "{:<28}   0x{:08X} command",
            cmd.name(),
            cmd.register().address()
        ),
        Node::Memory(block) => format!(
            "{:<28}   0x{:08X} memory[{}] {}",
            block.name(),
            block.address(),
            block.size(),
            block.access()
        ),
        Node::Derived(var) => {
            let unit = if var.unit().is_empty() {
                String::new()
            } else {
                format!(" ({})", var.unit())
            };
            format!(
                "{:<28}   = f({}){} {}",
                var.name(),
                var.sources().join(", "),
                unit,
                var.access()
            )
        }
    }
}

/// Print the register map
pub fn print_tree(tree: &DeviceTree) {
    println!("{} @ 0x{:08X}", tree.root().name(), tree.root().address());
    tree.walk(|_, depth, node| {
        println!("{}{}", "  ".repeat(depth + 1), node_line(node));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwrctl_core::{board, BoardConfig};

    #[test]
    fn test_node_lines() {
        let tree = board::build_tree(&BoardConfig::default()).unwrap();

        let line = node_line(tree.find("Core.AxiVersion").unwrap());
        assert!(line.contains("0x001C0000"));

        let line = node_line(tree.find("Core.AxiVersion.FpgaReloadHalt").unwrap());
        assert!(line.contains("[0:1] RW bool"));

        let line = node_line(tree.find("Core.AxiMicronN25Q.ProgramBuffer").unwrap());
        assert!(line.contains("0x00240100 memory[256]"));

        let line = node_line(tree.find("Core.Xadc.TemperatureCelsius").unwrap());
        assert!(line.contains("f(Temperature) (degC)"));
    }
}
