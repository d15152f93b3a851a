//! Register access commands

use pwrctl_core::{MemoryTransport, Node, Session, Value};

fn format_value(node: &Node, value: &Value) -> String {
    match (node, value) {
        (Node::Derived(var), Value::Float(v)) => var.format(*v),
        (Node::Register(reg), Value::UInt(raw)) => match reg.label_for(*raw) {
            Some(label) => format!("{} (0x{:X})", label, raw),
            None => value.to_string(),
        },
        _ => value.to_string(),
    }
}

/// Dump every readable node
pub fn run_read_all<T: MemoryTransport>(
    session: &mut Session<T>,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = session.read_all()?;
    let width = snapshot.iter().map(|e| e.path.len()).max().unwrap_or(0);
    for entry in &snapshot {
        println!("{:<width$} = {}", entry.path, entry.display_value(), width = width);
    }
    log::info!("Read {} values", snapshot.len());
    Ok(())
}

/// Read one node
pub fn run_get<T: MemoryTransport>(
    session: &mut Session<T>,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = session.read(path)?;
    let node = session.tree().find(path)?;
    println!("{} = {}", path, format_value(node, &value));
    Ok(())
}

/// Write one node, then show what the board reports back
pub fn run_set<T: MemoryTransport>(
    session: &mut Session<T>,
    path: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    session.write_str(path, value)?;

    let readable = match session.tree().find(path)? {
        Node::Register(reg) => reg.access().readable(),
        Node::Derived(var) => var.access().readable(),
        _ => false,
    };
    if readable {
        let now = session.read(path)?;
        let node = session.tree().find(path)?;
        println!("{} = {}", path, format_value(node, &now));
    } else {
        println!("Wrote {} to {}", value, path);
    }
    Ok(())
}

/// Invoke a command node
pub fn run_exec<T: MemoryTransport>(
    session: &mut Session<T>,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match session.invoke(path)? {
        Some(response) => println!("{} -> 0x{:X}", path, response),
        None => println!("{} done", path),
    }
    Ok(())
}
