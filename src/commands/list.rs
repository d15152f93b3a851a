//! List commands implementation

use pwrctl_link::available_transports;

/// List all transports compiled into this build
pub fn list_transports() {
    let transports = available_transports();
    if transports.is_empty() {
        println!("No transports available (recompile with transport features enabled)");
        return;
    }

    println!("Available transports:");
    println!();
    for t in &transports {
        let aliases = if t.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", t.aliases.join(", "))
        };
        let status = if t.implemented { "" } else { " [not yet implemented]" };
        println!("  {:<10} - {}{}{}", t.name, t.description, aliases, status);
    }
}
