use console::style;
use log::info;

use confine::{GROUPS, SystemCapabilities, util};

pub fn check_requirements() {
    info!("Checking available kernel features");
    println!("Checking confinement features...\n");

    let system = SystemCapabilities::detect();
    for line in system.summary().lines() {
        match line.strip_prefix("[ok]") {
            Some(rest) => println!("{}{}", style("[ok]").green(), rest),
            None => println!("{}", style(line).dim()),
        }
    }

    if !system.has_root {
        println!(
            "\n{} namespaces, identity changes and capability sets need root",
            style("note:").yellow().bold()
        );
    }

    println!("\nSystem info:");
    println!("  UID: {}", util::get_uid());
    println!("  GID: {}", util::get_gid());
}

pub fn list_syscall_groups() {
    info!("Listing syscall groups");
    println!("Available syscall groups:\n");

    for group in GROUPS {
        println!(
            "  {:18} - {} ({} entries)",
            style(group.name).cyan(),
            group.description,
            group.members().len()
        );
    }

    println!();
    println!("Use --deny-syscall @GROUP or --allow-syscall @GROUP to filter by group");
}
