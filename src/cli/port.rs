//! Port subcommands.

use super::render_table;

use sentinel::{
    error::Result,
    helpers::{self, ColoredString},
    port,
    registry::Registry,
};

use colored::Colorize;
use serde_json::json;
use tabled::Tabled;

pub fn allocate(registry: &Registry, requested: Option<u16>, name: &Option<String>) -> Result<()> {
    let record = port::allocate(registry, requested, name.clone())?;
    println!(
        "{} Allocated port {} ({})",
        *helpers::SUCCESS,
        record.port.to_string().bold(),
        record.name
    );
    Ok(())
}

pub fn free(registry: &Registry, requested: u16) -> Result<()> {
    let record = port::free(registry, requested)?;
    println!("{} Freed port {}", *helpers::SUCCESS, record.port.to_string().bold());
    Ok(())
}

pub fn list(registry: &Registry, name: &Option<String>, format: &String) -> Result<()> {
    let ports = port::list(registry, name.as_deref())?;
    if ports.is_empty() {
        println!("{} No ports allocated", *helpers::SUCCESS);
        return Ok(());
    }

    #[derive(Tabled, Debug)]
    struct PortItem {
        port: ColoredString,
        name: String,
        allocated: String,
    }

    impl serde::Serialize for PortItem {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            let trimmed_json = json!({
                "port": &self.port.0.trim(),
                "name": &self.name.trim(),
                "allocated": &self.allocated.trim(),
            });
            trimmed_json.serialize(serializer)
        }
    }

    let items: Vec<PortItem> = ports
        .iter()
        .map(|record| PortItem {
            port: ColoredString(record.port.to_string().cyan()),
            name: record.name.clone(),
            allocated: record.allocated_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();

    render_table(&items, format);
    Ok(())
}
