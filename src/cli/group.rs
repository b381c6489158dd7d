//! Group subcommands.

use super::{print_batch, render_table};

use sentinel::{
    error::{Error, Result},
    group,
    helpers::{self, ColoredString},
    registry::{Env, Registry, Selector},
};

use std::path::PathBuf;

use colored::Colorize;
use serde_json::json;
use tabled::Tabled;

pub fn create(registry: &Registry, name: &str, env_pairs: &[String], env_file: &Option<PathBuf>) -> Result<()> {
    let mut env = Env::new();
    for pair in env_pairs {
        let (key, value) = helpers::parse_env_pair(pair).ok_or_else(|| {
            Error::InvalidInput(format!("invalid environment variable '{pair}' (expected KEY=VALUE)"))
        })?;
        env.insert(key, value);
    }

    group::create(registry, name, env, env_file.clone())?;
    println!("{} Created group {}", *helpers::SUCCESS, name.bold());
    Ok(())
}

pub fn delete(registry: &Registry, name: &str, stop_members: bool, force: bool) -> Result<()> {
    let (record, report) = group::delete(registry, name, stop_members, force)?;
    print_batch(&report, "Stopped");

    println!("{} Deleted group {}", *helpers::SUCCESS, record.name.bold());
    if !stop_members && !record.members.is_empty() {
        println!(
            "{} {} process(es) unassigned from group",
            *helpers::WARN,
            record.members.len()
        );
    }
    Ok(())
}

pub fn add(registry: &Registry, name: &str, selector: &Selector) -> Result<()> {
    let record = group::add(registry, name, selector)?;
    println!(
        "{} Added process {} to group {}",
        *helpers::SUCCESS,
        record.name.bold(),
        name.bold()
    );
    Ok(())
}

pub fn remove(registry: &Registry, selector: &Selector) -> Result<()> {
    let record = registry.find_process(selector)?;
    let Some(old_group) = record.group.clone() else {
        println!("{} Process {} is not in any group", *helpers::WARN, record.name.bold());
        return Ok(());
    };

    group::remove(registry, selector)?;
    println!(
        "{} Removed process {} from group {}",
        *helpers::SUCCESS,
        record.name.bold(),
        old_group.bold()
    );
    Ok(())
}

pub fn list(registry: &Registry, name: &Option<String>, format: &String) -> Result<()> {
    if let Some(name) = name {
        return show(registry, name);
    }

    let groups = group::list(registry)?;
    if groups.is_empty() {
        println!("{} No groups found", *helpers::SUCCESS);
        return Ok(());
    }

    #[derive(Tabled, Debug)]
    struct GroupItem {
        name: ColoredString,
        processes: String,
        #[tabled(rename = "env vars")]
        env_vars: String,
        created: String,
    }

    impl serde::Serialize for GroupItem {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            let trimmed_json = json!({
                "name": &self.name.0.trim(),
                "processes": &self.processes.trim(),
                "env_vars": &self.env_vars.trim(),
                "created": &self.created.trim(),
            });
            trimmed_json.serialize(serializer)
        }
    }

    let items: Vec<GroupItem> = groups
        .iter()
        .map(|record| GroupItem {
            name: ColoredString(record.name.clone().bold()),
            processes: record.members.len().to_string(),
            env_vars: record.env.len().to_string(),
            created: record.created_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();

    render_table(&items, format);
    Ok(())
}

fn show(registry: &Registry, name: &str) -> Result<()> {
    let members = group::members(registry, name)?;
    let record = registry
        .snapshot()?
        .group(name)
        .cloned()
        .ok_or_else(|| Error::NotFound(name.to_string()))?;

    println!("\nGroup: {}", record.name.bold());
    println!("Created: {}", record.created_at.format("%Y-%m-%d %H:%M"));
    if let Some(env_file) = &record.env_file {
        println!("Environment file: {}", env_file.display());
    }
    if !record.env.is_empty() {
        println!("Environment variables:");
        for (key, value) in &record.env {
            println!("  {key}={value}");
        }
    }

    if members.is_empty() {
        println!("Processes: none");
    } else {
        println!("\nProcesses ({}):", members.len());
        for member in members {
            println!("  - {} (id: {}, pid: {})", member.name.bold(), member.id, member.pid);
        }
    }
    println!();
    Ok(())
}

pub fn start(registry: &Registry, name: &str) -> Result<()> {
    let report = group::start_all(registry, name)?;
    if report.succeeded.is_empty() && report.failed.is_empty() {
        println!("{} Nothing to start in group '{name}'", *helpers::SUCCESS);
    } else {
        print_batch(&report, "Started");
    }
    Ok(())
}

pub fn stop(registry: &Registry, name: &str, force: bool) -> Result<()> {
    let report = group::stop_all(registry, name, force)?;
    if report.succeeded.is_empty() && report.failed.is_empty() {
        println!("{} No processes in group '{name}'", *helpers::SUCCESS);
    } else {
        print_batch(&report, "Stopped");
    }
    Ok(())
}

pub fn restart(registry: &Registry, name: &str) -> Result<()> {
    let report = group::restart_all(registry, name)?;
    if report.succeeded.is_empty() && report.failed.is_empty() {
        println!("{} No processes in group '{name}'", *helpers::SUCCESS);
    } else {
        print_batch(&report, "Restarted");
    }
    Ok(())
}
